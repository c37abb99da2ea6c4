//! Two-stage registration: rigid, then affine with nearest-neighbour resampling.
//!
//! ```text
//! fixed ─┐
//!        ├─ rigid ──> r_temp.nii ─┐
//! moving ┘                        ├─ affine ──> engine result ──> r_<moving>
//! fixed ──────────────────────────┘
//! ```
//!
//! `r_temp.nii` and the engine's `TransformParameters.0.txt` live in the
//! configured working directory and are removed once the pipeline finishes.

use crate::config::{PipelineConfig, TEMP_IMG, TRANSFORM_PARAMETERS};
use crate::engine::{ElastixEngine, RegistrationEngine};
use crate::error::{RegistrationError, Result};
use crate::parameters::{ParameterMap, FINAL_INTERPOLATION_ORDER};
use crate::progress::{ProgressCallback, ProgressTracker, Stage};
use nireg_core::image::Image;
use nireg_core::naming;
use nireg_io::{read_nifti, write_nifti};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// A registration task for one fixed/moving pair.
///
/// Construction stores the two paths and nothing else; extension validation
/// happens at the start of each stage. The task owns its engine.
#[derive(Debug)]
pub struct Registration<E: RegistrationEngine = ElastixEngine> {
    fixed_img: PathBuf,
    moving_img: PathBuf,
    config: PipelineConfig,
    engine: E,
    progress: ProgressTracker,
    /// Set once the affine stage succeeds; cleared when a stage starts.
    affine_done: bool,
}

impl Registration {
    /// Task backed by the default elastix engine.
    pub fn new(fixed_img: impl Into<PathBuf>, moving_img: impl Into<PathBuf>) -> Self {
        Self::with_engine(fixed_img, moving_img, ElastixEngine::new())
    }

    /// Delete `r_temp.nii` and `TransformParameters.0.txt` from `work_dir`.
    ///
    /// Fails if either file is missing.
    pub fn remove_files<P: AsRef<Path>>(work_dir: P) -> Result<()> {
        remove_files(work_dir)
    }
}

impl<E: RegistrationEngine> Registration<E> {
    pub fn with_engine(
        fixed_img: impl Into<PathBuf>,
        moving_img: impl Into<PathBuf>,
        engine: E,
    ) -> Self {
        Self {
            fixed_img: fixed_img.into(),
            moving_img: moving_img.into(),
            config: PipelineConfig::default(),
            engine,
            progress: ProgressTracker::new(),
            affine_done: false,
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress.add_callback(callback);
        self
    }

    pub fn fixed_img(&self) -> &Path {
        &self.fixed_img
    }

    pub fn moving_img(&self) -> &Path {
        &self.moving_img
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn into_engine(self) -> E {
        self.engine
    }

    /// The historical extension check, operator precedence quirk included.
    ///
    /// True for `("a.nii", "b.txt")` and `("a.txt", "b.nii.gz")`, false for
    /// `("a.txt", "b.nii")`. See [`has_nifti_inputs`](Self::has_nifti_inputs)
    /// for the check that requires both files to be NIfTI.
    pub fn is_img_nii(&self) -> bool {
        naming::legacy_extension_check(&self.fixed_img, &self.moving_img)
    }

    /// Both paths end in `.nii` or `.nii.gz`.
    pub fn has_nifti_inputs(&self) -> bool {
        naming::strict_extension_check(&self.fixed_img, &self.moving_img)
    }

    /// Last image produced by the engine.
    pub fn result_image(&self) -> Option<&Image> {
        self.engine.result_image()
    }

    fn check_inputs(&self) -> Result<()> {
        if self
            .config
            .extension_policy
            .accepts(&self.fixed_img, &self.moving_img)
        {
            return Ok(());
        }
        tracing::warn!(
            "The images must be in a .nii or .nii.gz format (fixed: {}, moving: {})",
            self.fixed_img.display(),
            self.moving_img.display()
        );
        Err(RegistrationError::invalid_extension(
            &self.fixed_img,
            &self.moving_img,
        ))
    }

    fn execute_stage(&mut self, fixed: Image, moving: Image, parameters: ParameterMap) -> Result<()> {
        ensure_dir(&self.config.work_dir)?;
        self.engine.set_output_directory(&self.config.work_dir);
        self.engine.set_fixed_image(fixed);
        self.engine.set_moving_image(moving);
        self.engine.set_parameter_map(parameters);
        self.engine.execute()
    }

    fn report<T>(&mut self, stage: Stage, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            self.progress.error(stage, &err.to_string());
        }
        result
    }

    /// Rigid stage: register the moving image onto the fixed image and write
    /// the result to `<work_dir>/r_temp.nii`.
    pub fn rigid_registration(&mut self) -> Result<()> {
        self.affine_done = false;
        self.progress.start();
        let timer = Instant::now();
        let result = self.rigid_inner();
        self.report(Stage::Rigid, result)?;
        let transform = self.config.rigid_parameters.get_value("Transform");
        self.progress.stage(Stage::Rigid, timer.elapsed(), transform);
        Ok(())
    }

    fn rigid_inner(&mut self) -> Result<()> {
        self.check_inputs()?;
        tracing::info!(
            "Rigid registration of {} onto {}",
            self.moving_img.display(),
            self.fixed_img.display()
        );

        let fixed = load_image(&self.fixed_img)?;
        let moving = load_image(&self.moving_img)?;
        let parameters = self.config.rigid_parameters.clone();
        self.execute_stage(fixed, moving, parameters)?;

        let result = self.engine.result_image().ok_or(RegistrationError::NoResult)?;
        let temp = self.config.temp_image_path();
        write_nifti(&temp, result).map_err(RegistrationError::image_io)?;
        tracing::debug!("Rigid result written to {}", temp.display());
        Ok(())
    }

    /// Affine stage: register `<work_dir>/r_temp.nii` onto the fixed image
    /// with nearest-neighbour final resampling. The result stays in the
    /// engine; call [`output`](Self::output) to write it.
    pub fn affine_registration(&mut self) -> Result<()> {
        self.affine_done = false;
        self.progress.start();
        let timer = Instant::now();
        let result = self.affine_inner();
        self.report(Stage::Affine, result)?;
        self.affine_done = true;
        let transform = self.config.affine_parameters.get_value("Transform");
        self.progress.stage(Stage::Affine, timer.elapsed(), transform);
        Ok(())
    }

    fn affine_inner(&mut self) -> Result<()> {
        self.check_inputs()?;
        let temp = self.config.temp_image_path();
        tracing::info!(
            "Affine registration of {} onto {}",
            temp.display(),
            self.fixed_img.display()
        );

        let fixed = load_image(&self.fixed_img)?;
        let moving = load_image(&temp)?;
        let parameters = self
            .config
            .affine_parameters
            .clone()
            .with_interpolation_order(0);
        debug_assert_eq!(parameters.get_value(FINAL_INTERPOLATION_ORDER), Some("0"));
        self.execute_stage(fixed, moving, parameters)
    }

    /// Run rigid then affine, then remove the intermediate files.
    ///
    /// A failing stage aborts the pipeline and returns its error; whatever
    /// intermediate files exist at that point are removed.
    pub fn start(&mut self) -> Result<()> {
        self.progress.start();

        let stages = self
            .rigid_registration()
            .and_then(|_| self.affine_registration());
        if let Err(err) = stages {
            self.discard_intermediate();
            return Err(err);
        }

        if self.config.keep_intermediate {
            tracing::info!(
                "Keeping intermediate files in {}",
                self.config.work_dir.display()
            );
        } else {
            let timer = Instant::now();
            let cleaned = remove_files(&self.config.work_dir);
            self.report(Stage::Cleanup, cleaned)?;
            self.progress.stage(Stage::Cleanup, timer.elapsed(), None);
        }

        self.progress.complete();
        Ok(())
    }

    /// Write the affine result to `<prefix>_<moving file name>`, beside the
    /// moving image unless an output directory is configured.
    ///
    /// Fails with [`RegistrationError::NoResult`] unless the affine stage
    /// succeeded, so a half-finished pipeline never produces an output.
    pub fn output(&self) -> Result<PathBuf> {
        let timer = Instant::now();
        let image = self
            .engine
            .result_image()
            .filter(|_| self.affine_done)
            .ok_or(RegistrationError::NoResult)?;
        let path = self.config.output_path(&self.moving_img);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_dir(parent)?;
        }
        write_nifti(&path, image).map_err(RegistrationError::image_io)?;
        tracing::info!("Registered image written to {}", path.display());
        self.progress.stage(Stage::Output, timer.elapsed(), None);
        Ok(path)
    }

    /// `start()` followed by `output()`.
    pub fn run(&mut self) -> Result<PathBuf> {
        self.start()?;
        self.output()
    }

    fn discard_intermediate(&self) {
        for path in [
            self.config.temp_image_path(),
            self.config.transform_parameters_path(),
        ] {
            if !path.exists() {
                continue;
            }
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!("Could not remove {}: {}", path.display(), e);
            }
        }
    }
}

/// Delete `r_temp.nii` and `TransformParameters.0.txt` from `work_dir`.
///
/// Both removals are attempted; the first failure is returned.
pub fn remove_files<P: AsRef<Path>>(work_dir: P) -> Result<()> {
    let work_dir = work_dir.as_ref();
    let mut first_error = None;
    for name in [TEMP_IMG, TRANSFORM_PARAMETERS] {
        let path = work_dir.join(name);
        if let Err(e) = std::fs::remove_file(&path) {
            first_error.get_or_insert(RegistrationError::io(
                format!("remove {}", path.display()),
                e,
            ));
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn load_image(path: &Path) -> Result<Image> {
    read_nifti(path).map_err(RegistrationError::image_io)
}

fn ensure_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .map_err(|e| RegistrationError::io(format!("create {}", dir.display()), e))
}
