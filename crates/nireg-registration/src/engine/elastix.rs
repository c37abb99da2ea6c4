use super::RegistrationEngine;
use crate::config::TRANSFORM_PARAMETERS;
use crate::error::{RegistrationError, Result};
use crate::parameters::ParameterMap;
use nireg_core::image::Image;
use nireg_io::{read_nifti, write_nifti};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::Instant;

/// Environment variable overriding the elastix binary location.
pub const ELASTIX_PATH_ENV: &str = "ELASTIX_PATH";

const RESULT_IMAGE: &str = "result.0.nii";
const LOG_TAIL_LINES: usize = 20;

/// Engine backed by the `elastix` command-line program.
///
/// Each `execute` stages the images and parameter file in a fresh scratch
/// directory, runs elastix there, loads `result.0.nii` back and copies
/// `TransformParameters.0.txt` into the output directory.
#[derive(Debug)]
pub struct ElastixEngine {
    binary: PathBuf,
    output_directory: PathBuf,
    fixed: Option<Image>,
    moving: Option<Image>,
    parameters: Option<ParameterMap>,
    result: Option<Image>,
}

impl Default for ElastixEngine {
    fn default() -> Self {
        let binary = std::env::var_os(ELASTIX_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("elastix"));
        Self::with_binary(binary)
    }
}

impl ElastixEngine {
    /// Engine using `$ELASTIX_PATH`, or `elastix` from `PATH`.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            output_directory: PathBuf::from("."),
            fixed: None,
            moving: None,
            parameters: None,
            result: None,
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn output_directory(&self) -> &Path {
        &self.output_directory
    }

    /// Parameters as actually handed to elastix: the caller's map plus the
    /// keys the command-line tool needs but SimpleElastix fills implicitly.
    fn effective_parameters(parameters: &ParameterMap) -> ParameterMap {
        let mut map = parameters.clone();
        map.set_default("FixedImageDimension", "3");
        map.set_default("MovingImageDimension", "3");
        map.set_default("FixedInternalImagePixelType", "float");
        map.set_default("MovingInternalImagePixelType", "float");
        map.set_default("UseDirectionCosines", "true");
        map.set_default("HowToCombineTransforms", "Compose");
        // The result is read back, so these are not negotiable.
        map.set_value("WriteResultImage", "true");
        map.set_value("ResultImageFormat", "nii");
        map.set_value("ResultImagePixelType", "float");
        map
    }

    fn run(&self, scratch: &Path, parameter_file: &Path) -> Result<Output> {
        let mut command = Command::new(&self.binary);
        command
            .arg("-f")
            .arg(scratch.join("fixed.nii"))
            .arg("-m")
            .arg(scratch.join("moving.nii"))
            .arg("-p")
            .arg(parameter_file)
            .arg("-out")
            .arg(scratch);

        tracing::debug!("Running {:?}", command);

        command.output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RegistrationError::EngineNotFound {
                    binary: self.binary.clone(),
                }
            } else {
                RegistrationError::io(format!("spawn {}", self.binary.display()), e)
            }
        })
    }
}

impl RegistrationEngine for ElastixEngine {
    fn set_fixed_image(&mut self, image: Image) {
        self.fixed = Some(image);
    }

    fn set_moving_image(&mut self, image: Image) {
        self.moving = Some(image);
    }

    fn set_parameter_map(&mut self, parameters: ParameterMap) {
        self.parameters = Some(parameters);
    }

    fn set_output_directory(&mut self, dir: &Path) {
        self.output_directory = dir.to_path_buf();
    }

    fn execute(&mut self) -> Result<()> {
        self.result = None;
        let fixed = self
            .fixed
            .as_ref()
            .ok_or_else(|| RegistrationError::EngineNotConfigured("fixed image not set".into()))?;
        let moving = self
            .moving
            .as_ref()
            .ok_or_else(|| RegistrationError::EngineNotConfigured("moving image not set".into()))?;
        let parameters = self
            .parameters
            .as_ref()
            .ok_or_else(|| RegistrationError::EngineNotConfigured("parameter map not set".into()))?;

        let start = Instant::now();
        let scratch = tempfile::Builder::new()
            .prefix("nireg-elastix-")
            .tempdir()
            .map_err(|e| RegistrationError::io("create elastix scratch directory", e))?;

        write_nifti(scratch.path().join("fixed.nii"), fixed).map_err(RegistrationError::image_io)?;
        write_nifti(scratch.path().join("moving.nii"), moving).map_err(RegistrationError::image_io)?;

        let parameter_file = scratch.path().join("parameters.txt");
        Self::effective_parameters(parameters).write_file(&parameter_file)?;

        let output = self.run(scratch.path(), &parameter_file)?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stdout.lines().chain(stderr.lines()) {
            tracing::debug!(target: "elastix", "{}", line);
        }

        if !output.status.success() {
            let combined = format!("{}{}", stdout, stderr);
            return Err(RegistrationError::EngineExecutionFailed {
                status: output.status.to_string(),
                log_tail: log_tail(&combined, LOG_TAIL_LINES),
            });
        }

        let result_path = scratch.path().join(RESULT_IMAGE);
        if !result_path.exists() {
            return Err(RegistrationError::MissingEngineOutput(result_path));
        }
        let result = read_nifti(&result_path).map_err(RegistrationError::image_io)?;

        let transform_src = scratch.path().join(TRANSFORM_PARAMETERS);
        if !transform_src.exists() {
            return Err(RegistrationError::MissingEngineOutput(transform_src));
        }
        std::fs::create_dir_all(&self.output_directory).map_err(|e| {
            RegistrationError::io(format!("create {}", self.output_directory.display()), e)
        })?;
        let transform_dst = self.output_directory.join(TRANSFORM_PARAMETERS);
        std::fs::copy(&transform_src, &transform_dst)
            .map_err(|e| RegistrationError::io(format!("copy {}", transform_dst.display()), e))?;

        tracing::info!(
            "elastix finished in {:.2}s ({})",
            start.elapsed().as_secs_f64(),
            parameters.get_value("Transform").unwrap_or("unknown transform")
        );

        self.result = Some(result);
        Ok(())
    }

    fn result_image(&self) -> Option<&Image> {
        self.result.as_ref()
    }
}

fn log_tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}
