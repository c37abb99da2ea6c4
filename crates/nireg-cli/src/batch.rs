//! Many moving images against one fixed image.
//!
//! Every task gets its own engine and its own scratch work directory, so the
//! `r_temp.nii`/`TransformParameters.0.txt` names never collide between
//! parallel tasks.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use nireg_core::naming;
use nireg_registration::{PipelineConfig, Registration, RegistrationEngine, RegistrationError};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Worker threads; `None` uses rayon's default.
    pub jobs: Option<usize>,
    pub output_dir: Option<PathBuf>,
    pub prefix: String,
    pub elastix: Option<PathBuf>,
}

#[derive(Debug)]
pub struct BatchOutcome {
    pub moving: PathBuf,
    pub result: std::result::Result<PathBuf, RegistrationError>,
}

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub outcomes: Vec<BatchOutcome>,
}

impl BatchSummary {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &BatchOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = &BatchOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }
}

/// NIfTI files under `dir`, sorted, excluding the fixed image and anything
/// that already carries the output prefix.
pub fn find_moving_images(dir: &Path, fixed: &Path, prefix: &str) -> Vec<PathBuf> {
    let fixed = fixed.canonicalize().unwrap_or_else(|_| fixed.to_path_buf());
    let output_marker = format!("{}_", prefix);

    let mut images: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| naming::is_nifti(p))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| !n.starts_with(&output_marker))
                .unwrap_or(false)
        })
        .filter(|p| p.canonicalize().map(|c| c != fixed).unwrap_or(true))
        .collect();
    images.sort();
    images
}

/// Where the result for `moving` goes under `output_dir`.
///
/// The image's subdirectory relative to `moving_dir` is recreated, so
/// `s1/t1.nii` and `s2/t1.nii` land in `out/s1` and `out/s2`.
pub fn task_output_dir(output_dir: &Path, moving_dir: &Path, moving: &Path) -> PathBuf {
    let relative = moving
        .parent()
        .and_then(|parent| parent.strip_prefix(moving_dir).ok())
        .unwrap_or_else(|| Path::new(""));
    output_dir.join(relative)
}

/// Register every moving image found under `moving_dir` onto `fixed`.
///
/// Failures are collected per image; the returned error is reserved for
/// problems that stop the batch as a whole.
pub fn run_batch<E, F>(
    fixed: &Path,
    moving_dir: &Path,
    options: &BatchOptions,
    make_engine: F,
) -> Result<BatchSummary>
where
    E: RegistrationEngine,
    F: Fn() -> E + Sync,
{
    if !moving_dir.is_dir() {
        anyhow::bail!("Not a directory: {}", moving_dir.display());
    }

    let images = find_moving_images(moving_dir, fixed, &options.prefix);
    tracing::info!(
        "Registering {} images from {} onto {}",
        images.len(),
        moving_dir.display(),
        fixed.display()
    );
    if images.is_empty() {
        return Ok(BatchSummary::default());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.jobs.unwrap_or(0))
        .build()
        .context("Failed to build worker pool")?;

    let pb = ProgressBar::new(images.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let outcomes = pool.install(|| {
        images
            .par_iter()
            .map(|moving| {
                let result = register_one(fixed, moving_dir, moving, options, make_engine());
                pb.inc(1);
                BatchOutcome {
                    moving: moving.clone(),
                    result,
                }
            })
            .collect::<Vec<_>>()
    });
    pb.finish_with_message("done");

    Ok(BatchSummary { outcomes })
}

fn register_one<E: RegistrationEngine>(
    fixed: &Path,
    moving_dir: &Path,
    moving: &Path,
    options: &BatchOptions,
    engine: E,
) -> std::result::Result<PathBuf, RegistrationError> {
    let work = tempfile::Builder::new()
        .prefix("nireg-task-")
        .tempdir()
        .map_err(|e| RegistrationError::io("create task work directory", e))?;

    let mut config = PipelineConfig::new()
        .with_work_dir(work.path())
        .with_output_prefix(&options.prefix);
    if let Some(dir) = &options.output_dir {
        config = config.with_output_dir(task_output_dir(dir, moving_dir, moving));
    }

    Registration::with_engine(fixed, moving, engine)
        .with_config(config)
        .run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use nireg_core::image::Image;
    use nireg_io::write_nifti;
    use nireg_registration::ElastixEngine;
    use tempfile::tempdir;

    fn write_volume(path: &Path) {
        write_nifti(path, &Image::from_data(Array3::zeros((2, 2, 2)))).unwrap();
    }

    #[test]
    fn test_find_moving_images() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("sub");
        std::fs::create_dir_all(&nested).unwrap();

        let fixed = dir.path().join("fixed.nii");
        write_volume(&fixed);
        write_volume(&dir.path().join("b.nii.gz"));
        write_volume(&nested.join("a.nii"));
        write_volume(&dir.path().join("r_b.nii.gz"));
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let found = find_moving_images(dir.path(), &fixed, "r");
        assert_eq!(found, vec![dir.path().join("b.nii.gz"), nested.join("a.nii")]);
    }

    #[test]
    fn test_same_name_in_subdirectories_gets_distinct_outputs() {
        let dir = tempdir().unwrap();
        let out = tempdir().unwrap();
        for sub in ["s1", "s2"] {
            std::fs::create_dir_all(dir.path().join(sub)).unwrap();
            write_volume(&dir.path().join(sub).join("t1.nii"));
        }
        let fixed = dir.path().join("fixed.nii");
        write_volume(&fixed);

        let outputs: Vec<PathBuf> = find_moving_images(dir.path(), &fixed, "r")
            .iter()
            .map(|moving| {
                PipelineConfig::new()
                    .with_output_dir(task_output_dir(out.path(), dir.path(), moving))
                    .output_path(moving)
            })
            .collect();

        assert_eq!(
            outputs,
            vec![
                out.path().join("s1").join("r_t1.nii"),
                out.path().join("s2").join("r_t1.nii"),
            ]
        );
    }

    #[test]
    fn test_task_output_dir_top_level() {
        let out = task_output_dir(Path::new("/out"), Path::new("/scans"), Path::new("/scans/a.nii"));
        assert_eq!(out, PathBuf::from("/out"));
    }

    #[test]
    fn test_batch_collects_failures() {
        let dir = tempdir().unwrap();
        let fixed = dir.path().join("fixed.nii");
        write_volume(&fixed);
        write_volume(&dir.path().join("one.nii"));
        write_volume(&dir.path().join("two.nii"));

        let options = BatchOptions {
            jobs: Some(2),
            output_dir: None,
            prefix: "r".to_string(),
            elastix: None,
        };
        let summary = run_batch(&fixed, dir.path(), &options, || {
            ElastixEngine::with_binary("/nonexistent/bin/elastix-nireg-test")
        })
        .unwrap();

        assert_eq!(summary.len(), 2);
        assert_eq!(summary.failed().count(), 2);
        for outcome in summary.failed() {
            assert!(matches!(
                outcome.result,
                Err(RegistrationError::EngineNotFound { .. })
            ));
        }
        assert!(!dir.path().join("r_one.nii").exists());
    }

    #[test]
    fn test_batch_rejects_missing_directory() {
        let options = BatchOptions {
            jobs: None,
            output_dir: None,
            prefix: "r".to_string(),
            elastix: None,
        };
        let result = run_batch(
            Path::new("fixed.nii"),
            Path::new("/nonexistent/nireg-batch"),
            &options,
            ElastixEngine::new,
        );
        assert!(result.is_err());
    }
}
