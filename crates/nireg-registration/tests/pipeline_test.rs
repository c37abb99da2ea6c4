mod common;

use common::{write_blob, FakeEngine};
use nireg_io::read_nifti;
use nireg_registration::parameters::FINAL_INTERPOLATION_ORDER;
use nireg_registration::{
    ExtensionPolicy, HistoryCallback, PipelineConfig, ProgressEvent, Registration,
    RegistrationError, Stage, TEMP_IMG, TRANSFORM_PARAMETERS,
};
use std::sync::Arc;
use tempfile::tempdir;

#[test]
fn test_start_then_output_writes_prefixed_image() {
    let data = tempdir().unwrap();
    let work = tempdir().unwrap();
    let fixed = write_blob(data.path(), "fixed.nii", [4.0, 4.0, 4.0]);
    let moving = write_blob(data.path(), "moving.nii.gz", [5.0, 4.0, 4.0]);

    let config = PipelineConfig::new().with_work_dir(work.path());
    let mut task = Registration::with_engine(&fixed, &moving, FakeEngine::new()).with_config(config);

    task.start().expect("pipeline runs");
    let output = task.output().expect("output written");

    assert_eq!(output, data.path().join("r_moving.nii.gz"));
    assert!(output.exists());
    assert!(!work.path().join(TEMP_IMG).exists());
    assert!(!work.path().join(TRANSFORM_PARAMETERS).exists());

    // Each fake stage adds one, so the affine stage must have consumed the
    // rigid result rather than the original moving image.
    let original = read_nifti(&moving).unwrap();
    let registered = read_nifti(&output).unwrap();
    let expected = original.data().mapv(|v| v + 2.0);
    let max_diff = (&expected - registered.data())
        .iter()
        .fold(0.0f32, |acc, v| acc.max(v.abs()));
    assert!(max_diff < 1e-4, "max difference {}", max_diff);
}

#[test]
fn test_stages_use_rigid_then_affine_nearest_neighbour() {
    let data = tempdir().unwrap();
    let fixed = write_blob(data.path(), "fixed.nii", [4.0, 4.0, 4.0]);
    let moving = write_blob(data.path(), "moving.nii", [4.0, 5.0, 4.0]);

    let config = PipelineConfig::new().with_work_dir(data.path());
    let mut task = Registration::with_engine(&fixed, &moving, FakeEngine::new()).with_config(config);
    task.start().unwrap();

    let executed = &task.engine().executed;
    assert_eq!(executed.len(), 2);
    assert_eq!(executed[0].get_value("Transform"), Some("EulerTransform"));
    assert_eq!(executed[0].get_value(FINAL_INTERPOLATION_ORDER), Some("3"));
    assert_eq!(executed[1].get_value("Transform"), Some("AffineTransform"));
    assert_eq!(executed[1].get_value(FINAL_INTERPOLATION_ORDER), Some("0"));
}

#[test]
fn test_invalid_extensions_fail_before_engine_runs() {
    let data = tempdir().unwrap();
    let work = tempdir().unwrap();
    let fixed = data.path().join("fixed.txt");
    let moving = write_blob(data.path(), "moving.nii", [4.0, 4.0, 4.0]);

    let config = PipelineConfig::new().with_work_dir(work.path());
    let mut task = Registration::with_engine(&fixed, &moving, FakeEngine::new()).with_config(config);
    assert!(!task.is_img_nii());

    let err = task.start().unwrap_err();
    assert!(matches!(err, RegistrationError::InvalidExtension { .. }), "{err}");
    assert!(task.engine().executed.is_empty());
    assert!(task.result_image().is_none());

    // Nothing was created, so the strict cleanup still fails the way the
    // unconditional cleanup always did.
    assert!(!work.path().join(TEMP_IMG).exists());
    let cleanup = Registration::remove_files(work.path()).unwrap_err();
    assert!(cleanup.is_not_found());
}

#[test]
fn test_individual_stages_validate_extensions() {
    let mut task = Registration::with_engine("fixed.nii", "moving.txt", FakeEngine::new());
    assert!(matches!(
        task.rigid_registration(),
        Err(RegistrationError::InvalidExtension { .. })
    ));
    assert!(matches!(
        task.affine_registration(),
        Err(RegistrationError::InvalidExtension { .. })
    ));
}

#[test]
fn test_legacy_policy_lets_asymmetric_pair_through_to_io() {
    let data = tempdir().unwrap();
    let fixed = write_blob(data.path(), "fixed.nii", [4.0, 4.0, 4.0]);
    let moving = data.path().join("moving.txt");
    std::fs::write(&moving, b"not an image").unwrap();

    let config = PipelineConfig::new()
        .with_work_dir(data.path())
        .with_extension_policy(ExtensionPolicy::Legacy);
    let mut task = Registration::with_engine(&fixed, &moving, FakeEngine::new()).with_config(config);

    assert!(task.is_img_nii());
    let err = task.start().unwrap_err();
    assert!(matches!(err, RegistrationError::ImageIo(_)), "{err}");
}

#[test]
fn test_engine_failure_cleans_intermediate_files() {
    let data = tempdir().unwrap();
    let work = tempdir().unwrap();
    let fixed = write_blob(data.path(), "fixed.nii", [4.0, 4.0, 4.0]);
    let moving = write_blob(data.path(), "moving.nii", [3.0, 4.0, 4.0]);

    let history = Arc::new(HistoryCallback::new());
    let config = PipelineConfig::new().with_work_dir(work.path());
    let mut task = Registration::with_engine(&fixed, &moving, FakeEngine::failing_on(1))
        .with_config(config)
        .with_progress(history.clone());

    let err = task.start().unwrap_err();
    assert!(matches!(err, RegistrationError::EngineExecutionFailed { .. }));
    assert!(!work.path().join(TEMP_IMG).exists());
    assert!(!work.path().join(TRANSFORM_PARAMETERS).exists());

    assert_eq!(history.completed_stages(), vec![Stage::Rigid]);
    let events = history.get_history();
    assert!(matches!(
        events.last(),
        Some(ProgressEvent::Failed { stage: Stage::Affine, .. })
    ));
}

#[test]
fn test_output_after_failed_affine_stage_has_no_result() {
    let data = tempdir().unwrap();
    let work = tempdir().unwrap();
    let fixed = write_blob(data.path(), "fixed.nii", [4.0, 4.0, 4.0]);
    let moving = write_blob(data.path(), "moving.nii", [3.0, 4.0, 4.0]);

    let config = PipelineConfig::new().with_work_dir(work.path());
    let mut task = Registration::with_engine(&fixed, &moving, FakeEngine::failing_on(1))
        .with_config(config);

    assert!(task.start().is_err());
    assert!(task.result_image().is_none());
    assert!(matches!(task.output(), Err(RegistrationError::NoResult)));
    assert!(!data.path().join("r_moving.nii").exists());
}

#[test]
fn test_output_after_rigid_stage_alone_has_no_result() {
    let data = tempdir().unwrap();
    let fixed = write_blob(data.path(), "fixed.nii", [4.0, 4.0, 4.0]);
    let moving = write_blob(data.path(), "moving.nii", [3.0, 4.0, 4.0]);

    let config = PipelineConfig::new().with_work_dir(data.path());
    let mut task = Registration::with_engine(&fixed, &moving, FakeEngine::new()).with_config(config);

    task.rigid_registration().unwrap();
    assert!(task.result_image().is_some());
    assert!(matches!(task.output(), Err(RegistrationError::NoResult)));

    task.affine_registration().unwrap();
    assert!(task.output().is_ok());
}

#[test]
fn test_keep_intermediate_then_remove_files() {
    let data = tempdir().unwrap();
    let work = tempdir().unwrap();
    let fixed = write_blob(data.path(), "fixed.nii", [4.0, 4.0, 4.0]);
    let moving = write_blob(data.path(), "moving.nii", [4.0, 4.0, 3.0]);

    let config = PipelineConfig::new()
        .with_work_dir(work.path())
        .keep_intermediate(true);
    let mut task = Registration::with_engine(&fixed, &moving, FakeEngine::new()).with_config(config);
    task.start().unwrap();

    assert!(work.path().join(TEMP_IMG).exists());
    assert!(work.path().join(TRANSFORM_PARAMETERS).exists());

    Registration::remove_files(work.path()).expect("both files present");
    assert!(!work.path().join(TEMP_IMG).exists());
    assert!(!work.path().join(TRANSFORM_PARAMETERS).exists());

    assert!(Registration::remove_files(work.path()).is_err());
}

#[test]
fn test_output_directory_and_prefix() {
    let data = tempdir().unwrap();
    let out = tempdir().unwrap();
    let fixed = write_blob(data.path(), "fixed.nii", [4.0, 4.0, 4.0]);
    let moving = write_blob(data.path(), "subject01.nii", [4.0, 4.0, 4.0]);

    let config = PipelineConfig::new()
        .with_work_dir(data.path().join("scratch"))
        .with_output_dir(out.path().join("registered"))
        .with_output_prefix("aligned");
    let mut task = Registration::with_engine(&fixed, &moving, FakeEngine::new()).with_config(config);

    let written = task.run().unwrap();
    assert_eq!(written, out.path().join("registered").join("aligned_subject01.nii"));
    assert!(written.exists());
}

#[test]
fn test_progress_events_for_full_run() {
    let data = tempdir().unwrap();
    let fixed = write_blob(data.path(), "fixed.nii", [4.0, 4.0, 4.0]);
    let moving = write_blob(data.path(), "moving.nii", [4.0, 4.0, 4.0]);

    let history = Arc::new(HistoryCallback::new());
    let config = PipelineConfig::new().with_work_dir(data.path());
    let mut task = Registration::with_engine(&fixed, &moving, FakeEngine::new())
        .with_config(config)
        .with_progress(history.clone());
    task.start().unwrap();

    assert_eq!(
        history.completed_stages(),
        vec![Stage::Rigid, Stage::Affine, Stage::Cleanup]
    );
    let events = history.get_history();
    assert_eq!(events.first(), Some(&ProgressEvent::Started));
    assert_eq!(events.last(), Some(&ProgressEvent::Completed));
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::Started))
            .count(),
        1
    );

    task.output().unwrap();
    assert_eq!(
        history.completed_stages(),
        vec![Stage::Rigid, Stage::Affine, Stage::Cleanup, Stage::Output]
    );
}
