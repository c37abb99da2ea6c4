//! Rigid-then-affine registration of NIfTI images through an external engine.
//!
//! The registration math is done by elastix; this crate sequences the two
//! stages, moves images between disk and engine, and cleans up after itself.

pub mod config;
pub mod engine;
pub mod error;
pub mod parameters;
pub mod progress;
pub mod registration;

pub use config::{ExtensionPolicy, PipelineConfig, TEMP_IMG, TRANSFORM_PARAMETERS};
pub use engine::{ElastixEngine, RegistrationEngine};
pub use error::{RegistrationError, Result};
pub use parameters::{ParameterMap, ParameterPreset};
pub use progress::{
    ConsoleProgressCallback, HistoryCallback, ProgressCallback, ProgressEvent, ProgressTracker,
    Stage, StageInfo,
};
pub use registration::{remove_files, Registration};
