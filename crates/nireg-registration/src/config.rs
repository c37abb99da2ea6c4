//! Pipeline configuration.

use crate::parameters::{ParameterMap, ParameterPreset};
use nireg_core::naming;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Rigid-stage result, consumed as the moving image of the affine stage.
pub const TEMP_IMG: &str = "r_temp.nii";

/// Transform file the engine leaves behind after each execution.
pub const TRANSFORM_PARAMETERS: &str = "TransformParameters.0.txt";

/// Default prefix for the registered output image.
pub const DEFAULT_OUTPUT_PREFIX: &str = "r";

/// Which extension check gates the registration stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionPolicy {
    /// Both images must end in `.nii` or `.nii.gz`.
    #[default]
    Strict,
    /// The historical operator-precedence check, see
    /// [`naming::legacy_extension_check`].
    Legacy,
}

impl ExtensionPolicy {
    pub fn accepts(&self, fixed: &Path, moving: &Path) -> bool {
        match self {
            ExtensionPolicy::Strict => naming::strict_extension_check(fixed, moving),
            ExtensionPolicy::Legacy => naming::legacy_extension_check(fixed, moving),
        }
    }
}

/// Settings for one registration task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Where `r_temp.nii` and `TransformParameters.0.txt` live.
    pub work_dir: PathBuf,
    /// Output directory; `None` writes beside the moving image.
    pub output_dir: Option<PathBuf>,
    pub output_prefix: String,
    pub extension_policy: ExtensionPolicy,
    /// Skip the final cleanup of intermediate files.
    pub keep_intermediate: bool,
    pub rigid_parameters: ParameterMap,
    pub affine_parameters: ParameterMap,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            output_dir: None,
            output_prefix: DEFAULT_OUTPUT_PREFIX.to_string(),
            extension_policy: ExtensionPolicy::default(),
            keep_intermediate: false,
            rigid_parameters: ParameterMap::preset(ParameterPreset::Rigid),
            affine_parameters: ParameterMap::preset(ParameterPreset::Affine),
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn with_output_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.output_prefix = prefix.into();
        self
    }

    pub fn with_extension_policy(mut self, policy: ExtensionPolicy) -> Self {
        self.extension_policy = policy;
        self
    }

    pub fn keep_intermediate(mut self, keep: bool) -> Self {
        self.keep_intermediate = keep;
        self
    }

    pub fn with_rigid_parameters(mut self, parameters: ParameterMap) -> Self {
        self.rigid_parameters = parameters;
        self
    }

    pub fn with_affine_parameters(mut self, parameters: ParameterMap) -> Self {
        self.affine_parameters = parameters;
        self
    }

    pub fn temp_image_path(&self) -> PathBuf {
        self.work_dir.join(TEMP_IMG)
    }

    pub fn transform_parameters_path(&self) -> PathBuf {
        self.work_dir.join(TRANSFORM_PARAMETERS)
    }

    /// Where the registered version of `moving` is written.
    pub fn output_path(&self, moving: &Path) -> PathBuf {
        match &self.output_dir {
            Some(dir) => naming::output_img_in(moving, &self.output_prefix, dir),
            None => naming::output_img(moving, &self.output_prefix),
        }
    }
}
