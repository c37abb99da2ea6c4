//! The external registration engine seam.
//!
//! The pipeline never does registration math itself. It drives an engine
//! through this contract: set the fixed and moving images, set a parameter
//! map, execute, read back the result image. Each [`Registration`] owns its
//! engine, so two tasks never share engine state.
//!
//! [`Registration`]: crate::registration::Registration

mod elastix;

pub use elastix::{ElastixEngine, ELASTIX_PATH_ENV};

use crate::error::Result;
use crate::parameters::ParameterMap;
use nireg_core::image::Image;
use std::path::Path;

/// Contract of an external image registration engine.
pub trait RegistrationEngine {
    /// Image that stays put.
    fn set_fixed_image(&mut self, image: Image);

    /// Image that is resampled onto the fixed image.
    fn set_moving_image(&mut self, image: Image);

    /// Parameters for the next [`execute`](Self::execute).
    fn set_parameter_map(&mut self, parameters: ParameterMap);

    /// Directory receiving the engine's side-effect files, notably
    /// `TransformParameters.0.txt`.
    fn set_output_directory(&mut self, dir: &Path);

    /// Run the registration. Blocks until the engine returns.
    fn execute(&mut self) -> Result<()>;

    /// The resampled moving image from the last `execute`; `None` if that
    /// call failed.
    fn result_image(&self) -> Option<&Image>;
}

impl<E: RegistrationEngine + ?Sized> RegistrationEngine for Box<E> {
    fn set_fixed_image(&mut self, image: Image) {
        (**self).set_fixed_image(image)
    }

    fn set_moving_image(&mut self, image: Image) {
        (**self).set_moving_image(image)
    }

    fn set_parameter_map(&mut self, parameters: ParameterMap) {
        (**self).set_parameter_map(parameters)
    }

    fn set_output_directory(&mut self, dir: &Path) {
        (**self).set_output_directory(dir)
    }

    fn execute(&mut self) -> Result<()> {
        (**self).execute()
    }

    fn result_image(&self) -> Option<&Image> {
        (**self).result_image()
    }
}
