#![allow(dead_code)]

use ndarray::Array3;
use nireg_core::image::Image;
use nireg_core::spatial::{Direction, Point, Spacing};
use nireg_io::write_nifti;
use nireg_registration::{ParameterMap, RegistrationEngine, RegistrationError, TRANSFORM_PARAMETERS};
use std::path::{Path, PathBuf};

/// Stand-in engine: the "registered" image is the moving image plus one,
/// on the fixed image's grid. Writes a transform file like elastix does.
#[derive(Debug, Default)]
pub struct FakeEngine {
    output_directory: PathBuf,
    fixed: Option<Image>,
    moving: Option<Image>,
    parameters: Option<ParameterMap>,
    result: Option<Image>,
    /// Parameter maps of every execute call, in order.
    pub executed: Vec<ParameterMap>,
    /// Fail the n-th (0-based) execute call.
    pub fail_on_call: Option<usize>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(call: usize) -> Self {
        Self {
            fail_on_call: Some(call),
            ..Self::default()
        }
    }
}

impl RegistrationEngine for FakeEngine {
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

    fn execute(&mut self) -> nireg_registration::Result<()> {
        self.result = None;
        let call = self.executed.len();
        let parameters = self
            .parameters
            .clone()
            .ok_or_else(|| RegistrationError::EngineNotConfigured("parameters".into()))?;
        self.executed.push(parameters.clone());

        std::fs::write(
            self.output_directory.join(TRANSFORM_PARAMETERS),
            parameters.to_elastix_string(),
        )
        .map_err(|e| RegistrationError::io("write transform parameters", e))?;

        if self.fail_on_call == Some(call) {
            return Err(RegistrationError::EngineExecutionFailed {
                status: "exit status: 1".to_string(),
                log_tail: "fake engine failure".to_string(),
            });
        }

        let fixed = self
            .fixed
            .as_ref()
            .ok_or_else(|| RegistrationError::EngineNotConfigured("fixed".into()))?;
        let moving = self
            .moving
            .as_ref()
            .ok_or_else(|| RegistrationError::EngineNotConfigured("moving".into()))?;

        self.result = Some(Image::new(
            moving.data().mapv(|v| v + 1.0),
            *fixed.origin(),
            *fixed.spacing(),
            *fixed.direction(),
        ));
        Ok(())
    }

    fn result_image(&self) -> Option<&Image> {
        self.result.as_ref()
    }
}

/// A small gaussian blob volume centred at `center` (voxel units).
pub fn blob(shape: usize, center: [f32; 3]) -> Image {
    let data = Array3::from_shape_fn((shape, shape, shape), |(x, y, z)| {
        let dx = x as f32 - center[0];
        let dy = y as f32 - center[1];
        let dz = z as f32 - center[2];
        (-(dx * dx + dy * dy + dz * dz) / 8.0).exp() * 100.0
    });
    Image::new(
        data,
        Point::new([0.0, 0.0, 0.0]),
        Spacing::uniform(1.0),
        Direction::identity(),
    )
}

/// Write a blob volume to `dir/name` and return the path.
pub fn write_blob(dir: &Path, name: &str, center: [f32; 3]) -> PathBuf {
    let path = dir.join(name);
    write_nifti(&path, &blob(8, center)).expect("write synthetic volume");
    path
}
