//! Physical distance between adjacent voxels along each axis.

use super::Vector;

/// Spacing is a vector whose components are the voxel size along each axis.
pub type Spacing<const D: usize> = Vector<D>;

impl<const D: usize> Spacing<D> {
    /// Same spacing along every axis.
    pub fn uniform(value: f64) -> Self {
        Self::new([value; D])
    }
}
