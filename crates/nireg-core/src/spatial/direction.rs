//! Orientation of the image axes in physical space.

use super::Vector;
use nalgebra::SMatrix;
use serde::{Deserialize, Serialize};

/// Direction cosine matrix.
///
/// Column `i` is the physical direction of image axis `i`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Direction<const D: usize>(pub SMatrix<f64, D, D>);

impl<const D: usize> Direction<D> {
    /// No rotation.
    pub fn identity() -> Self {
        Self(SMatrix::identity())
    }

    /// Build from axis direction vectors, one per column.
    pub fn from_axes(axes: [Vector<D>; D]) -> Self {
        let columns: Vec<_> = axes.iter().map(|a| a.0).collect();
        Self(SMatrix::from_columns(&columns))
    }
}
