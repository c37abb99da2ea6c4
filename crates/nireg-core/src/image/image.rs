//! Image type with physical metadata and index/physical mapping.

use crate::spatial::{Direction, Point, Spacing};
use nalgebra::{Matrix3, Matrix4, Vector3 as NaVector3};
use ndarray::Array3;

/// A 3-D scalar volume with physical metadata.
///
/// Voxels are stored in NIfTI axis order, so `data[[i, j, k]]` is the voxel at
/// index `(x=i, y=j, z=k)`.
///
/// # Coordinate Systems
/// * **Index Space**: voxel indices, possibly fractional
/// * **Physical Space**: millimetres, `P = origin + direction * diag(spacing) * I`
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    data: Array3<f32>,
    /// Physical coordinate of voxel (0, 0, 0).
    origin: Point<3>,
    spacing: Spacing<3>,
    direction: Direction<3>,
}

impl Image {
    /// Create a new image with the given data and metadata.
    pub fn new(
        data: Array3<f32>,
        origin: Point<3>,
        spacing: Spacing<3>,
        direction: Direction<3>,
    ) -> Self {
        Self {
            data,
            origin,
            spacing,
            direction,
        }
    }

    /// Unit spacing, zero origin, identity direction.
    pub fn from_data(data: Array3<f32>) -> Self {
        Self::new(data, Point::origin(), Spacing::uniform(1.0), Direction::identity())
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn origin(&self) -> &Point<3> {
        &self.origin
    }

    pub fn spacing(&self) -> &Spacing<3> {
        &self.spacing
    }

    pub fn direction(&self) -> &Direction<3> {
        &self.direction
    }

    /// Shape as `[nx, ny, nz]`.
    pub fn shape(&self) -> [usize; 3] {
        let s = self.data.shape();
        [s[0], s[1], s[2]]
    }

    /// True when shape, origin, spacing and direction all agree within `tol`.
    pub fn same_geometry(&self, other: &Image, tol: f64) -> bool {
        self.shape() == other.shape()
            && (self.origin - other.origin).norm() <= tol
            && (self.spacing - other.spacing).norm() <= tol
            && (self.direction.0 - other.direction.0).abs().max() <= tol
    }

    /// The 4x4 voxel-to-physical matrix (`direction * diag(spacing)` plus origin).
    ///
    /// This is what NIfTI stores in its sform rows.
    pub fn index_to_physical_matrix(&self) -> Matrix4<f64> {
        let scale = Matrix3::from_diagonal(&NaVector3::new(
            self.spacing[0],
            self.spacing[1],
            self.spacing[2],
        ));
        let linear = self.direction.0 * scale;
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(&linear);
        m[(0, 3)] = self.origin[0];
        m[(1, 3)] = self.origin[1];
        m[(2, 3)] = self.origin[2];
        m
    }
}
