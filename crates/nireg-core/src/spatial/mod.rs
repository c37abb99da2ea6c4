//! Spatial types describing where voxels sit in physical space.
//!
//! All types wrap nalgebra so callers can drop down to plain linear algebra
//! whenever they need to.

pub mod direction;
pub mod point;
pub mod spacing;
pub mod vector;

pub use direction::Direction;
pub use point::Point;
pub use spacing::Spacing;
pub use vector::Vector;
