//! Image volumes with physical metadata.

#[allow(clippy::module_inception)]
pub mod image;

pub use image::Image;
