pub mod image;
pub mod naming;
pub mod spatial;

pub use image::Image;
pub use naming::{is_nifti, output_img, NIFTI_EXTENSIONS};
pub use spatial::{Direction, Point, Spacing, Vector};
