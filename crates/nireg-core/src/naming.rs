//! File naming conventions for NIfTI inputs and registration outputs.
//!
//! Checks are purely lexical: a path is "NIfTI" when its textual form ends in
//! `.nii` or `.nii.gz`. Nothing here touches the filesystem.

use std::path::{Path, PathBuf};

/// Extensions accepted as NIfTI, longest last.
pub const NIFTI_EXTENSIONS: [&str; 2] = [".nii", ".nii.gz"];

fn ends_with(path: &Path, suffix: &str) -> bool {
    path.to_string_lossy().ends_with(suffix)
}

/// True when `path` ends in `.nii` or `.nii.gz`.
pub fn is_nifti<P: AsRef<Path>>(path: P) -> bool {
    let path = path.as_ref();
    NIFTI_EXTENSIONS.iter().any(|ext| ends_with(path, ext))
}

/// Both inputs must be NIfTI.
pub fn strict_extension_check<P: AsRef<Path>, Q: AsRef<Path>>(fixed: P, moving: Q) -> bool {
    is_nifti(fixed) && is_nifti(moving)
}

/// The historical check, kept bit-for-bit.
///
/// `and` binds tighter than `or`, so this evaluates as
/// `fixed.nii || (fixed.nii.gz && moving.nii) || moving.nii.gz`.
/// It accepts pairs like `("a.nii", "b.txt")` and `("a.txt", "b.nii.gz")`
/// while rejecting `("a.txt", "b.nii")`.
pub fn legacy_extension_check<P: AsRef<Path>, Q: AsRef<Path>>(fixed: P, moving: Q) -> bool {
    let fixed = fixed.as_ref();
    let moving = moving.as_ref();
    ends_with(fixed, ".nii")
        || (ends_with(fixed, ".nii.gz") && ends_with(moving, ".nii"))
        || ends_with(moving, ".nii.gz")
}

/// File name without its NIfTI extension, e.g. `brain` for `/data/brain.nii.gz`.
///
/// Falls back to the full file name for non-NIfTI paths.
pub fn nifti_stem<P: AsRef<Path>>(path: P) -> Option<String> {
    let name = path.as_ref().file_name()?.to_string_lossy().into_owned();
    let stem = NIFTI_EXTENSIONS
        .iter()
        .rev()
        .find_map(|ext| name.strip_suffix(ext))
        .map(str::to_owned)
        .unwrap_or(name);
    Some(stem)
}

/// Output path for a processed image: same directory, file name prefixed.
///
/// `output_img("foo.nii", "r")` is `r_foo.nii`;
/// `output_img("/data/b.nii.gz", "r")` is `/data/r_b.nii.gz`.
pub fn output_img<P: AsRef<Path>>(path: P, prefix: &str) -> PathBuf {
    let path = path.as_ref();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{prefix}_{name}"))
}

/// Like [`output_img`] but placed in `dir` instead of beside the input.
pub fn output_img_in<P: AsRef<Path>, D: AsRef<Path>>(path: P, prefix: &str, dir: D) -> PathBuf {
    let prefixed = output_img(path, prefix);
    match prefixed.file_name() {
        Some(name) => dir.as_ref().join(name),
        None => dir.as_ref().to_path_buf(),
    }
}
