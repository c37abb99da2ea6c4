use anyhow::{bail, Context, Result};
use nalgebra::Vector3 as NaVector3;
use ndarray::{Axis, Ix3};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use nireg_core::image::Image;
use nireg_core::spatial::{Direction, Point, Spacing, Vector};
use std::path::Path;

/// Read a 3-D NIfTI volume (`.nii` or `.nii.gz`) into an [`Image`].
///
/// Geometry comes from the sform when `sform_code > 0`, else from the qform
/// quaternion, else from `pixdim` alone. A 4-D file is accepted only when its
/// fourth axis has length one.
pub fn read_nifti<P: AsRef<Path>>(path: P) -> Result<Image> {
    let path = path.as_ref();
    let obj = ReaderOptions::new()
        .read_file(path)
        .with_context(|| format!("Failed to read NIfTI file {}", path.display()))?;

    let affine = header_affine(obj.header());

    let m = |r: usize, c: usize| affine[r][c] as f64;
    let origin = Point::new([m(0, 3), m(1, 3), m(2, 3)]);

    // Columns of the linear part are spacing-scaled axis directions.
    let columns = [
        NaVector3::new(m(0, 0), m(1, 0), m(2, 0)),
        NaVector3::new(m(0, 1), m(1, 1), m(2, 1)),
        NaVector3::new(m(0, 2), m(1, 2), m(2, 2)),
    ];
    let fallback = [NaVector3::x(), NaVector3::y(), NaVector3::z()];

    let mut spacing = [1.0; 3];
    let mut axes = [Vector::zeros(); 3];
    for i in 0..3 {
        let norm = columns[i].norm();
        if norm > 1e-9 {
            spacing[i] = norm;
            axes[i] = Vector(columns[i] / norm);
        } else {
            axes[i] = Vector(fallback[i]);
        }
    }

    let volume = obj
        .into_volume()
        .into_ndarray::<f32>()
        .context("Failed to convert volume to ndarray")?;

    let volume = match volume.ndim() {
        3 => volume,
        4 if volume.shape()[3] == 1 => volume.index_axis_move(Axis(3), 0),
        n => bail!("Expected 3D NIfTI file, found {} dimensions", n),
    };

    let data = volume
        .into_dimensionality::<Ix3>()
        .context("Failed to reshape volume to 3D")?;

    tracing::debug!(
        "Read {} with shape {:?}, spacing {:?}",
        path.display(),
        data.shape(),
        spacing
    );

    Ok(Image::new(
        data,
        origin,
        Spacing::new(spacing),
        Direction::from_axes(axes),
    ))
}

/// Row-major 4x4 voxel-to-physical affine from a NIfTI header.
fn header_affine(header: &NiftiHeader) -> [[f32; 4]; 4] {
    if header.sform_code > 0 {
        return [
            header.srow_x,
            header.srow_y,
            header.srow_z,
            [0.0, 0.0, 0.0, 1.0],
        ];
    }

    if header.qform_code > 0 {
        let b = header.quatern_b;
        let c = header.quatern_c;
        let d = header.quatern_d;
        let a = (1.0 - (b * b + c * c + d * d).min(1.0)).sqrt();

        let qfac = if header.pixdim[0] == 0.0 { 1.0 } else { header.pixdim[0] };
        let dx = header.pixdim[1];
        let dy = header.pixdim[2];
        let dz = header.pixdim[3] * qfac;

        let r11 = a * a + b * b - c * c - d * d;
        let r12 = 2.0 * b * c - 2.0 * a * d;
        let r13 = 2.0 * b * d + 2.0 * a * c;
        let r21 = 2.0 * b * c + 2.0 * a * d;
        let r22 = a * a + c * c - b * b - d * d;
        let r23 = 2.0 * c * d - 2.0 * a * b;
        let r31 = 2.0 * b * d - 2.0 * a * c;
        let r32 = 2.0 * c * d + 2.0 * a * b;
        let r33 = a * a + d * d - c * c - b * b;

        return [
            [r11 * dx, r12 * dy, r13 * dz, header.quatern_x],
            [r21 * dx, r22 * dy, r23 * dz, header.quatern_y],
            [r31 * dx, r32 * dy, r33 * dz, header.quatern_z],
            [0.0, 0.0, 0.0, 1.0],
        ];
    }

    let dx = header.pixdim[1];
    let dy = header.pixdim[2];
    let dz = header.pixdim[3];
    [
        [dx, 0.0, 0.0, 0.0],
        [0.0, dy, 0.0, 0.0],
        [0.0, 0.0, dz, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]
}

/// Write an image to a NIfTI file as `f32` voxels.
///
/// Spacing goes to `pixdim`, the full geometry to the sform rows. The file is
/// gzip-compressed when the path ends in `.gz`.
pub fn write_nifti<P: AsRef<Path>>(path: P, image: &Image) -> Result<()> {
    let path = path.as_ref();
    let header = geometry_header(image);

    WriterOptions::new(path)
        .reference_header(&header)
        .write_nifti(image.data())
        .with_context(|| format!("Failed to write NIfTI file {}", path.display()))?;

    tracing::debug!("Wrote {} with shape {:?}", path.display(), image.shape());
    Ok(())
}

fn geometry_header(image: &Image) -> NiftiHeader {
    let affine = image.index_to_physical_matrix();
    let row = |r: usize| {
        [
            affine[(r, 0)] as f32,
            affine[(r, 1)] as f32,
            affine[(r, 2)] as f32,
            affine[(r, 3)] as f32,
        ]
    };

    let spacing = image.spacing();
    let mut pixdim = [1.0f32; 8];
    pixdim[1] = spacing[0] as f32;
    pixdim[2] = spacing[1] as f32;
    pixdim[3] = spacing[2] as f32;

    // Right-handed frames keep qfac = 1; left-handed ones flip z.
    let det = image.direction().0.determinant();
    pixdim[0] = if det < 0.0 { -1.0 } else { 1.0 };

    NiftiHeader {
        pixdim,
        sform_code: 1,
        qform_code: 0,
        srow_x: row(0),
        srow_y: row(1),
        srow_z: row(2),
        ..NiftiHeader::default()
    }
}
