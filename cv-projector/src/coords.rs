use crate::{ProjectionError, Result};
use ndarray::{Array3, ArrayView3, Zip};

/// Maps a pixel coordinate into `[-1, 1]`.
///
/// The outermost pixel centers land exactly on `-1` and `1`, which is the
/// convention used by [`grid_sample`](crate::grid_sample). `extent` is the
/// number of pixels along the axis.
#[inline]
pub fn normalize_coordinate(pixel: f32, extent: usize) -> f32 {
    pixel * 2.0 / (extent as f32 - 1.0) - 1.0
}

/// Inverse of [`normalize_coordinate`].
#[inline]
pub fn denormalize_coordinate(normalized: f32, extent: usize) -> f32 {
    (normalized + 1.0) * 0.5 * (extent as f32 - 1.0)
}

pub(crate) fn check_extent(height: usize, width: usize) -> Result<()> {
    if height < 2 || width < 2 {
        return Err(ProjectionError::ImageTooSmall { height, width });
    }
    Ok(())
}

/// Normalizes `(.., .., 2)` pixel coordinates laid out as `(x, y)`.
pub fn normalize_pixel_coordinates(
    pixels: ArrayView3<f32>,
    height: usize,
    width: usize,
) -> Result<Array3<f32>> {
    check_extent(height, width)?;
    map_xy(pixels, |x, y| {
        (normalize_coordinate(x, width), normalize_coordinate(y, height))
    })
}

/// Denormalizes `(.., .., 2)` coordinates laid out as `(x, y)` back into pixels.
pub fn denormalize_pixel_coordinates(
    points: ArrayView3<f32>,
    height: usize,
    width: usize,
) -> Result<Array3<f32>> {
    check_extent(height, width)?;
    map_xy(points, |x, y| {
        (
            denormalize_coordinate(x, width),
            denormalize_coordinate(y, height),
        )
    })
}

fn map_xy(points: ArrayView3<f32>, f: impl Fn(f32, f32) -> (f32, f32)) -> Result<Array3<f32>> {
    if points.dim().2 != 2 {
        return Err(ProjectionError::Shape {
            what: "coordinates",
            expected: "(batch, points, 2)",
            actual: points.shape().to_vec(),
        });
    }
    let mut out = Array3::zeros(points.dim());
    Zip::from(out.rows_mut())
        .and(points.rows())
        .for_each(|mut out, point| {
            let (x, y) = f(point[0], point[1]);
            out[0] = x;
            out[1] = y;
        });
    Ok(out)
}
