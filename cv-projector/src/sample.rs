use crate::coords::denormalize_coordinate;
use crate::{ProjectionError, Result};
use ndarray::{Array2, Array3, ArrayView2, ArrayView3, ArrayView4, Axis};

/// Bilinearly samples a single-channel `(H, W)` map at a normalized `(x, y)`.
///
/// Neighbours that fall outside the map contribute zero, so samples taken
/// beyond the border fade to zero instead of clamping to the edge value.
pub fn sample_bilinear(map: ArrayView2<f32>, x: f32, y: f32) -> f32 {
    let (height, width) = map.dim();
    let px = denormalize_coordinate(x, width);
    let py = denormalize_coordinate(y, height);
    if !px.is_finite() || !py.is_finite() {
        return 0.0;
    }
    let x0 = px.floor();
    let y0 = py.floor();
    let wx = px - x0;
    let wy = py - y0;
    let (x0, y0) = (x0 as isize, y0 as isize);
    let fetch = |x: isize, y: isize| -> f32 {
        if x < 0 || y < 0 || x >= width as isize || y >= height as isize {
            0.0
        } else {
            map[(y as usize, x as usize)]
        }
    };
    fetch(x0, y0) * (1.0 - wx) * (1.0 - wy)
        + fetch(x0 + 1, y0) * wx * (1.0 - wy)
        + fetch(x0, y0 + 1) * (1.0 - wx) * wy
        + fetch(x0 + 1, y0 + 1) * wx * wy
}

/// Samples a `(C, H, W)` feature map at `(N, 2)` normalized points, producing `(N, C)`.
pub fn grid_sample(features: ArrayView3<f32>, points: ArrayView2<f32>) -> Result<Array2<f32>> {
    if points.dim().1 != 2 {
        return Err(ProjectionError::Shape {
            what: "sample points",
            expected: "(points, 2)",
            actual: points.shape().to_vec(),
        });
    }
    let channels = features.dim().0;
    let mut out = Array2::zeros((points.dim().0, channels));
    for (mut row, point) in out.outer_iter_mut().zip(points.outer_iter()) {
        for (value, channel) in row.iter_mut().zip(features.outer_iter()) {
            *value = sample_bilinear(channel, point[0], point[1]);
        }
    }
    Ok(out)
}

/// Batched [`grid_sample`]: `(B, C, H, W)` maps at `(B, N, 2)` points give `(B, N, C)`.
pub fn grid_sample_batch(
    features: ArrayView4<f32>,
    points: ArrayView3<f32>,
) -> Result<Array3<f32>> {
    let (batch, channels, _, _) = features.dim();
    if points.dim().0 != batch {
        return Err(ProjectionError::BatchMismatch {
            what: "sample points",
            expected: batch,
            actual: points.dim().0,
        });
    }
    let mut out = Array3::zeros((batch, points.dim().1, channels));
    for ((mut out, features), points) in out
        .outer_iter_mut()
        .zip(features.outer_iter())
        .zip(points.outer_iter())
    {
        out.assign(&grid_sample(features, points)?);
    }
    Ok(out)
}

/// Samples each `(H, W)` map of a `(B, H, W)` stack at its own `(B, N, 2)` points.
pub fn sample_maps(maps: ArrayView3<f32>, points: ArrayView3<f32>) -> Result<Array2<f32>> {
    let features = maps.insert_axis(Axis(1));
    let sampled = grid_sample_batch(features, points)?;
    Ok(sampled.index_axis_move(Axis(2), 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    #[test]
    fn pixel_centers_are_exact() {
        let map = Array2::from_shape_fn((4, 5), |(y, x)| (y * 5 + x) as f32);
        // Normalized coordinates of pixel (3, 2) on a 5x4 map.
        let x = 3.0 * 2.0 / 4.0 - 1.0;
        let y = 2.0 * 2.0 / 3.0 - 1.0;
        assert!((sample_bilinear(map.view(), x, y) - 13.0).abs() < 1e-5);
    }

    #[test]
    fn midpoint_interpolates() {
        let map = array![[0.0f32, 2.0], [4.0, 6.0]];
        assert!((sample_bilinear(map.view(), 0.0, 0.0) - 3.0).abs() < 1e-6);
    }

    #[test]
    fn outside_fades_to_zero() {
        let map = Array2::from_elem((3, 3), 1.0f32);
        assert_eq!(sample_bilinear(map.view(), 3.0, 0.0), 0.0);
        assert_eq!(sample_bilinear(map.view(), f32::NAN, 0.0), 0.0);
    }

    #[test]
    fn multi_channel_layout() {
        let features = ndarray::Array3::from_shape_fn((2, 3, 3), |(c, _, _)| c as f32 + 1.0);
        let points = array![[0.0f32, 0.0], [-1.0, 1.0]];
        let sampled = grid_sample(features.view(), points.view()).unwrap();
        assert_eq!(sampled, array![[1.0f32, 2.0], [1.0, 2.0]]);
    }
}
