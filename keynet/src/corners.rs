use crate::config::ScoreLossConfig;
use crate::derivatives::{sobel_horizontal, sobel_vertical};
use crate::error::{shape_error, Result};
use crate::extractor::index_to_point;
use crate::image::{gaussian_blur, GrayFloatImage};
use crate::nms::{nms2d, patch_max, top_k};
use cv_projector::{denormalize_coordinate, CameraIntrinsics, CameraToWorld, Projector};
use log::*;
use ndarray::{azip, s, Array2, Array3, ArrayView2, ArrayView3, ArrayView4, Axis};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Classical corners detected in every image of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Corners {
    /// `(B, N, 2)` normalized `(x, y)` locations
    pub points: Array3<f32>,
    /// `(B, N)` corner responses
    pub values: Array2<f32>,
}

/// Shi-Tomasi "good features to track" response: the smaller eigenvalue of the
/// Gaussian-smoothed structure tensor.
pub fn gftt_response(image: ArrayView2<f32>, blur_sigma: f32, blur_size: usize) -> Array2<f32> {
    let dx = sobel_horizontal(image);
    let dy = sobel_vertical(image);
    let dx2 = gaussian_blur((&dx * &dx).view(), blur_sigma, blur_size);
    let dy2 = gaussian_blur((&dy * &dy).view(), blur_sigma, blur_size);
    let dxy = gaussian_blur((&dx * &dy).view(), blur_sigma, blur_size);
    let mut response = Array2::zeros(image.dim());
    azip!((r in &mut response, &xx in &dx2, &yy in &dy2, &xy in &dxy) {
        let trace = xx + yy;
        let det = xx * yy - xy * xy;
        let root = (trace * trace - 4.0 * det).abs().sqrt();
        *r = 0.5 * (trace - root);
    });
    response
}

/// Finds the `num_corners` strongest corners of one grayscale image, at most
/// one per `radius`×`radius` patch.
fn image_corners(image: &GrayFloatImage, config: &ScoreLossConfig) -> Result<Vec<(usize, f32)>> {
    trace!("Corner response of a {} x {} image", image.width(), image.height());
    let response = gftt_response(image.view(), config.blur_sigma, config.blur_size);
    let suppressed = nms2d(response.view(), config.nms_window);
    let kept = patch_max(suppressed.view(), config.radius);
    let flat: Vec<f32> = kept.iter().copied().collect();
    top_k(&flat, config.num_corners, "corners")
}

/// Detects corners in a `(B, 3, H, W)` batch of RGB images.
pub fn detect_corners(images: ArrayView4<f32>, config: &ScoreLossConfig) -> Result<Corners> {
    config.validate()?;
    let (batch, channels, height, width) = images.dim();
    if channels != 3 || height < 2 || width < 2 {
        return Err(shape_error("images", "(B, 3, H >= 2, W >= 2)", images.shape()));
    }
    let grays: Vec<GrayFloatImage> = images
        .outer_iter()
        .map(GrayFloatImage::from_rgb)
        .collect();
    #[cfg(not(feature = "rayon"))]
    let detections = grays
        .iter()
        .map(|gray| image_corners(gray, config))
        .collect::<Result<Vec<_>>>()?;
    #[cfg(feature = "rayon")]
    let detections = grays
        .par_iter()
        .map(|gray| image_corners(gray, config))
        .collect::<Result<Vec<_>>>()?;

    let n = config.num_corners;
    let mut points = Array3::zeros((batch, n, 2));
    let mut values = Array2::zeros((batch, n));
    for (b, corners) in detections.into_iter().enumerate() {
        for (i, (index, value)) in corners.into_iter().enumerate() {
            let (x, y) = index_to_point(index, height, width);
            points[[b, i, 0]] = x;
            points[[b, i, 1]] = y;
            values[[b, i]] = value;
        }
    }
    debug!("Detected {} corners in each of {} images", n, batch);
    Ok(Corners { points, values })
}

/// Labels each image with its own corners.
///
/// The result is a `(B, H, W)` map of zeros and ones.
pub fn label_corners_single_view(images: ArrayView4<f32>, config: &ScoreLossConfig) -> Result<Array3<f32>> {
    let (batch, _, height, width) = images.dim();
    let corners = detect_corners(images, config)?;
    let mut target = Array3::zeros((batch, height, width));
    for b in 0..batch {
        for (point, &value) in corners
            .points
            .index_axis(Axis(0), b)
            .outer_iter()
            .zip(corners.values.index_axis(Axis(0), b))
        {
            if let Some((x, y)) = to_pixel(point[0], point[1], height, width) {
                splat(&mut target, b, y, x, value);
            }
        }
    }
    Ok(binarize(target.view(), config.nms_window))
}

/// Labels each image with the corners of every image of the batch.
///
/// Corners are lifted with each image's depth and pose and projected into
/// every other image; those that stay in view mark the pixel they land on.
pub fn label_corners_fused<P: Projector + ?Sized>(
    images: ArrayView4<f32>,
    depth: ArrayView3<f32>,
    poses: &[CameraToWorld],
    intrinsics: &[CameraIntrinsics],
    projector: &P,
    config: &ScoreLossConfig,
) -> Result<Array3<f32>> {
    let (batch, _, height, width) = images.dim();
    if depth.dim() != (batch, height, width) {
        return Err(shape_error(
            "depth maps",
            format!("({}, {}, {})", batch, height, width),
            depth.shape(),
        ));
    }
    let corners = detect_corners(images, config)?;
    let projection = projector.cartesian(corners.points.view(), depth, poses, intrinsics)?;
    let mut target = Array3::zeros((batch, height, width));
    for src in 0..batch {
        for dst in 0..batch {
            for n in 0..projection.points() {
                if let Some((x, y)) = projection.get(src, dst, n) {
                    if let Some((px, py)) = to_pixel(x, y, height, width) {
                        splat(&mut target, dst, py, px, corners.values[[src, n]]);
                    }
                }
            }
        }
    }
    trace!(
        "fused {} labelled pixels from {} views",
        target.iter().filter(|&&v| v > 0.0).count(),
        batch
    );
    Ok(binarize(target.view(), config.nms_window))
}

fn to_pixel(x: f32, y: f32, height: usize, width: usize) -> Option<(usize, usize)> {
    let px = denormalize_coordinate(x, width).round();
    let py = denormalize_coordinate(y, height).round();
    if px >= 0.0 && py >= 0.0 && (px as usize) < width && (py as usize) < height {
        Some((px as usize, py as usize))
    } else {
        None
    }
}

fn splat(target: &mut Array3<f32>, b: usize, y: usize, x: usize, value: f32) {
    let pixel = &mut target[[b, y, x]];
    *pixel = pixel.max(value);
}

fn binarize(target: ArrayView3<f32>, window: usize) -> Array3<f32> {
    let mut labels = Array3::zeros(target.dim());
    for (b, map) in target.outer_iter().enumerate() {
        let suppressed = nms2d(map, window);
        labels
            .slice_mut(s![b, .., ..])
            .assign(&suppressed.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }));
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use cv_projector::nalgebra::Point2;
    use cv_projector::PinholeProjector;
    use ndarray::Array4;

    fn squares(batch: usize) -> Array4<f32> {
        Array4::from_shape_fn((batch, 3, 32, 32), |(_, _, y, x)| {
            if (8..16).contains(&y) && (8..16).contains(&x) {
                1.0
            } else {
                0.0
            }
        })
    }

    fn config() -> ScoreLossConfig {
        ScoreLossConfig {
            num_corners: 8,
            ..Default::default()
        }
    }

    #[test]
    fn flat_images_have_no_response() {
        let image = Array2::from_elem((10, 10), 0.4f32);
        let response = gftt_response(image.view(), 1.0, 7);
        assert!(response.iter().all(|v| v.abs() < 1e-6));
    }

    #[test]
    fn square_corners_are_strongest() {
        let corners = detect_corners(squares(1).view(), &config()).unwrap();
        let (x, y) = (corners.points[[0, 0, 0]], corners.points[[0, 0, 1]]);
        let px = denormalize_coordinate(x, 32);
        let py = denormalize_coordinate(y, 32);
        let near_corner = [(7.5, 7.5), (7.5, 15.5), (15.5, 7.5), (15.5, 15.5)]
            .iter()
            .any(|&(cx, cy): &(f32, f32)| (px - cx).abs() <= 3.0 && (py - cy).abs() <= 3.0);
        assert!(near_corner, "strongest corner at ({}, {})", px, py);
    }

    #[test]
    fn labels_are_binary_and_sparse() {
        let labels = label_corners_single_view(squares(2).view(), &config()).unwrap();
        assert!(labels.iter().all(|&v| v == 0.0 || v == 1.0));
        for map in labels.outer_iter() {
            let count = map.iter().filter(|&&v| v > 0.0).count();
            assert!(count > 0 && count <= 8);
        }
    }

    #[test]
    fn fusing_identical_views_matches_single_view() {
        let images = squares(2);
        let depth = Array3::from_elem((2, 32, 32), 2.0f32);
        let k = CameraIntrinsics::identity()
            .focal(20.0)
            .principal_point(Point2::new(15.5, 15.5));
        let poses = [CameraToWorld::identity(); 2];
        let fused = label_corners_fused(
            images.view(),
            depth.view(),
            &poses,
            &[k, k],
            &PinholeProjector::new(),
            &config(),
        )
        .unwrap();
        let single = label_corners_single_view(images.view(), &config()).unwrap();
        assert_eq!(fused, single);
    }
}
