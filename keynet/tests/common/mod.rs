#![allow(dead_code)]

use keynet::cv_projector::nalgebra::{Point2, Rotation3, Vector3};
use keynet::cv_projector::{CameraIntrinsics, CameraToWorld};
use keynet::{GlobalDescriptorHead, Result};
use ndarray::{s, Array2, Array3, Array4, ArrayView3, Axis};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

pub const HEIGHT: usize = 96;
pub const WIDTH: usize = 128;
pub const FOCAL: f64 = 100.0;
pub const PLANE_DEPTH: f32 = 3.0;

pub fn init_logging() {
    let _ = pretty_env_logger::try_init_timed();
}

/// Cameras translating sideways in front of a textured fronto-parallel plane.
///
/// Camera `b` sits `b` pixels to the right of the first one, so every image
/// is the first one shifted left by `b` pixels.
pub struct Scene {
    pub images: Array4<f32>,
    pub score_map: Array3<f32>,
    pub depth: Array3<f32>,
    pub poses: Vec<CameraToWorld>,
    pub intrinsics: Vec<CameraIntrinsics>,
}

impl Scene {
    pub fn new(batch: usize, seed: u64) -> Self {
        let mut rng = Pcg64::seed_from_u64(seed);
        let noise = Array2::from_shape_simple_fn((HEIGHT, WIDTH + batch), || rng.gen_range(0.05f32..0.95));
        let images = Array4::from_shape_fn((batch, 3, HEIGHT, WIDTH), |(b, c, y, x)| {
            let u = x + b;
            let checker = ((u / 8 + y / 8) % 2) as f32;
            0.1 + 0.7 * checker + 0.05 * c as f32
        });
        let score_map = Array3::from_shape_fn((batch, HEIGHT, WIDTH), |(b, y, x)| noise[(y, x + b)]);
        let depth = Array3::from_elem((batch, HEIGHT, WIDTH), PLANE_DEPTH);
        let step = PLANE_DEPTH as f64 / FOCAL;
        let poses = (0..batch)
            .map(|b| CameraToWorld::from_parts(Vector3::new(step * b as f64, 0.0, 0.0), Rotation3::identity()))
            .collect();
        let intrinsics = vec![
            CameraIntrinsics::identity()
                .focal(FOCAL)
                .principal_point(Point2::new((WIDTH - 1) as f64 / 2.0, (HEIGHT - 1) as f64 / 2.0));
            batch
        ];
        Self {
            images,
            score_map,
            depth,
            poses,
            intrinsics,
        }
    }

    pub fn batch(&self) -> usize {
        self.poses.len()
    }
}

/// Mean-pools local descriptors; one random proposal pass.
pub struct MeanHead;

impl GlobalDescriptorHead for MeanHead {
    fn global_desc(&self, descriptors: ArrayView3<f32>) -> Result<Array2<f32>> {
        Ok(descriptors
            .mean_axis(Axis(1))
            .unwrap_or_else(|| Array2::zeros((descriptors.dim().0, descriptors.dim().2))))
    }

    fn sample_pass(&self) -> usize {
        1
    }
}

/// Smoothly varying `(B, C, H, W)` feature maps following the scene motion.
pub fn feature_maps(batch: usize, channels: usize) -> Array4<f32> {
    Array4::from_shape_fn((batch, channels, HEIGHT, WIDTH), |(b, c, y, x)| {
        let u = (x + b) as f32;
        ((u * 0.13 + c as f32).sin() + (y as f32 * 0.07 * (c + 1) as f32).cos()) * 0.5
    })
}

/// The trailing share of the points seen by the global head.
pub fn trailing(values: ArrayView3<f32>, kept: usize) -> ArrayView3<f32> {
    let n = values.dim().1;
    values.slice_move(s![.., n - kept.., ..])
}
