//! Runs a few training steps of the loss on a synthetic scene and logs the breakdown.
//!
//! `RUST_LOG=info cargo run --example synthetic_step`

use keynet::cv_projector::nalgebra::{Point2, Rotation3, Vector3};
use keynet::cv_projector::{CameraIntrinsics, CameraToWorld};
use keynet::{
    DescriptorSampler, ExtractorConfig, FeatureLossConfig, FeatureNetLoss, Frames, GlobalDescriptorHead,
    KeypointExtractor, MemoryConfig, NetworkOutputs,
};
use log::*;
use ndarray::{s, Array2, Array3, Array4, ArrayView3, Axis};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

const BATCH: usize = 4;
const HEIGHT: usize = 64;
const WIDTH: usize = 80;
const DIM: usize = 16;

struct MeanHead;

impl GlobalDescriptorHead for MeanHead {
    fn global_desc(&self, descriptors: ArrayView3<f32>) -> keynet::Result<Array2<f32>> {
        Ok(descriptors
            .mean_axis(Axis(1))
            .unwrap_or_else(|| Array2::zeros((descriptors.dim().0, descriptors.dim().2))))
    }

    fn sample_pass(&self) -> usize {
        1
    }
}

fn main() -> keynet::Result<()> {
    pretty_env_logger::init_timed();
    let mut rng = Pcg64::seed_from_u64(0);
    let config = FeatureLossConfig {
        log_every: 1,
        ..Default::default()
    };
    let mut loss = FeatureNetLoss::pinhole(config, MemoryConfig::new(DIM, DIM));
    let extractor = KeypointExtractor::new(ExtractorConfig::new(200));
    let sampler = DescriptorSampler::random(DIM, 32, 0);
    let head = MeanHead;
    let intrinsics = vec![
        CameraIntrinsics::identity()
            .focal(60.0)
            .principal_point(Point2::new(39.5, 31.5));
        BATCH
    ];

    for step in 0..3u64 {
        let images = Array4::from_shape_simple_fn((BATCH, 3, HEIGHT, WIDTH), || rng.gen_range(0.0f32..1.0));
        let score_map = Array3::from_shape_simple_fn((BATCH, HEIGHT, WIDTH), || rng.gen_range(0.01f32..0.99));
        let depth = Array3::from_elem((BATCH, HEIGHT, WIDTH), 2.0f32);
        let poses: Vec<CameraToWorld> = (0..BATCH)
            .map(|b| {
                CameraToWorld::from_parts(
                    Vector3::new(0.02 * b as f64, 0.0, 0.01 * step as f64),
                    Rotation3::from_euler_angles(0.0, 0.01 * b as f64, 0.0),
                )
            })
            .collect();

        let keypoints = extractor.extract(score_map.view())?;
        let maps = Array4::from_shape_simple_fn((BATCH, DIM, HEIGHT, WIDTH), || rng.gen_range(-1.0f32..1.0));
        let descriptors = sampler.sample(maps.view(), Array4::zeros(maps.dim()).view(), &keypoints)?;
        let n = keypoints.len();
        let trailing = descriptors.slice(s![.., n / 2.., ..]);
        let global = head.global_desc(trailing)?;

        let outputs = NetworkOutputs {
            global: global.view(),
            global_locations: trailing,
            descriptors: descriptors.view(),
            points: keypoints.points.view(),
            scores: keypoints.scores.view(),
            score_map: score_map.view(),
        };
        let frames = Frames {
            images: images.view(),
            depth: depth.view(),
            poses: &poses,
            intrinsics: &intrinsics,
            env: "synthetic",
        };
        let breakdown = loss.forward(step, &head, outputs, frames)?;
        info!("total loss after step {}: {}", step, breakdown.total);
    }
    Ok(())
}
