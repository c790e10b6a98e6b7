mod common;

use common::*;
use keynet::cv_projector::PinholeProjector;
use keynet::{
    FrameMemory, GlobalDescMatchLoss, GlobalDescriptorHead, GlobalInputs, GlobalLossConfig, Memory,
    MemoryConfig, Result, SampledFrames,
};
use ndarray::{Array2, Array3, ArrayView2, ArrayView3};

/// Records the order in which the loss talks to memory.
#[derive(Default)]
struct Recorder {
    inner: Option<Memory>,
    calls: Vec<&'static str>,
}

impl FrameMemory for Recorder {
    fn swap(&mut self, env: &str) -> Result<()> {
        self.calls.push("swap");
        self.inner
            .get_or_insert_with(|| Memory::new(MemoryConfig::new(4, 4)))
            .swap(env)
    }

    fn store(&mut self, global: ArrayView2<f32>, descriptors: ArrayView3<f32>, points: ArrayView3<f32>) -> Result<()> {
        self.calls.push("store");
        self.inner.as_mut().unwrap().store(global, descriptors, points)
    }

    fn sample_frames(&mut self, k: usize) -> Result<SampledFrames> {
        self.calls.push("sample");
        self.inner.as_mut().unwrap().sample_frames(k)
    }

    fn len(&self) -> usize {
        self.inner.as_ref().map_or(0, |m| m.len())
    }
}

fn run(loss: &mut GlobalDescMatchLoss<Recorder>, scene: &Scene, descriptors: &Array3<f32>) -> f32 {
    let global = MeanHead.global_desc(descriptors.view()).unwrap();
    let inputs = GlobalInputs {
        global: global.view(),
        global_locations: descriptors.view(),
        descriptors: descriptors.view(),
        depth: scene.depth.view(),
        poses: &scene.poses,
        intrinsics: &scene.intrinsics,
    };
    loss.forward(&MeanHead, inputs, "plane", &PinholeProjector::new())
        .unwrap()
        .loss
}

#[test]
fn cold_start_is_free_and_stores_once() {
    init_logging();
    let scene = Scene::new(1, 7);
    let descriptors = Array3::from_shape_fn((1, 20, 4), |(_, n, d)| (n + d) as f32 * 0.1);
    let mut loss = GlobalDescMatchLoss::new(GlobalLossConfig::default(), Recorder::default());
    assert_eq!(run(&mut loss, &scene, &descriptors), 0.0);
    assert_eq!(loss.memory().calls, vec!["swap", "store"]);
    assert_eq!(loss.memory().len(), 1);

    let loss_value = run(&mut loss, &scene, &descriptors);
    assert!(loss_value.is_finite());
    assert_eq!(
        loss.memory().calls,
        vec!["swap", "store", "swap", "sample", "store"]
    );
    assert_eq!(loss.memory().len(), 2);
}

#[test]
fn equally_relevant_frames_leave_only_the_embedding_ratio() {
    let scene = Scene::new(1, 3);
    let descriptors = Array3::from_shape_fn((1, 20, 4), |(_, n, d)| ((n * 7 + d) % 5) as f32 * 0.2);
    let config = GlobalLossConfig {
        norm_weight: 0.0,
        sparsity_weight: 0.0,
        ..Default::default()
    };
    let mut loss = GlobalDescMatchLoss::new(config, Recorder::default());
    run(&mut loss, &scene, &descriptors);
    run(&mut loss, &scene, &descriptors);
    // Two stored frames with identical descriptors from identical views: equal
    // relevance and equal distances, so nothing is left to rank.
    let value = run(&mut loss, &scene, &descriptors);
    assert!(value.abs() < 1e-6, "{}", value);
}

#[test]
fn relevance_follows_co_visibility() {
    let scene = Scene::new(1, 5);
    let descriptors = Array3::from_elem((1, 30, 4), 0.25f32);
    let mut loss = GlobalDescMatchLoss::new(GlobalLossConfig::default(), Memory::new(MemoryConfig::new(4, 4)));
    let global = Array2::from_elem((1, 4), 1.0f32);
    let inputs = GlobalInputs {
        global: global.view(),
        global_locations: descriptors.view(),
        descriptors: descriptors.view(),
        depth: scene.depth.view(),
        poses: &scene.poses,
        intrinsics: &scene.intrinsics,
    };
    let projector = PinholeProjector::new();
    assert!(loss.forward(&MeanHead, inputs, "plane", &projector).unwrap().relevance.is_none());
    let second = loss.forward(&MeanHead, inputs, "plane", &projector).unwrap();
    let relevance = second.relevance.unwrap();
    // All 30 stored points lie on the observed plane and in view.
    assert_eq!(relevance.dim(), (1, 1));
    assert!((relevance[(0, 0)] - (251.0f32 - 30.0).sqrt()).abs() < 1e-4);
}

#[test]
fn sampling_no_frames_is_rejected_before_touching_memory() {
    let scene = Scene::new(1, 3);
    let descriptors = Array3::from_elem((1, 10, 4), 0.5f32);
    let global = MeanHead.global_desc(descriptors.view()).unwrap();
    let inputs = GlobalInputs {
        global: global.view(),
        global_locations: descriptors.view(),
        descriptors: descriptors.view(),
        depth: scene.depth.view(),
        poses: &scene.poses,
        intrinsics: &scene.intrinsics,
    };
    let config = GlobalLossConfig {
        n_sample: 0,
        ..Default::default()
    };
    let mut loss = GlobalDescMatchLoss::new(config, Recorder::default());
    assert!(matches!(
        loss.forward(&MeanHead, inputs, "plane", &PinholeProjector::new()),
        Err(keynet::Error::Config(_))
    ));
    assert!(loss.memory().calls.is_empty());
}
