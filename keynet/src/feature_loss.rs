use crate::config::{FeatureLossConfig, MemoryConfig};
use crate::descriptor_loss::DescriptorMatchLoss;
use crate::error::{shape_error, Result};
use crate::global_loss::{GlobalDescMatchLoss, GlobalDescriptorHead, GlobalInputs};
use crate::memory::{FrameMemory, Memory};
use crate::score_loss::ScoreLoss;
use cv_projector::{CameraIntrinsics, CameraToWorld, PinholeProjector, Projector};
use log::*;
use ndarray::{s, ArrayView2, ArrayView3, ArrayView4};

/// What the network produced for one batch.
#[derive(Debug, Clone, Copy)]
pub struct NetworkOutputs<'a> {
    /// `(B, Dg)` global descriptors
    pub global: ArrayView2<'a, f32>,
    /// `(B, L, Dl)` per-location activations pooled into the global descriptors
    pub global_locations: ArrayView3<'a, f32>,
    /// `(B, N, D)` local descriptors
    pub descriptors: ArrayView3<'a, f32>,
    /// `(B, N, 2)` normalized keypoints; random proposals come first
    pub points: ArrayView3<'a, f32>,
    /// `(B, N)` keypoint scores
    pub scores: ArrayView2<'a, f32>,
    /// `(B, H, W)` dense score map in `[0, 1]`
    pub score_map: ArrayView3<'a, f32>,
}

/// The posed frames of one batch.
#[derive(Debug, Clone, Copy)]
pub struct Frames<'a> {
    /// `(B, 3, H, W)` RGB images in `[0, 1]`
    pub images: ArrayView4<'a, f32>,
    /// `(B, H, W)` depth maps
    pub depth: ArrayView3<'a, f32>,
    pub poses: &'a [CameraToWorld],
    pub intrinsics: &'a [CameraIntrinsics],
    /// Environment the frames were recorded in
    pub env: &'a str,
}

/// Every weighted term of one step and their sum.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LossBreakdown {
    pub cornerness: f32,
    pub matching: f32,
    pub global: f32,
    pub total: f32,
    pub n_match: usize,
    pub n_miss: usize,
    /// Frames held by the active memory environment after the step
    pub memory_len: usize,
}

/// Combines the corner, descriptor and global descriptor losses.
#[derive(Debug)]
pub struct FeatureNetLoss<P = PinholeProjector, M = Memory> {
    pub config: FeatureLossConfig,
    pub score: ScoreLoss,
    pub descriptor: DescriptorMatchLoss,
    pub global: GlobalDescMatchLoss<M>,
    pub projector: P,
}

impl FeatureNetLoss {
    /// A loss over pinhole cameras with an in-process memory.
    pub fn pinhole(config: FeatureLossConfig, memory: MemoryConfig) -> Self {
        Self::new(config, PinholeProjector::new(), Memory::new(memory))
    }
}

impl<P: Projector, M: FrameMemory> FeatureNetLoss<P, M> {
    pub fn new(config: FeatureLossConfig, projector: P, memory: M) -> Self {
        Self {
            score: ScoreLoss::new(config.score),
            descriptor: DescriptorMatchLoss::new(config.descriptor),
            global: GlobalDescMatchLoss::new(config.global, memory),
            projector,
            config,
        }
    }

    /// Computes the loss of training step `step`.
    pub fn forward<'a, H: GlobalDescriptorHead + ?Sized>(
        &mut self,
        step: u64,
        net: &H,
        outputs: NetworkOutputs<'a>,
        frames: Frames<'a>,
    ) -> Result<LossBreakdown> {
        self.config.validate()?;
        let (batch, height, width) = outputs.score_map.dim();
        let (_, n, _) = outputs.points.dim();
        check_batch(&outputs, &frames, batch, n)?;

        // The random proposals do not feed the global descriptor.
        let kept = (n + net.sample_pass()) / (net.sample_pass() + 1);
        let rand_end = n - kept;

        let [beta_score, beta_match, beta_global] = self.config.beta;
        let cornerness = beta_score
            * self.score.forward(
                outputs.score_map,
                frames.images,
                frames.depth,
                frames.poses,
                frames.intrinsics,
                &self.projector,
            )?;

        let projection =
            self.projector
                .cartesian(outputs.points, frames.depth, frames.poses, frames.intrinsics)?;
        let matched = self.descriptor.forward(
            outputs.descriptors,
            outputs.scores,
            outputs.points,
            &projection,
            height,
            width,
        )?;
        let matching = beta_match * matched.loss;

        let global_inputs = GlobalInputs {
            global: outputs.global,
            global_locations: outputs.global_locations,
            descriptors: outputs.descriptors.slice_move(s![.., rand_end.., ..]),
            depth: frames.depth,
            poses: frames.poses,
            intrinsics: frames.intrinsics,
        };
        let global = beta_global
            * self
                .global
                .forward(net, global_inputs, frames.env, &self.projector)?
                .loss;

        let breakdown = LossBreakdown {
            cornerness,
            matching,
            global,
            total: cornerness + matching + global,
            n_match: matched.match_losses.len(),
            n_miss: matched.n_miss,
            memory_len: self.global.memory().len(),
        };
        if self.config.log_every > 0 && step % self.config.log_every == 0 {
            info!("step {}: {:?}", step, breakdown);
        } else {
            debug!("step {}: {:?}", step, breakdown);
        }
        Ok(breakdown)
    }
}

fn check_batch(outputs: &NetworkOutputs, frames: &Frames, batch: usize, n: usize) -> Result<()> {
    let (_, height, width) = outputs.score_map.dim();
    if outputs.points.dim() != (batch, n, 2) {
        return Err(shape_error("keypoints", format!("({}, N, 2)", batch), outputs.points.shape()));
    }
    if outputs.scores.dim() != (batch, n) {
        return Err(shape_error("scores", format!("({}, {})", batch, n), outputs.scores.shape()));
    }
    let (db, dn, _) = outputs.descriptors.dim();
    if (db, dn) != (batch, n) {
        return Err(shape_error(
            "descriptors",
            format!("({}, {}, D)", batch, n),
            outputs.descriptors.shape(),
        ));
    }
    if outputs.global.nrows() != batch {
        return Err(shape_error("global descriptors", format!("({}, Dg)", batch), outputs.global.shape()));
    }
    if frames.images.dim() != (batch, 3, height, width) {
        return Err(shape_error(
            "images",
            format!("({}, 3, {}, {})", batch, height, width),
            frames.images.shape(),
        ));
    }
    if frames.depth.dim() != (batch, height, width) {
        return Err(shape_error(
            "depth maps",
            format!("({}, {}, {})", batch, height, width),
            frames.depth.shape(),
        ));
    }
    Ok(())
}
