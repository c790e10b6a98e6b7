use crate::config::GlobalLossConfig;
use crate::cosine::cdist;
use crate::covis::feature_pt_ncovis;
use crate::error::{shape_error, Result};
use crate::memory::{FrameMemory, Memory};
use cv_projector::{CameraIntrinsics, CameraToWorld, Projector};
use log::*;
use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};
use rand::distributions::{Distribution, Uniform};
use rand::SeedableRng;
use rand_pcg::Pcg64;

const MIN_DISTANCE: f32 = 1e-12;

/// The part of the network that pools local descriptors into one descriptor
/// per frame.
pub trait GlobalDescriptorHead {
    /// Pools `(S, n, D)` local descriptors into `(S, Dg)` global descriptors.
    fn global_desc(&self, descriptors: ArrayView3<f32>) -> Result<Array2<f32>>;

    /// Number of random proposal passes appended to the detected keypoints.
    fn sample_pass(&self) -> usize;
}

/// Everything the current batch contributes to the global descriptor loss.
#[derive(Debug, Clone, Copy)]
pub struct GlobalInputs<'a> {
    /// `(B, Dg)` global descriptors
    pub global: ArrayView2<'a, f32>,
    /// `(B, L, Dl)` per-location activations behind the global descriptors
    pub global_locations: ArrayView3<'a, f32>,
    /// `(B, n, D)` local descriptors stored along with the frames
    pub descriptors: ArrayView3<'a, f32>,
    /// `(B, H, W)` depth maps
    pub depth: ArrayView3<'a, f32>,
    pub poses: &'a [CameraToWorld],
    pub intrinsics: &'a [CameraIntrinsics],
}

/// Outcome of one step of the global descriptor loss.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalMatch {
    pub loss: f32,
    /// `(S, B)` relevance of the sampled frames, absent on a cold start
    pub relevance: Option<Array2<f32>>,
}

/// Squared difference between the log-ratio of the embedding distances of two
/// memory frames and the clamped log-ratio of their relevance.
pub fn ranking_term(d_s: f32, d_t: f32, rho_s: f32, rho_t: f32, clamp: f32) -> f32 {
    let embedding = (d_t / d_s).ln();
    let relevance = (rho_t / rho_s).ln().clamp(-clamp, clamp);
    (embedding - relevance).powi(2)
}

/// Listwise ranking loss that orders global descriptor distances to past
/// frames like their geometric co-visibility with the current frames.
#[derive(Debug)]
pub struct GlobalDescMatchLoss<M = Memory> {
    pub config: GlobalLossConfig,
    memory: M,
    rng: Pcg64,
}

impl<M: FrameMemory> GlobalDescMatchLoss<M> {
    pub fn new(config: GlobalLossConfig, memory: M) -> Self {
        let rng = Pcg64::seed_from_u64(config.seed);
        Self {
            config,
            memory,
            rng,
        }
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.memory
    }

    /// Uniform points in `[-1, 1)²`, the shape of the local descriptors.
    fn random_points(&mut self, batch: usize, n: usize) -> Array3<f32> {
        let dist = Uniform::new(-1.0f32, 1.0);
        let rng = &mut self.rng;
        Array3::from_shape_simple_fn((batch, n, 2), || dist.sample(rng))
    }

    /// Runs one step for the frames of environment `env`, then stores them.
    pub fn forward<H, P>(
        &mut self,
        head: &H,
        inputs: GlobalInputs,
        env: &str,
        projector: &P,
    ) -> Result<GlobalMatch>
    where
        H: GlobalDescriptorHead + ?Sized,
        P: Projector + ?Sized,
    {
        self.config.validate()?;
        let (batch, _) = inputs.global.dim();
        let (_, n, _) = inputs.descriptors.dim();
        if inputs.descriptors.dim().0 != batch || inputs.global_locations.dim().0 != batch {
            return Err(shape_error(
                "local descriptors",
                format!("({}, n, D)", batch),
                inputs.descriptors.shape(),
            ));
        }
        self.memory.swap(env)?;

        let points = self.random_points(batch, n);
        let world = projector.pix2world(points.view(), inputs.depth, inputs.poses, inputs.intrinsics)?;

        let result = if self.memory.is_empty() {
            debug!("memory of {} is empty, global loss is zero", env);
            GlobalMatch {
                loss: 0.0,
                relevance: None,
            }
        } else {
            let sampled = self.memory.sample_frames(self.config.n_sample)?;
            let covis = feature_pt_ncovis(
                sampled.points.view(),
                inputs.depth,
                inputs.poses,
                inputs.intrinsics,
                projector,
                self.config.covis_eps,
                false,
            )?;
            let top = (self.config.n_feature + 1) as f32;
            let relevance = covis.counts.mapv(|count| (top - count).max(0.0).sqrt());
            let memory_global = head.global_desc(sampled.descriptors.view())?;
            if memory_global.ncols() != inputs.global.ncols() {
                return Err(shape_error(
                    "memory global descriptors",
                    format!("(S, {})", inputs.global.ncols()),
                    memory_global.shape(),
                ));
            }
            let distance = cdist(memory_global.view(), inputs.global).mapv(|d| d.max(MIN_DISTANCE));
            let loss = self.rank(distance.view(), relevance.view(), inputs);
            GlobalMatch {
                loss,
                relevance: Some(relevance),
            }
        };

        self.memory.store(inputs.global, inputs.descriptors, world.view())?;
        debug!(
            "global loss {} with {} frames in memory {}",
            result.loss,
            self.memory.len(),
            env
        );
        Ok(result)
    }

    /// Averages the ranking term over all ordered pairs of sampled frames and
    /// adds the magnitude penalties, per current frame, then over the batch.
    fn rank(&self, distance: ArrayView2<f32>, relevance: ArrayView2<f32>, inputs: GlobalInputs) -> f32 {
        let (samples, batch) = distance.dim();
        let clamp = self.config.relevance_clamp;
        let mut total = 0.0f64;
        for b in 0..batch {
            let mut ranking = 0.0f64;
            for s in 0..samples {
                for t in 0..samples {
                    ranking += ranking_term(
                        distance[(s, b)],
                        distance[(t, b)],
                        relevance[(s, b)],
                        relevance[(t, b)],
                        clamp,
                    ) as f64;
                }
            }
            let ranking = ranking / (samples * samples) as f64;
            let norm = inputs.global.row(b).dot(&inputs.global.row(b)).sqrt();
            let locations = inputs.global_locations.index_axis(Axis(0), b);
            let sparsity = if locations.nrows() == 0 {
                0.0
            } else {
                locations
                    .outer_iter()
                    .map(|l| l.iter().map(|v| v.abs()).sum::<f32>())
                    .sum::<f32>()
                    / locations.nrows() as f32
            };
            total += ranking
                + (self.config.norm_weight * norm) as f64
                + (self.config.sparsity_weight * sparsity) as f64;
        }
        (total / batch.max(1) as f64) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_relevance_contributes_nothing() {
        let term = ranking_term(2.0, 2.0, 7.5, 7.5, 10.0);
        assert_eq!(term, 0.0);
        // Only the embedding ratio remains.
        let term = ranking_term(1.0, std::f32::consts::E, 3.0, 3.0, 10.0);
        assert!((term - 1.0).abs() < 1e-6);
    }

    #[test]
    fn relevance_ratio_is_clamped() {
        let term = ranking_term(1.0, 1.0, 1e-30, 1.0, 10.0);
        assert!((term - 100.0).abs() < 1e-3);
    }
}
