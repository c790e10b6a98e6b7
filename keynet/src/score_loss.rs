use crate::config::ScoreLossConfig;
use crate::corners::{label_corners_fused, label_corners_single_view};
use crate::derivatives::laplacian;
use crate::error::{shape_error, Result};
use crate::image::gaussian_blur;
use cv_projector::{CameraIntrinsics, CameraToWorld, Projector};
use log::*;
use ndarray::{azip, ArrayView3, ArrayView4};

/// Binary cross entropy of a probability against a soft target, with both
/// logarithms clamped at -100.
pub fn binary_cross_entropy(probability: f32, target: f32) -> f32 {
    let log_p = probability.ln().max(-100.0);
    let log_q = (1.0 - probability).ln().max(-100.0);
    -(target * log_p + (1.0 - target) * log_q)
}

/// Supervises the dense score map with classical corners.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScoreLoss {
    pub config: ScoreLossConfig,
}

impl ScoreLoss {
    pub fn new(config: ScoreLossConfig) -> Self {
        Self { config }
    }

    /// Scores a `(B, H, W)` map against corners fused from every view of the batch.
    #[allow(clippy::too_many_arguments)]
    pub fn forward<P: Projector + ?Sized>(
        &self,
        score_map: ArrayView3<f32>,
        images: ArrayView4<f32>,
        depth: ArrayView3<f32>,
        poses: &[CameraToWorld],
        intrinsics: &[CameraIntrinsics],
        projector: &P,
    ) -> Result<f32> {
        let labels = label_corners_fused(images, depth, poses, intrinsics, projector, &self.config)?;
        self.against_labels(score_map, labels.view())
    }

    /// Scores a `(B, H, W)` map against the corners of each image alone.
    pub fn forward_single_view(&self, score_map: ArrayView3<f32>, images: ArrayView4<f32>) -> Result<f32> {
        let labels = label_corners_single_view(images, &self.config)?;
        self.against_labels(score_map, labels.view())
    }

    /// Cross entropy with blurred binary labels plus a penalty on scores that
    /// are not sharp peaks.
    pub fn against_labels(&self, score_map: ArrayView3<f32>, labels: ArrayView3<f32>) -> Result<f32> {
        self.config.validate()?;
        if score_map.dim() != labels.dim() {
            return Err(shape_error(
                "corner labels",
                format!("{:?}", score_map.shape()),
                labels.shape(),
            ));
        }
        if score_map.is_empty() {
            return Ok(0.0);
        }
        let mut bce = 0.0f64;
        let mut smoothness = 0.0f64;
        for (scores, labels) in score_map.outer_iter().zip(labels.outer_iter()) {
            let target = gaussian_blur(labels, self.config.blur_sigma, self.config.blur_size);
            let lap = laplacian(scores, self.config.laplacian_size);
            azip!((&s in &scores, &t in &target, &l in &lap) {
                bce += binary_cross_entropy(s, t) as f64;
                smoothness += (s * (-l).exp()) as f64;
            });
        }
        let count = score_map.len() as f64;
        let bce = (bce / count) as f32;
        let smoothness = (smoothness / count) as f32;
        trace!("corner bce {} smoothness {}", bce, smoothness);
        Ok(bce + self.config.smoothness_weight * smoothness)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn cross_entropy_is_clamped() {
        assert!((binary_cross_entropy(0.0, 1.0) - 100.0).abs() < 1e-4);
        assert!((binary_cross_entropy(1.0, 0.0) - 100.0).abs() < 1e-4);
        assert!(binary_cross_entropy(0.0, 0.0).abs() < 1e-6);
        assert!((binary_cross_entropy(0.5, 0.3) - 2f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn zero_scores_on_empty_labels_cost_nothing() {
        let loss = ScoreLoss::default();
        let scores = Array3::zeros((2, 16, 16));
        let labels = Array3::zeros((2, 16, 16));
        assert!(loss.against_labels(scores.view(), labels.view()).unwrap().abs() < 1e-6);
    }

    #[test]
    fn matching_labels_beat_missing_them() {
        let loss = ScoreLoss::default();
        let mut labels = Array3::zeros((1, 16, 16));
        labels[[0, 8, 8]] = 1.0;
        let mut hit = Array3::from_elem((1, 16, 16), 0.01f32);
        hit[[0, 8, 8]] = 0.9;
        let mut miss = Array3::from_elem((1, 16, 16), 0.01f32);
        miss[[0, 3, 3]] = 0.9;
        let hit = loss.against_labels(hit.view(), labels.view()).unwrap();
        let miss = loss.against_labels(miss.view(), labels.view()).unwrap();
        assert!(hit < miss, "{} >= {}", hit, miss);
    }

    #[test]
    fn mismatched_labels_fail() {
        let loss = ScoreLoss::default();
        let scores = Array3::zeros((1, 8, 8));
        let labels = Array3::zeros((2, 8, 8));
        assert!(loss.against_labels(scores.view(), labels.view()).is_err());
    }

    #[test]
    fn invalid_json_config_is_an_error() {
        let scores = Array3::zeros((1, 16, 16));
        let images = ndarray::Array4::zeros((1, 3, 16, 16));
        for json in [r#"{"nms_window": 6}"#, r#"{"radius": 0}"#, r#"{"blur_sigma": -1.0}"#] {
            let loss = ScoreLoss::new(serde_json::from_str(json).unwrap());
            assert!(
                matches!(
                    loss.forward_single_view(scores.view(), images.view()),
                    Err(crate::Error::Config(_))
                ),
                "{}",
                json
            );
        }
    }
}
