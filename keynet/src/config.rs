use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How keypoints are picked out of a dense score map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Number of keypoints selected per image
    #[serde(default = "default_feat_num")]
    pub feat_num: usize,
    /// Side of the square non-maximum suppression window (odd)
    #[serde(default = "default_extractor_nms_window")]
    pub nms_window: usize,
    /// Width in pixels of the border overwritten before suppression
    #[serde(default = "default_border")]
    pub border: usize,
    /// Score written into the border
    #[serde(default = "default_border_value")]
    pub border_value: f32,
}

impl ExtractorConfig {
    /// The common case of changing only the number of keypoints.
    pub fn new(feat_num: usize) -> Self {
        Self {
            feat_num,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        odd("nms_window", self.nms_window)
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            feat_num: default_feat_num(),
            nms_window: default_extractor_nms_window(),
            border: default_border(),
            border_value: default_border_value(),
        }
    }
}

/// Parameters of the corner pseudo-label loss.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreLossConfig {
    /// Only one corner survives per `radius`×`radius` patch
    #[serde(default = "default_corner_radius")]
    pub radius: usize,
    /// Corners kept per image
    #[serde(default = "default_num_corners")]
    pub num_corners: usize,
    /// Suppression window applied to corner responses and labels
    #[serde(default = "default_corner_nms_window")]
    pub nms_window: usize,
    /// Gaussian kernel size used for the structure tensor and the label blur
    #[serde(default = "default_blur_size")]
    pub blur_size: usize,
    /// Gaussian sigma used for the structure tensor and the label blur
    #[serde(default = "default_blur_sigma")]
    pub blur_sigma: f32,
    /// Laplacian kernel size of the smoothness term
    #[serde(default = "default_laplacian_size")]
    pub laplacian_size: usize,
    /// Weight of the smoothness term
    #[serde(default = "default_smoothness_weight")]
    pub smoothness_weight: f32,
}

impl ScoreLossConfig {
    pub fn validate(&self) -> Result<()> {
        if self.radius == 0 {
            return Err(Error::Config("corner radius must be at least 1".into()));
        }
        odd("nms_window", self.nms_window)?;
        odd("blur_size", self.blur_size)?;
        positive("blur_sigma", self.blur_sigma)?;
        odd("laplacian_size", self.laplacian_size)?;
        if self.laplacian_size < 3 {
            return Err(Error::Config(format!(
                "laplacian_size must be at least 3, got {}",
                self.laplacian_size
            )));
        }
        Ok(())
    }
}

impl Default for ScoreLossConfig {
    fn default() -> Self {
        Self {
            radius: default_corner_radius(),
            num_corners: default_num_corners(),
            nms_window: default_corner_nms_window(),
            blur_size: default_blur_size(),
            blur_sigma: default_blur_sigma(),
            laplacian_size: default_laplacian_size(),
            smoothness_weight: default_smoothness_weight(),
        }
    }
}

/// Parameters of the pairwise descriptor loss.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DescriptorLossConfig {
    /// Pixel distance under which two keypoints correspond
    #[serde(default = "default_match_radius")]
    pub radius: f32,
    /// Floor of the averaged score and of the confidence
    #[serde(default = "default_descriptor_eps")]
    pub eps: f32,
}

impl DescriptorLossConfig {
    pub fn new(radius: f32) -> Self {
        Self {
            radius,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        positive("radius", self.radius)?;
        positive("eps", self.eps)
    }
}

impl Default for DescriptorLossConfig {
    fn default() -> Self {
        Self {
            radius: default_match_radius(),
            eps: default_descriptor_eps(),
        }
    }
}

/// Parameters of the memory-indexed global descriptor ranking loss.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlobalLossConfig {
    /// Past frames drawn from memory each step
    #[serde(default = "default_n_sample")]
    pub n_sample: usize,
    /// Points stored per frame; bounds the co-visibility count
    #[serde(default = "default_n_feature")]
    pub n_feature: usize,
    /// Depth tolerance of the co-visibility test
    #[serde(default = "default_covis_eps")]
    pub covis_eps: f32,
    /// Bound on the relevance log-ratio
    #[serde(default = "default_relevance_clamp")]
    pub relevance_clamp: f32,
    /// Weight of the global descriptor 2-norm penalty
    #[serde(default = "default_regularizer_weight")]
    pub norm_weight: f32,
    /// Weight of the per-location 1-norm sparsity penalty
    #[serde(default = "default_regularizer_weight")]
    pub sparsity_weight: f32,
    /// Seed of the random point proposals
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl GlobalLossConfig {
    pub fn validate(&self) -> Result<()> {
        if self.n_sample == 0 {
            return Err(Error::Config("n_sample must be at least 1".into()));
        }
        non_negative("covis_eps", self.covis_eps)?;
        non_negative("relevance_clamp", self.relevance_clamp)
    }
}

impl Default for GlobalLossConfig {
    fn default() -> Self {
        Self {
            n_sample: default_n_sample(),
            n_feature: default_n_feature(),
            covis_eps: default_covis_eps(),
            relevance_clamp: default_relevance_clamp(),
            norm_weight: default_regularizer_weight(),
            sparsity_weight: default_regularizer_weight(),
            seed: default_seed(),
        }
    }
}

/// Dimensions and persistence of the frame memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Maximum number of frames held per environment
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Length of a stored global descriptor
    #[serde(default = "default_global_dim")]
    pub global_dim: usize,
    /// Length of a stored local descriptor
    #[serde(default = "default_point_dim")]
    pub point_dim: usize,
    /// Maximum number of points stored per frame
    #[serde(default = "default_n_feature")]
    pub n_feature: usize,
    /// Directory receiving inactive environments; kept in RAM when unset
    #[serde(default)]
    pub swap_dir: Option<PathBuf>,
    /// Seed of the frame sampler
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl MemoryConfig {
    /// A RAM-only memory for descriptors of the given sizes.
    pub fn new(point_dim: usize, global_dim: usize) -> Self {
        Self {
            point_dim,
            global_dim,
            ..Default::default()
        }
    }

    pub fn swap_dir(self, swap_dir: impl Into<PathBuf>) -> Self {
        Self {
            swap_dir: Some(swap_dir.into()),
            ..self
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::Config("memory capacity must be at least 1".into()));
        }
        Ok(())
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            global_dim: default_global_dim(),
            point_dim: default_point_dim(),
            n_feature: default_n_feature(),
            swap_dir: None,
            seed: default_seed(),
        }
    }
}

/// Everything [`FeatureNetLoss`](crate::FeatureNetLoss) needs, loadable from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureLossConfig {
    /// Weights of the cornerness, matching and global terms
    #[serde(default = "default_beta")]
    pub beta: [f32; 3],
    /// Steps between breakdowns logged at `info`
    #[serde(default = "default_log_every")]
    pub log_every: u64,
    #[serde(default)]
    pub score: ScoreLossConfig,
    #[serde(default)]
    pub descriptor: DescriptorLossConfig,
    #[serde(default)]
    pub global: GlobalLossConfig,
}

impl FeatureLossConfig {
    /// Checks every nested config as well.
    pub fn validate(&self) -> Result<()> {
        for (i, &beta) in self.beta.iter().enumerate() {
            if !beta.is_finite() || beta < 0.0 {
                return Err(Error::Config(format!("beta[{}] must be finite and non-negative, got {}", i, beta)));
            }
        }
        self.score.validate()?;
        self.descriptor.validate()?;
        self.global.validate()
    }
}

impl Default for FeatureLossConfig {
    fn default() -> Self {
        Self {
            beta: default_beta(),
            log_every: default_log_every(),
            score: Default::default(),
            descriptor: Default::default(),
            global: Default::default(),
        }
    }
}

fn odd(name: &str, value: usize) -> Result<()> {
    if value % 2 == 1 {
        Ok(())
    } else {
        Err(Error::Config(format!("{} must be odd, got {}", name, value)))
    }
}

fn positive(name: &str, value: f32) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(Error::Config(format!("{} must be positive, got {}", name, value)))
    }
}

fn non_negative(name: &str, value: f32) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(Error::Config(format!("{} must not be negative, got {}", name, value)))
    }
}

fn default_feat_num() -> usize {
    500
}

fn default_extractor_nms_window() -> usize {
    7
}

fn default_border() -> usize {
    4
}

fn default_border_value() -> f32 {
    0.0
}

fn default_corner_radius() -> usize {
    8
}

fn default_num_corners() -> usize {
    500
}

fn default_corner_nms_window() -> usize {
    5
}

fn default_blur_size() -> usize {
    7
}

fn default_blur_sigma() -> f32 {
    1.0
}

fn default_laplacian_size() -> usize {
    5
}

fn default_smoothness_weight() -> f32 {
    10.0
}

fn default_match_radius() -> f32 {
    1.0
}

fn default_descriptor_eps() -> f32 {
    1e-6
}

fn default_n_sample() -> usize {
    8
}

fn default_n_feature() -> usize {
    250
}

fn default_covis_eps() -> f32 {
    1e-2
}

fn default_relevance_clamp() -> f32 {
    10.0
}

fn default_regularizer_weight() -> f32 {
    1e-4
}

fn default_seed() -> u64 {
    0
}

fn default_capacity() -> usize {
    1000
}

fn default_global_dim() -> usize {
    256 * 16
}

fn default_point_dim() -> usize {
    256
}

fn default_beta() -> [f32; 3] {
    [1.0, 1.0, 5.0]
}

fn default_log_every() -> u64 {
    200
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: FeatureLossConfig =
            serde_json::from_str(r#"{"beta": [1.0, 2.0, 3.0], "descriptor": {"radius": 2.0}}"#)
                .unwrap();
        assert_eq!(config.beta, [1.0, 2.0, 3.0]);
        assert_eq!(config.descriptor.radius, 2.0);
        assert_eq!(config.descriptor.eps, 1e-6);
        assert_eq!(config.global, GlobalLossConfig::default());
        assert_eq!(config.log_every, 200);
    }

    #[test]
    fn json_round_trip() {
        let config = MemoryConfig::new(32, 64).swap_dir("/tmp/keynet");
        let json = serde_json::to_string(&config).unwrap();
        let back: MemoryConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
        assert_eq!(back.capacity, 1000);
    }

    #[test]
    fn defaults_are_valid() {
        FeatureLossConfig::default().validate().unwrap();
        ExtractorConfig::default().validate().unwrap();
        MemoryConfig::default().validate().unwrap();
    }

    #[test]
    fn even_windows_are_rejected() {
        let config: ScoreLossConfig = serde_json::from_str(r#"{"nms_window": 6}"#).unwrap();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
        let config: ExtractorConfig = serde_json::from_str(r#"{"nms_window": 4}"#).unwrap();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn degenerate_values_are_rejected() {
        for json in [
            r#"{"score": {"radius": 0}}"#,
            r#"{"score": {"blur_sigma": 0.0}}"#,
            r#"{"score": {"blur_size": 4}}"#,
            r#"{"score": {"laplacian_size": 1}}"#,
            r#"{"descriptor": {"radius": 0.0}}"#,
            r#"{"global": {"n_sample": 0}}"#,
            r#"{"beta": [1.0, -1.0, 5.0]}"#,
        ] {
            let config: FeatureLossConfig = serde_json::from_str(json).unwrap();
            assert!(matches!(config.validate(), Err(Error::Config(_))), "{}", json);
        }
        let memory: MemoryConfig = serde_json::from_str(r#"{"capacity": 0}"#).unwrap();
        assert!(matches!(memory.validate(), Err(Error::Config(_))));
    }
}
