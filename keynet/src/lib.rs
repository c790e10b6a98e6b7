//! Self-supervised training losses for learned keypoints and descriptors.
//!
//! Nothing here needs labelled keypoints. Posed depth frames supply the
//! supervision instead: a keypoint of one frame lifted with its depth and
//! moved into another frame should land on a keypoint there, and the two
//! should carry similar descriptors.
//!
//! The pieces, in the order a training step uses them:
//!
//! * [`KeypointExtractor`] turns a dense score map into a fixed number of
//!   keypoints per image.
//! * [`DescriptorSampler`] reads descriptors off the feature maps at those
//!   keypoints.
//! * [`ScoreLoss`] supervises the score map with classical corners fused
//!   across views ([`label_corners_fused`]).
//! * [`DescriptorMatchLoss`] classifies cross-view keypoint pairs into
//!   matches and misses and scores their descriptor similarity.
//! * [`GlobalDescMatchLoss`] ranks past frames held in a [`FrameMemory`] by
//!   co-visibility ([`feature_pt_ncovis`]) and asks the global descriptor to
//!   rank them the same way.
//! * [`FeatureNetLoss`] runs all three for one step.
//!
//! Losses are computed as values over `ndarray` arrays. Gradients are the
//! business of whatever runtime hosts the network.
//!
//! ```
//! use keynet::{ExtractorConfig, KeypointExtractor};
//! use ndarray::Array3;
//!
//! let mut score_map = Array3::zeros((1, 32, 32));
//! score_map[[0, 12, 20]] = 0.8;
//! let extractor = KeypointExtractor::new(ExtractorConfig::new(4));
//! let keypoints = extractor.extract(score_map.view()).unwrap();
//! assert_eq!(keypoints.scores[[0, 0]], 0.8);
//! ```

mod config;
mod corners;
mod cosine;
mod covis;
mod derivatives;
mod descriptor_loss;
mod error;
mod extractor;
mod feature_loss;
mod global_loss;
mod image;
mod memory;
mod nms;
mod sampler;
mod score_loss;

pub use config::*;
pub use corners::*;
pub use cosine::*;
pub use covis::*;
pub use derivatives::{laplacian, laplacian_kernel, sobel_horizontal, sobel_vertical};
pub use descriptor_loss::{blend, nll, DescriptorMatch, DescriptorMatchLoss, PairClasses};
pub use error::{Error, Result};
pub use extractor::*;
pub use feature_loss::*;
pub use global_loss::*;
pub use image::{gaussian_blur, gaussian_kernel, GrayFloatImage};
pub use memory::*;
pub use nms::*;
pub use sampler::*;
pub use score_loss::*;

pub use cv_projector;
