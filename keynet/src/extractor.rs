use crate::config::ExtractorConfig;
use crate::error::{shape_error, Error, Result};
use crate::nms::{constant_border, nms2d, top_k};
use cv_projector::{denormalize_coordinate, normalize_coordinate};
use log::*;
use ndarray::{Array2, Array3, ArrayView3, Axis};

/// A fixed number of keypoints for every image of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Keypoints {
    /// `(B, N, 2)` normalized `(x, y)` coordinates
    pub points: Array3<f32>,
    /// `(B, N)` scores, in descending order per image
    pub scores: Array2<f32>,
}

impl Keypoints {
    pub fn batch(&self) -> usize {
        self.scores.dim().0
    }

    pub fn len(&self) -> usize {
        self.scores.dim().1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Normalized location of the pixel at a row-major flat index.
pub fn index_to_point(index: usize, height: usize, width: usize) -> (f32, f32) {
    let x = (index % width) as f32;
    let y = (index / width) as f32;
    (normalize_coordinate(x, width), normalize_coordinate(y, height))
}

/// Row-major flat index of the pixel closest to a normalized location.
pub fn point_to_index(x: f32, y: f32, height: usize, width: usize) -> usize {
    let px = denormalize_coordinate(x, width).round() as usize;
    let py = denormalize_coordinate(y, height).round() as usize;
    py * width + px
}

/// Turns a dense score map into a sparse set of keypoints.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct KeypointExtractor {
    pub config: ExtractorConfig,
}

impl KeypointExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    /// Picks `feat_num` keypoints out of every `(H, W)` map of a `(B, H, W)` stack.
    pub fn extract(&self, score_map: ArrayView3<f32>) -> Result<Keypoints> {
        self.config.validate()?;
        let (batch, height, width) = score_map.dim();
        if height < 2 || width < 2 {
            return Err(shape_error("score map", "(B, H >= 2, W >= 2)", score_map.shape()));
        }
        let n = self.config.feat_num;
        if height * width < n {
            return Err(Error::InsufficientCandidates {
                what: "keypoints",
                requested: n,
                available: height * width,
            });
        }
        debug!(
            "Extracting {} keypoints from {} score maps of {}x{}",
            n, batch, width, height
        );
        let mut points = Array3::zeros((batch, n, 2));
        let mut scores = Array2::zeros((batch, n));
        for (b, map) in score_map.axis_iter(Axis(0)).enumerate() {
            let mut map = map.to_owned();
            constant_border(map.view_mut(), self.config.border, self.config.border_value);
            let suppressed = nms2d(map.view(), self.config.nms_window);
            let flat: Vec<f32> = suppressed.iter().copied().collect();
            for (i, (index, score)) in top_k(&flat, n, "keypoints")?.into_iter().enumerate() {
                let (x, y) = index_to_point(index, height, width);
                points[[b, i, 0]] = x;
                points[[b, i, 1]] = y;
                scores[[b, i]] = score;
            }
        }
        Ok(Keypoints { points, scores })
    }
}
