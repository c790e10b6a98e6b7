use crate::config::DescriptorLossConfig;
use crate::cosine::pairwise_cosine;
use crate::error::{shape_error, Result};
use crate::nms::top_k;
use cv_projector::{denormalize_pixel_coordinates, Reprojection};
use log::*;
use ndarray::{Array3, Array4, ArrayView2, ArrayView3, Axis};

const COSINE_EPS: f32 = 1e-8;

/// Negative log-likelihood of a cosine similarity under a confidence-scaled
/// exponential model.
///
/// `alpha` blends between treating the pair as a match (`1`) and as a miss
/// (`0`); `sigma` is the uncertainty of the pair.
pub fn nll(sigma: f32, cos: f32, alpha: f32) -> f32 {
    let norm_const = (sigma * (1.0 - (-sigma.recip()).exp())).ln();
    ((1.0 - cos) * alpha + cos * (1.0 - alpha)) / sigma + norm_const
}

/// Match/miss blending factor: `1` at distance zero, `0.75` at `radius` and
/// `0` from `2·radius` onward.
pub fn blend(distance: f32, radius: f32) -> f32 {
    let d = distance.min(2.0 * radius);
    0.75 - (d - radius) * (d + radius) / (4.0 * radius * radius)
}

/// Match and miss masks over `(i, j, m, n)`: point `m` of frame `i` against
/// point `n` of frame `j`. Only frame pairs with `i < j` are ever set.
#[derive(Debug, Clone, PartialEq)]
pub struct PairClasses {
    pub matches: Array4<bool>,
    pub misses: Array4<bool>,
}

/// The pairwise descriptor loss of one step.
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorMatch {
    pub loss: f32,
    /// Loss of every matching pair
    pub match_losses: Vec<f32>,
    /// The hardest miss losses, twice as many as there are matches
    pub miss_losses: Vec<f32>,
    /// Number of missing pairs before mining
    pub n_miss: usize,
}

/// Contrastive loss pulling together descriptors of points that land on each
/// other across views and pushing apart the hardest of the rest.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DescriptorMatchLoss {
    pub config: DescriptorLossConfig,
}

impl DescriptorMatchLoss {
    pub fn new(config: DescriptorLossConfig) -> Self {
        Self { config }
    }

    /// Splits every valid cross-view pair into a match or a miss.
    pub fn classify_pairs(
        &self,
        points: ArrayView3<f32>,
        projection: &Reprojection,
        height: usize,
        width: usize,
    ) -> Result<PairClasses> {
        self.config.validate()?;
        let (batch, n, _) = points.dim();
        let mut matches = Array4::from_elem((batch, batch, n, n), false);
        let mut misses = Array4::from_elem((batch, batch, n, n), false);
        let radius = self.config.radius;
        for_each_pair(points, projection, height, width, |i, j, m, k, distance| {
            if distance <= radius {
                matches[[i, j, m, k]] = true;
            } else {
                misses[[i, j, m, k]] = true;
            }
        })?;
        Ok(PairClasses { matches, misses })
    }

    /// Computes the loss from `(B, N, D)` descriptors, `(B, N)` scores,
    /// `(B, N, 2)` normalized keypoints and their cross projection.
    pub fn forward(
        &self,
        descriptors: ArrayView3<f32>,
        scores: ArrayView2<f32>,
        points: ArrayView3<f32>,
        projection: &Reprojection,
        height: usize,
        width: usize,
    ) -> Result<DescriptorMatch> {
        self.config.validate()?;
        let (batch, n, _) = points.dim();
        if descriptors.dim().0 != batch || descriptors.dim().1 != n {
            return Err(shape_error(
                "descriptors",
                format!("({}, {}, D)", batch, n),
                descriptors.shape(),
            ));
        }
        if scores.dim() != (batch, n) {
            return Err(shape_error("scores", format!("({}, {})", batch, n), scores.shape()));
        }
        let DescriptorLossConfig { radius, eps } = self.config;

        let cosines: Vec<Vec<_>> = (0..batch)
            .map(|i| {
                (0..batch)
                    .map(|j| {
                        if i < j {
                            Some(pairwise_cosine(
                                descriptors.index_axis(Axis(0), i),
                                descriptors.index_axis(Axis(0), j),
                                COSINE_EPS,
                            ))
                        } else {
                            None
                        }
                    })
                    .collect()
            })
            .collect();

        let mut match_losses = vec![];
        let mut miss_losses = vec![];
        for_each_pair(points, projection, height, width, |i, j, m, k, distance| {
            let cos = match &cosines[i][j] {
                Some(cos) => cos[(m, k)],
                None => return,
            };
            let score_ave = (scores[(i, m)] + scores[(j, k)]).max(eps) / 2.0;
            let sigma = (-score_ave.ln()).max(eps);
            let loss = nll(sigma, cos, blend(distance, radius));
            if distance <= radius {
                match_losses.push(loss);
            } else {
                miss_losses.push(loss);
            }
        })?;

        let n_miss = miss_losses.len();
        let hardest = top_k(&miss_losses, 2 * match_losses.len(), "miss pairs")?;
        let miss_losses: Vec<f32> = hardest.into_iter().map(|(_, loss)| loss).collect();
        let loss = mean(&match_losses) + mean(&miss_losses);
        debug!(
            "descriptor loss {} from {} matches and {} of {} misses",
            loss,
            match_losses.len(),
            miss_losses.len(),
            n_miss
        );
        Ok(DescriptorMatch {
            loss,
            match_losses,
            miss_losses,
            n_miss,
        })
    }
}

/// Mean of a slice, zero when empty.
pub(crate) fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        0.0
    } else {
        (values.iter().map(|&v| v as f64).sum::<f64>() / values.len() as f64) as f32
    }
}

/// Visits every valid pair `(i, j, m, n)` with `i < j`, passing the pixel
/// distance between point `m` of frame `i` projected into frame `j` and
/// point `n` of frame `j`.
fn for_each_pair(
    points: ArrayView3<f32>,
    projection: &Reprojection,
    height: usize,
    width: usize,
    mut visit: impl FnMut(usize, usize, usize, usize, f32),
) -> Result<()> {
    let (batch, n, _) = points.dim();
    if projection.valid.dim() != (batch, batch, n) {
        return Err(shape_error(
            "reprojection",
            format!("({}, {}, {}, 2)", batch, batch, n),
            projection.coords.shape(),
        ));
    }
    let pixels = denormalize_pixel_coordinates(points, height, width)?;
    let projected = projected_pixels(projection, height, width)?;
    for i in 0..batch {
        for j in i + 1..batch {
            for m in 0..n {
                if !projection.valid[[i, j, m]] {
                    continue;
                }
                let (px, py) = (projected[[i * batch + j, m, 0]], projected[[i * batch + j, m, 1]]);
                for k in 0..n {
                    let dx = px - pixels[[j, k, 0]];
                    let dy = py - pixels[[j, k, 1]];
                    visit(i, j, m, k, (dx * dx + dy * dy).sqrt());
                }
            }
        }
    }
    Ok(())
}

fn projected_pixels(projection: &Reprojection, height: usize, width: usize) -> Result<Array3<f32>> {
    let (b0, b1, n, _) = projection.coords.dim();
    let flat = projection
        .coords
        .view()
        .into_shape((b0 * b1, n, 2))
        .map_err(|_| shape_error("reprojection", "contiguous (B0, B1, N, 2)", projection.coords.shape()))?;
    Ok(denormalize_pixel_coordinates(flat, height, width)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cv_projector::reprojection_from_parts;
    use ndarray::{Array2, Array3};

    /// Two frames where frame 0 lands exactly on frame 1 shifted by `shift` pixels.
    fn shifted_pair(n: usize, shift: f32) -> (Array3<f32>, Reprojection) {
        let (h, w) = (32usize, 32usize);
        let points = Array3::from_shape_fn((2, n, 2), |(_, k, c)| {
            let pixel = if c == 0 { (k * 3 + 2) as f32 } else { 5.0 };
            pixel * 2.0 / (if c == 0 { w } else { h } as f32 - 1.0) - 1.0
        });
        let mut coords = Array4::zeros((2, 2, n, 2));
        let mut valid = ndarray::Array3::from_elem((2, 2, n), true);
        for i in 0..2 {
            for j in 0..2 {
                for k in 0..n {
                    let dx = if i == j { 0.0 } else { shift * 2.0 / (w as f32 - 1.0) };
                    coords[[i, j, k, 0]] = points[[i, k, 0]] + dx;
                    coords[[i, j, k, 1]] = points[[i, k, 1]];
                }
            }
        }
        valid[[0, 1, n - 1]] = false;
        (points, reprojection_from_parts(coords, valid).unwrap())
    }

    #[test]
    fn blend_boundaries() {
        assert_relative_eq!(blend(0.0, 1.0), 1.0);
        assert_relative_eq!(blend(1.0, 1.0), 0.75);
        assert_relative_eq!(blend(2.0, 1.0), 0.0);
        assert_relative_eq!(blend(9.0, 1.0), 0.0);
    }

    #[test]
    fn confident_agreement_is_cheap() {
        let sigma = -(0.9f32).ln();
        assert!(nll(sigma, 1.0, 1.0) < nll(sigma, -1.0, 1.0));
        assert!(nll(sigma, -1.0, 0.0) < nll(sigma, 1.0, 0.0));
        assert!(nll(1e-6, 0.5, 0.5).is_finite());
    }

    #[test]
    fn pairs_partition_valid_entries() {
        let (points, projection) = shifted_pair(6, 0.5);
        let classes = DescriptorMatchLoss::default()
            .classify_pairs(points.view(), &projection, 32, 32)
            .unwrap();
        for (idx, &valid) in projection.valid.indexed_iter() {
            let (i, j, m) = idx;
            for k in 0..6 {
                let is_match = classes.matches[[i, j, m, k]];
                let is_miss = classes.misses[[i, j, m, k]];
                assert!(!(is_match && is_miss));
                assert_eq!(is_match || is_miss, valid && i < j);
            }
        }
        // Points are 3 pixels apart, so each valid projection matches exactly one point.
        assert_eq!(classes.matches.iter().filter(|&&v| v).count(), 5);
        assert!(classes.matches[[0, 1, 2, 2]]);
    }

    #[test]
    fn miss_mining_keeps_twice_the_matches() {
        let (points, projection) = shifted_pair(6, 0.0);
        let descriptors = Array3::from_shape_fn((2, 6, 4), |(_, k, d)| if d == k % 4 { 1.0 } else { 0.1 });
        let scores = Array2::from_elem((2, 6), 0.4f32);
        let result = DescriptorMatchLoss::default()
            .forward(descriptors.view(), scores.view(), points.view(), &projection, 32, 32)
            .unwrap();
        assert_eq!(result.match_losses.len(), 5);
        assert_eq!(result.miss_losses.len(), 10);
        assert_eq!(result.n_miss, 25);
        assert!(result.loss.is_finite());
        assert!(result.miss_losses.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn too_few_misses_fail() {
        let (points, projection) = shifted_pair(2, 0.0);
        let descriptors = Array3::from_elem((2, 2, 4), 1.0f32);
        let scores = Array2::from_elem((2, 2), 0.4f32);
        let result = DescriptorMatchLoss::default().forward(
            descriptors.view(),
            scores.view(),
            points.view(),
            &projection,
            32,
            32,
        );
        assert!(matches!(
            result,
            Err(crate::Error::InsufficientCandidates { requested: 2, available: 1, .. })
        ));
    }
}
