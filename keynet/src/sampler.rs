use crate::error::{shape_error, Result};
use crate::extractor::Keypoints;
use cv_projector::grid_sample_batch;
use log::*;
use ndarray::{concatenate, s, Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView4, Axis};
use rand::distributions::{Distribution, Uniform};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

/// A fully-connected layer `y = x W + b` with `W` stored as `(in, out)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Linear {
    pub weight: Array2<f32>,
    pub bias: Array1<f32>,
}

impl Linear {
    /// Uniform initialization in `±1/sqrt(inputs)`.
    pub fn random(inputs: usize, outputs: usize, rng: &mut impl Rng) -> Self {
        let bound = (inputs as f32).sqrt().recip();
        let dist = Uniform::new_inclusive(-bound, bound);
        Self {
            weight: Array2::from_shape_simple_fn((inputs, outputs), || dist.sample(rng)),
            bias: Array1::from_shape_simple_fn(outputs, || dist.sample(rng)),
        }
    }

    pub fn inputs(&self) -> usize {
        self.weight.nrows()
    }

    pub fn outputs(&self) -> usize {
        self.weight.ncols()
    }

    pub fn forward(&self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        if x.ncols() != self.inputs() || self.bias.len() != self.outputs() {
            return Err(shape_error(
                "linear input",
                format!("(N, {})", self.inputs()),
                x.shape(),
            ));
        }
        Ok(x.dot(&self.weight) + &self.bias)
    }
}

fn relu(mut x: Array2<f32>) -> Array2<f32> {
    x.mapv_inplace(|v| v.max(0.0));
    x
}

/// Two-layer perceptron lifting `[x, y, score]` into descriptor space.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionEncoder {
    pub hidden: Linear,
    pub output: Linear,
}

impl PositionEncoder {
    pub fn random(hidden: usize, dim: usize, rng: &mut impl Rng) -> Self {
        Self {
            hidden: Linear::random(3, hidden, rng),
            output: Linear::random(hidden, dim, rng),
        }
    }

    /// Encodes `(N, 2)` points with their `(N,)` scores into `(N, D)`.
    pub fn forward<'a>(&self, points: ArrayView2<'a, f32>, scores: ArrayView1<'a, f32>) -> Result<Array2<f32>> {
        let input = concatenate(Axis(1), &[points, scores.insert_axis(Axis(1))])
            .map_err(|_| shape_error("encoder input", "(N, 2) points with (N,) scores", points.shape()))?;
        let hidden = relu(self.hidden.forward(input.view())?);
        self.output.forward(hidden.view())
    }
}

/// Relational refinement of a set of descriptors.
///
/// `h = x W`; attention logits `h_i·a1 + h_j·a2` pass through a leaky ReLU of
/// slope `beta` and a softmax over `j`; the output is `alpha·h + (1 − alpha)·A h`.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphAttention {
    pub transform: Array2<f32>,
    pub att_src: Array1<f32>,
    pub att_dst: Array1<f32>,
    pub alpha: f32,
    pub beta: f32,
}

impl GraphAttention {
    pub fn random(inputs: usize, outputs: usize, rng: &mut impl Rng) -> Self {
        let layer = Linear::random(inputs, outputs, rng);
        let att = Linear::random(outputs, 2, rng);
        Self {
            transform: layer.weight,
            att_src: att.weight.column(0).to_owned(),
            att_dst: att.weight.column(1).to_owned(),
            alpha: 0.9,
            beta: 0.2,
        }
    }

    pub fn forward(&self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        let outputs = self.transform.ncols();
        if x.ncols() != self.transform.nrows()
            || self.att_src.len() != outputs
            || self.att_dst.len() != outputs
        {
            return Err(shape_error(
                "graph attention input",
                format!("(N, {})", self.transform.nrows()),
                x.shape(),
            ));
        }
        let h = x.dot(&self.transform);
        let src = h.dot(&self.att_src);
        let dst = h.dot(&self.att_dst);
        let n = h.nrows();
        let mut adj = Array2::from_shape_fn((n, n), |(i, j)| {
            let logit = src[i] + dst[j];
            if logit >= 0.0 {
                logit
            } else {
                self.beta * logit
            }
        });
        for mut row in adj.rows_mut() {
            let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
            row.mapv_inplace(|v| (v - max).exp());
            let sum = row.sum();
            row /= sum;
        }
        Ok(&h * self.alpha + &(adj.dot(&h) * (1.0 - self.alpha)))
    }
}

/// Reads descriptors off dense feature maps at the extracted keypoints.
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorSampler {
    pub encoder: PositionEncoder,
    /// Applied in order with a ReLU between consecutive layers
    pub graph: Vec<GraphAttention>,
}

impl DescriptorSampler {
    /// A sampler with freshly initialized weights and two attention layers.
    pub fn random(dim: usize, hidden: usize, seed: u64) -> Self {
        let mut rng = Pcg64::seed_from_u64(seed);
        let encoder = PositionEncoder::random(hidden, dim, &mut rng);
        let graph = (0..2)
            .map(|_| GraphAttention::random(dim, dim, &mut rng))
            .collect();
        Self { encoder, graph }
    }

    pub fn dim(&self) -> usize {
        self.encoder.output.outputs()
    }

    /// Produces `(B, N, D)` descriptors from `(B, D, H, W)` descriptor and
    /// residual maps.
    pub fn sample(
        &self,
        descriptor_map: ArrayView4<f32>,
        residual_map: ArrayView4<f32>,
        keypoints: &Keypoints,
    ) -> Result<Array3<f32>> {
        let (batch, channels, _, _) = descriptor_map.dim();
        if channels != self.dim() {
            return Err(shape_error(
                "descriptor map",
                format!("(B, {}, H, W)", self.dim()),
                descriptor_map.shape(),
            ));
        }
        if residual_map.dim() != descriptor_map.dim() {
            return Err(shape_error(
                "residual map",
                format!("{:?}", descriptor_map.shape()),
                residual_map.shape(),
            ));
        }
        if keypoints.batch() != batch {
            return Err(shape_error(
                "keypoints",
                format!("({}, N, 2)", batch),
                keypoints.points.shape(),
            ));
        }
        let points = keypoints.points.view();
        let mut descriptors = grid_sample_batch(descriptor_map, points)?;
        descriptors += &grid_sample_batch(residual_map, points)?;
        for b in 0..batch {
            let encoded = self.encoder.forward(
                points.index_axis(Axis(0), b),
                keypoints.scores.index_axis(Axis(0), b),
            )?;
            let mut x = &descriptors.index_axis(Axis(0), b) + &encoded;
            for (i, layer) in self.graph.iter().enumerate() {
                if i > 0 {
                    x = relu(x);
                }
                x = layer.forward(x.view())?;
            }
            descriptors.slice_mut(s![b, .., ..]).assign(&x);
        }
        trace!("sampled {:?} descriptors", descriptors.dim());
        Ok(descriptors)
    }
}
