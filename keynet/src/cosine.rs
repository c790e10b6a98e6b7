use ndarray::{Array1, Array2, ArrayView2, Axis};

/// Cosine similarity of every row of `x` `(M, D)` with every row of `y` `(N, D)`.
///
/// The product of the norms is floored at `eps²`, so zero vectors have a
/// similarity of zero rather than NaN.
pub fn pairwise_cosine(x: ArrayView2<f32>, y: ArrayView2<f32>, eps: f32) -> Array2<f32> {
    let xx = squared_norms(x);
    let yy = squared_norms(y);
    let mut xy = x.dot(&y.t());
    for ((m, n), v) in xy.indexed_iter_mut() {
        *v /= (xx[m] * yy[n]).max(eps * eps).sqrt();
    }
    xy
}

/// Euclidean distance of every row of `x` `(M, D)` to every row of `y` `(N, D)`.
pub fn cdist(x: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32> {
    Array2::from_shape_fn((x.nrows(), y.nrows()), |(m, n)| {
        x.row(m)
            .iter()
            .zip(y.row(n).iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt()
    })
}

fn squared_norms(x: ArrayView2<f32>) -> Array1<f32> {
    x.map_axis(Axis(1), |row| row.dot(&row))
}
