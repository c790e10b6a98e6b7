use crate::error::{Error, Result};
use float_ord::FloatOrd;
use log::*;
use ndarray::{s, Array2, ArrayView2, ArrayViewMut2};
use std::cmp::Reverse;

/// Non-maximum suppression over a `window`×`window` neighbourhood.
///
/// A value survives only if it is strictly greater than every other value in
/// the window centered on it; everything else becomes zero. Neighbours outside
/// the map are ignored. Because the comparison is strict, plateaus vanish
/// entirely, so no two surviving non-zero values ever share a window.
pub fn nms2d(map: ArrayView2<f32>, window: usize) -> Array2<f32> {
    assert!(window % 2 == 1, "window must be odd");
    let (height, width) = map.dim();
    let radius = window / 2;
    Array2::from_shape_fn((height, width), |(y, x)| {
        let value = map[(y, x)];
        let rows = y.saturating_sub(radius)..(y + radius + 1).min(height);
        let cols = x.saturating_sub(radius)..(x + radius + 1).min(width);
        let neighbourhood = map.slice(s![rows, cols]);
        let (oy, ox) = (y.saturating_sub(radius), x.saturating_sub(radius));
        let is_max = neighbourhood
            .indexed_iter()
            .all(|((ny, nx), &other)| (ny + oy, nx + ox) == (y, x) || value > other);
        if is_max {
            value
        } else {
            0.0
        }
    })
}

/// Overwrites every value within `border` pixels of the edge with `value`.
pub fn constant_border(mut map: ArrayViewMut2<f32>, border: usize, value: f32) {
    let (height, width) = map.dim();
    for ((y, x), v) in map.indexed_iter_mut() {
        if y < border || x < border || y + border >= height || x + border >= width {
            *v = value;
        }
    }
}

/// Keeps only the maximum of every non-overlapping `patch`×`patch` tile.
///
/// The first maximum in row-major order wins a tie. Pixels of incomplete
/// tiles along the bottom and right edges are zeroed.
pub fn patch_max(map: ArrayView2<f32>, patch: usize) -> Array2<f32> {
    let (height, width) = map.dim();
    let mut out = Array2::zeros((height, width));
    for ty in 0..height / patch {
        for tx in 0..width / patch {
            let tile = map.slice(s![ty * patch..(ty + 1) * patch, tx * patch..(tx + 1) * patch]);
            let mut best = (0, 0);
            for ((y, x), &v) in tile.indexed_iter() {
                if v > tile[best] {
                    best = (y, x);
                }
            }
            out[(ty * patch + best.0, tx * patch + best.1)] = tile[best];
        }
    }
    out
}

/// Selects the `k` largest values of a flattened map.
///
/// Returns `(flat_index, value)` pairs in descending value order; equal values
/// are ordered by ascending flat index so the selection is reproducible.
pub fn top_k(values: &[f32], k: usize, what: &'static str) -> Result<Vec<(usize, f32)>> {
    if values.len() < k {
        return Err(Error::InsufficientCandidates {
            what,
            requested: k,
            available: values.len(),
        });
    }
    let mut order: Vec<usize> = (0..values.len()).collect();
    let key = |&i: &usize| (Reverse(FloatOrd(values[i])), i);
    if k < order.len() && k > 0 {
        order.select_nth_unstable_by_key(k - 1, key);
    }
    order.truncate(k);
    order.sort_unstable_by_key(key);
    trace!("selected the top {} of {} {}", k, values.len(), what);
    Ok(order.into_iter().map(|i| (i, values[i])).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn survivors_are_isolated() {
        let map = Array2::from_shape_fn((20, 20), |(y, x)| {
            (((x * 37 + y * 91) % 17) as f32) / 17.0
        });
        let window = 7;
        let suppressed = nms2d(map.view(), window);
        let survivors: Vec<(usize, usize)> = suppressed
            .indexed_iter()
            .filter(|(_, &v)| v > 0.0)
            .map(|(p, _)| p)
            .collect();
        assert!(!survivors.is_empty());
        for (i, a) in survivors.iter().enumerate() {
            for b in &survivors[i + 1..] {
                let close = a.0.abs_diff(b.0) <= window / 2 && a.1.abs_diff(b.1) <= window / 2;
                assert!(!close, "{:?} and {:?} share a window", a, b);
            }
        }
    }

    #[test]
    fn plateaus_are_suppressed() {
        let map = array![[0.5f32, 0.5, 0.0], [0.0, 0.0, 0.0], [0.0, 0.0, 0.9]];
        let suppressed = nms2d(map.view(), 3);
        assert_eq!(
            suppressed,
            array![[0.0f32, 0.0, 0.0], [0.0, 0.0, 0.0], [0.0, 0.0, 0.9]]
        );
    }

    #[test]
    fn border_is_overwritten() {
        let mut map = Array2::from_elem((6, 6), 1.0f32);
        constant_border(map.view_mut(), 2, 0.0);
        assert_eq!(map.sum(), 4.0);
        assert_eq!(map[(2, 2)], 1.0);
        assert_eq!(map[(1, 3)], 0.0);
    }

    #[test]
    fn one_value_per_patch() {
        let map = array![
            [0.1f32, 0.4, 0.2, 0.2, 9.0],
            [0.3, 0.4, 0.7, 0.1, 9.0],
            [9.0, 9.0, 9.0, 9.0, 9.0]
        ];
        let kept = patch_max(map.view(), 2);
        assert_eq!(
            kept,
            array![
                [0.0f32, 0.4, 0.0, 0.0, 0.0],
                [0.0, 0.0, 0.7, 0.0, 0.0],
                [0.0, 0.0, 0.0, 0.0, 0.0]
            ]
        );
    }

    #[test]
    fn top_k_breaks_ties_by_index() {
        let values = [0.5f32, 0.9, 0.5, 0.1, 0.9];
        let top = top_k(&values, 3, "scores").unwrap();
        assert_eq!(top, vec![(1, 0.9), (4, 0.9), (0, 0.5)]);
        assert!(matches!(
            top_k(&values, 6, "scores"),
            Err(Error::InsufficientCandidates { requested: 6, available: 5, .. })
        ));
    }
}
