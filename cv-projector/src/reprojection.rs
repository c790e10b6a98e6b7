use ndarray::{Array3, Array4, ArrayView1, Axis};

/// Points of a set of source frames projected into a set of target frames.
///
/// `coords[[src, dst, n]]` is the normalized `(x, y)` location of point `n`
/// of frame `src` when seen from frame `dst`. Whether that location can be
/// trusted is recorded in `valid[[src, dst, n]]`; coordinates of invalid
/// entries are left as computed and must never be read without checking the
/// mask first.
#[derive(Debug, Clone, PartialEq)]
pub struct Reprojection {
    pub coords: Array4<f32>,
    pub valid: Array3<bool>,
}

impl Reprojection {
    pub fn sources(&self) -> usize {
        self.valid.dim().0
    }

    pub fn targets(&self) -> usize {
        self.valid.dim().1
    }

    pub fn points(&self) -> usize {
        self.valid.dim().2
    }

    /// The coordinate of one entry, or `None` if the projection failed.
    pub fn get(&self, src: usize, dst: usize, n: usize) -> Option<(f32, f32)> {
        if self.valid[[src, dst, n]] {
            Some((
                self.coords[[src, dst, n, 0]],
                self.coords[[src, dst, n, 1]],
            ))
        } else {
            None
        }
    }

    /// The validity mask of the points of `src` projected into `dst`.
    pub fn valid_row(&self, src: usize, dst: usize) -> ArrayView1<bool> {
        self.valid.index_axis(Axis(0), src).index_axis_move(Axis(0), dst)
    }

    /// Number of valid projections for every `(src, dst)` pair.
    pub fn counts(&self) -> ndarray::Array2<f32> {
        self.valid
            .map_axis(Axis(2), |row| row.iter().filter(|&&v| v).count() as f32)
    }
}
