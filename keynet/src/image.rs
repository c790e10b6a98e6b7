use derive_more::{Deref, DerefMut};
use log::*;
use ndarray::{Array2, ArrayView2, ArrayView3};
use std::f32;
use wide::f32x4;

/// A single-channel float image stored row-major as `(height, width)`.
///
/// Score maps, depth maps, corner responses and pseudo-labels all travel
/// through the filters in this module as this type. Filters replicate the
/// edge pixels when the kernel reaches past the border.
#[derive(Debug, Clone, PartialEq, Deref, DerefMut)]
pub struct GrayFloatImage(pub Array2<f32>);

impl GrayFloatImage {
    /// Converts a `(3, H, W)` RGB image with values in `[0, 1]` to luminance.
    ///
    /// Uses the ITU-R BT.601 weights `0.299 R + 0.587 G + 0.114 B`.
    pub fn from_rgb(rgb: ArrayView3<f32>) -> Self {
        let (channels, height, width) = rgb.dim();
        debug_assert_eq!(channels, 3);
        trace!("Converting a {} x {} RGB image to grayscale", width, height);
        Self(Array2::from_shape_fn((height, width), |(y, x)| {
            0.299 * rgb[(0, y, x)] + 0.587 * rgb[(1, y, x)] + 0.114 * rgb[(2, y, x)]
        }))
    }

    pub fn width(&self) -> usize {
        self.0.dim().1
    }

    pub fn height(&self) -> usize {
        self.0.dim().0
    }
}

fn simd_kernel(kernel: &[f32]) -> Vec<f32x4> {
    kernel
        .chunks(4)
        .map(|chunk| {
            let data = [
                #[allow(clippy::get_first)]
                chunk.get(0).copied().unwrap_or(0.0),
                chunk.get(1).copied().unwrap_or(0.0),
                chunk.get(2).copied().unwrap_or(0.0),
                chunk.get(3).copied().unwrap_or(0.0),
            ];
            f32x4::new(data)
        })
        .collect()
}

fn apply_simd(window: &[f32], kernel_simd: &[f32x4]) -> f32 {
    window
        .chunks_exact(4)
        .map(|chunk| f32x4::new([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .zip(kernel_simd.iter())
        .fold(f32x4::splat(0.), |acc, (a, b)| a.mul_add(*b, acc))
        .reduce_add()
}

/// Correlates every row with `kernel`, replicating the edge pixels.
pub fn horizontal_filter(image: ArrayView2<f32>, kernel: &[f32]) -> Array2<f32> {
    let kernel_size = kernel.len();
    debug_assert!(kernel_size % 2 == 1);
    let kernel_half_size = kernel_size / 2;
    let (height, width) = image.dim();
    let mut output = Array2::zeros((height, width));
    if width == 0 {
        return output;
    }
    let kernel_simd = simd_kernel(kernel);
    let kernel_simd_size = 4 * ((kernel_size + 3) / 4);
    let kernel_simd_extra_elements = kernel_simd_size - kernel_size;
    let mut scratch = vec![0f32; width + kernel_half_size * 2 + kernel_simd_extra_elements];
    for (row_in, mut row_out) in image.outer_iter().zip(output.outer_iter_mut()) {
        // Prefill extended buffer with center and edge values.
        scratch[0..kernel_half_size].fill(row_in[0]);
        for (dst, &src) in scratch[kernel_half_size..kernel_half_size + width]
            .iter_mut()
            .zip(row_in.iter())
        {
            *dst = src;
        }
        scratch[kernel_half_size + width..2 * kernel_half_size + width].fill(row_in[width - 1]);
        scratch[2 * kernel_half_size + width..].fill(0.);
        scratch
            .windows(kernel_simd_size)
            .zip(row_out.iter_mut())
            .for_each(|(window, output)| *output = apply_simd(window, &kernel_simd));
    }
    output
}

/// Correlates every column with `kernel`, replicating the edge pixels.
pub fn vertical_filter(image: ArrayView2<f32>, kernel: &[f32]) -> Array2<f32> {
    // Columns of the image are rows of its transpose.
    horizontal_filter(image.t(), kernel).reversed_axes()
}

pub fn separable_filter(image: ArrayView2<f32>, h_kernel: &[f32], v_kernel: &[f32]) -> Array2<f32> {
    let h = horizontal_filter(image, h_kernel);
    vertical_filter(h.view(), v_kernel)
}

/// Correlates the image with a dense square kernel, replicating the edge pixels.
///
/// Only used for small kernels that are not separable (the laplacian).
pub fn filter2d(image: ArrayView2<f32>, kernel: ArrayView2<f32>) -> Array2<f32> {
    let (height, width) = image.dim();
    let (kh, kw) = kernel.dim();
    debug_assert!(kh % 2 == 1 && kw % 2 == 1);
    let (rh, rw) = ((kh / 2) as isize, (kw / 2) as isize);
    let clamp = |v: isize, extent: usize| v.clamp(0, extent as isize - 1) as usize;
    Array2::from_shape_fn((height, width), |(y, x)| {
        let mut acc = 0.0;
        for ((ky, kx), &weight) in kernel.indexed_iter() {
            let sy = clamp(y as isize + ky as isize - rh, height);
            let sx = clamp(x as isize + kx as isize - rw, width);
            acc += weight * image[(sy, sx)];
        }
        acc
    })
}

/// The Gaussian function.
///
/// # Arguments
/// * `x` - the offset.
/// * `r` - sigma.
/// # Return value
/// The kernel value at x.
fn gaussian(x: f32, r: f32) -> f32 {
    ((2.0 * f32::consts::PI).sqrt() * r).recip() * (-x.powi(2) / (2.0 * r.powi(2))).exp()
}

/// Generate a Gaussian kernel.
///
/// # Arguments
/// * `r` - sigma.
/// * `kernel_size` - The size of the kernel.
/// # Return value
/// The kernel (a vector).
pub fn gaussian_kernel(r: f32, kernel_size: usize) -> Vec<f32> {
    assert!(kernel_size % 2 == 1, "kernel_size must be odd");
    let mut kernel = vec![0f32; kernel_size];
    let half_width = (kernel_size / 2) as i32;
    let mut sum = 0f32;
    for i in -half_width..=half_width {
        let val = gaussian(i as f32, r);
        kernel[(i + half_width) as usize] = val;
        sum += val;
    }
    for val in kernel.iter_mut() {
        *val /= sum;
    }
    kernel
}

/// Perform Gaussian blur on an image with an explicit odd kernel size.
///
/// # Arguments
/// * `r` - sigma.
/// * `kernel_size` - The size of the kernel.
/// # Return value
/// The resulting image after the filter was applied.
pub fn gaussian_blur(image: ArrayView2<f32>, r: f32, kernel_size: usize) -> Array2<f32> {
    assert!(r > 0.0, "sigma must be > 0.0");
    let kernel = gaussian_kernel(r, kernel_size);
    separable_filter(image, &kernel, &kernel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2, Array3};

    #[test]
    fn gaussian_kernel_correct() {
        // test against known correct kernel
        let kernel = gaussian_kernel(3.0, 7);
        let known_correct_kernel = vec![
            0.1062_8852,
            0.1403_2133,
            0.1657_7007,
            0.1752_4014,
            0.1657_7007,
            0.1403_2133,
            0.1062_8852,
        ];
        for it in kernel.iter().zip(known_correct_kernel.iter()) {
            let (i, j) = it;
            assert!(f32::abs(*i - *j) < 0.0001);
        }
    }

    fn naive_horizontal(image: ArrayView2<f32>, kernel: &[f32]) -> Array2<f32> {
        let k = Array2::from_shape_vec((1, kernel.len()), kernel.to_vec()).unwrap();
        filter2d(image, k.view())
    }

    #[test]
    fn horizontal_filter_matches_dense() {
        let image = Array2::from_shape_fn((9, 13), |(y, x)| ((x * 7 + y * 3) % 11) as f32);
        let kernel = gaussian_kernel(1.5, 7);
        let ours = horizontal_filter(image.view(), &kernel);
        let dense = naive_horizontal(image.view(), &kernel);
        for (a, b) in ours.iter().zip(dense.iter()) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn vertical_filter_matches_dense() {
        let image = Array2::from_shape_fn((12, 5), |(y, x)| ((x * 5 + y * 2) % 7) as f32);
        let kernel = [1.0, 2.0, 1.0];
        let ours = vertical_filter(image.view(), &kernel);
        let k = array![[1.0f32], [2.0], [1.0]];
        let dense = filter2d(image.view(), k.view());
        for (a, b) in ours.iter().zip(dense.iter()) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn blur_preserves_constant_images() {
        let image = Array2::from_elem((6, 8), 0.25f32);
        let blurred = gaussian_blur(image.view(), 1.0, 7);
        assert!(blurred.iter().all(|v| (v - 0.25).abs() < 1e-6));
    }

    #[test]
    fn grayscale_weights() {
        let mut rgb = Array3::zeros((3, 1, 2));
        rgb[(0, 0, 0)] = 1.0;
        rgb[(1, 0, 1)] = 1.0;
        let gray = GrayFloatImage::from_rgb(rgb.view());
        assert!((gray[(0, 0)] - 0.299).abs() < 1e-6);
        assert!((gray[(0, 1)] - 0.587).abs() < 1e-6);
    }
}
