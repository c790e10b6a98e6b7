use crate::image::{filter2d, separable_filter};
use ndarray::{Array2, ArrayView2};

/// Horizontal Sobel derivative, normalized so the kernel weights sum to one in
/// absolute value (a unit ramp has a derivative of one).
pub fn sobel_horizontal(image: ArrayView2<f32>) -> Array2<f32> {
    separable_filter(image, &[-0.5, 0., 0.5], &[0.25, 0.5, 0.25])
}

/// Vertical Sobel derivative, normalized like [`sobel_horizontal`].
pub fn sobel_vertical(image: ArrayView2<f32>) -> Array2<f32> {
    separable_filter(image, &[0.25, 0.5, 0.25], &[-0.5, 0., 0.5])
}

/// Normalized `kernel_size`×`kernel_size` laplacian.
///
/// Every neighbour weighs one and the center weighs `1 - kernel_size²`, the
/// whole kernel being divided by the sum of its absolute weights.
pub fn laplacian_kernel(kernel_size: usize) -> Array2<f32> {
    assert!(kernel_size % 2 == 1, "kernel_size must be odd");
    let mut kernel = Array2::ones((kernel_size, kernel_size));
    let mid = kernel_size / 2;
    kernel[(mid, mid)] = 1.0 - (kernel_size * kernel_size) as f32;
    let norm = kernel.iter().map(|w: &f32| w.abs()).sum::<f32>();
    kernel / norm
}

/// Second derivative response used to find score spikes.
pub fn laplacian(image: ArrayView2<f32>, kernel_size: usize) -> Array2<f32> {
    filter2d(image, laplacian_kernel(kernel_size).view())
}
