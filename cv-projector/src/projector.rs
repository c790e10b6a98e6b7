use crate::coords::{check_extent, denormalize_coordinate, normalize_coordinate};
use crate::sample::sample_bilinear;
use crate::{CameraIntrinsics, CameraToWorld, ProjectionError, Reprojection, Result};
use log::*;
use nalgebra::{Point2, Point3};
use ndarray::{s, Array2, Array3, Array4, ArrayView3, Axis};

/// Moves points between the normalized image space of posed depth frames and
/// the shared world frame.
///
/// Every method takes one pose and one set of intrinsics per batch entry.
pub trait Projector {
    /// Lifts `(B, N, 2)` normalized points into `(B, N, 3)` world points using
    /// each frame's own `(B, H, W)` depth map.
    fn pix2world(
        &self,
        points: ArrayView3<f32>,
        depth: ArrayView3<f32>,
        poses: &[CameraToWorld],
        intrinsics: &[CameraIntrinsics],
    ) -> Result<Array3<f32>>;

    /// Projects `(B, N, 3)` world points into frames of the given `(H, W)`
    /// size, returning `(B, N, 2)` normalized points and their `(B, N)` depth.
    fn world2pix(
        &self,
        world: ArrayView3<f32>,
        size: (usize, usize),
        poses: &[CameraToWorld],
        intrinsics: &[CameraIntrinsics],
    ) -> Result<(Array3<f32>, Array2<f32>)>;

    /// Projects every frame's points into every frame of the batch.
    ///
    /// A projection is valid when it lands in front of the target camera and
    /// inside `[-1, 1]²`.
    fn cartesian(
        &self,
        points: ArrayView3<f32>,
        depth: ArrayView3<f32>,
        poses: &[CameraToWorld],
        intrinsics: &[CameraIntrinsics],
    ) -> Result<Reprojection> {
        let (batch, n, _) = points.dim();
        let (_, height, width) = depth.dim();
        let world = self.pix2world(points, depth, poses, intrinsics)?;
        let world = src_repeat(world.view(), batch);
        let poses = dst_repeat(poses, batch);
        let intrinsics = dst_repeat(intrinsics, batch);
        let (coords, depths) =
            self.world2pix(world.view(), (height, width), &poses, &intrinsics)?;
        let valid = Array2::from_shape_fn((batch * batch, n), |(b, i)| {
            in_view(coords[[b, i, 0]], coords[[b, i, 1]], depths[[b, i]])
        });
        let coords = coords
            .into_shape((batch, batch, n, 2))
            .map_err(|_| shape_error("reprojection", "(B * B, N, 2)", &[batch * batch, n, 2]))?;
        let valid = valid
            .into_shape((batch, batch, n))
            .map_err(|_| shape_error("visibility", "(B * B, N)", &[batch * batch, n]))?;
        Ok(Reprojection { coords, valid })
    }
}

/// True if a projection is in front of the camera and inside the normalized image.
pub fn in_view(x: f32, y: f32, depth: f32) -> bool {
    depth > 0.0 && x.is_finite() && y.is_finite() && x.abs() <= 1.0 && y.abs() <= 1.0
}

/// Repeats every frame `times` times in place: `[a, b]` becomes `[a, a, b, b]`.
pub fn src_repeat(frames: ArrayView3<f32>, times: usize) -> Array3<f32> {
    let (batch, n, d) = frames.dim();
    let mut out = Array3::zeros((batch * times, n, d));
    for (b, frame) in frames.outer_iter().enumerate() {
        out.slice_mut(s![b * times..(b + 1) * times, .., ..])
            .assign(&frame.insert_axis(Axis(0)));
    }
    out
}

/// Repeats the whole sequence `times` times: `[a, b]` becomes `[a, b, a, b]`.
pub fn dst_repeat<T: Clone>(items: &[T], times: usize) -> Vec<T> {
    let mut out = Vec::with_capacity(items.len() * times);
    for _ in 0..times {
        out.extend_from_slice(items);
    }
    out
}

/// [`dst_repeat`] for a stack of frames.
pub fn dst_repeat_frames(frames: ArrayView3<f32>, times: usize) -> Array3<f32> {
    let (batch, h, w) = frames.dim();
    let mut out = Array3::zeros((batch * times, h, w));
    for t in 0..times {
        out.slice_mut(s![t * batch..(t + 1) * batch, .., ..])
            .assign(&frames);
    }
    out
}

fn shape_error(what: &'static str, expected: &'static str, actual: &[usize]) -> ProjectionError {
    ProjectionError::Shape {
        what,
        expected,
        actual: actual.to_vec(),
    }
}

fn check_batch<T>(what: &'static str, items: &[T], batch: usize) -> Result<()> {
    if items.len() != batch {
        return Err(ProjectionError::BatchMismatch {
            what,
            expected: batch,
            actual: items.len(),
        });
    }
    Ok(())
}

/// Ideal pinhole projection with per-frame intrinsics and depth maps measured
/// along the optical axis.
#[derive(Debug, Clone, Copy, Default)]
pub struct PinholeProjector;

impl PinholeProjector {
    pub fn new() -> Self {
        Self
    }
}

impl Projector for PinholeProjector {
    fn pix2world(
        &self,
        points: ArrayView3<f32>,
        depth: ArrayView3<f32>,
        poses: &[CameraToWorld],
        intrinsics: &[CameraIntrinsics],
    ) -> Result<Array3<f32>> {
        let (batch, n, coords) = points.dim();
        if coords != 2 {
            return Err(shape_error("points", "(B, N, 2)", points.shape()));
        }
        let (depth_batch, height, width) = depth.dim();
        if depth_batch != batch {
            return Err(ProjectionError::BatchMismatch {
                what: "depth maps",
                expected: batch,
                actual: depth_batch,
            });
        }
        check_extent(height, width)?;
        check_batch("poses", poses, batch)?;
        check_batch("intrinsics", intrinsics, batch)?;

        let mut world = Array3::zeros((batch, n, 3));
        for b in 0..batch {
            let map = depth.index_axis(Axis(0), b);
            for i in 0..n {
                let (x, y) = (points[[b, i, 0]], points[[b, i, 1]]);
                let d = sample_bilinear(map, x, y) as f64;
                let pixel = Point2::new(
                    denormalize_coordinate(x, width) as f64,
                    denormalize_coordinate(y, height) as f64,
                );
                let camera = intrinsics[b].unproject(pixel, d);
                let p = poses[b].transform(camera);
                world[[b, i, 0]] = p.x as f32;
                world[[b, i, 1]] = p.y as f32;
                world[[b, i, 2]] = p.z as f32;
            }
        }
        trace!("lifted {}x{} points into the world frame", batch, n);
        Ok(world)
    }

    fn world2pix(
        &self,
        world: ArrayView3<f32>,
        (height, width): (usize, usize),
        poses: &[CameraToWorld],
        intrinsics: &[CameraIntrinsics],
    ) -> Result<(Array3<f32>, Array2<f32>)> {
        let (batch, n, coords) = world.dim();
        if coords != 3 {
            return Err(shape_error("world points", "(B, N, 3)", world.shape()));
        }
        check_extent(height, width)?;
        check_batch("poses", poses, batch)?;
        check_batch("intrinsics", intrinsics, batch)?;

        let mut pixels = Array3::zeros((batch, n, 2));
        let mut depths = Array2::zeros((batch, n));
        for b in 0..batch {
            let to_camera = poses[b].inverse();
            for i in 0..n {
                let p = Point3::new(
                    world[[b, i, 0]] as f64,
                    world[[b, i, 1]] as f64,
                    world[[b, i, 2]] as f64,
                );
                let (pixel, z) = intrinsics[b].project(to_camera.transform(p));
                pixels[[b, i, 0]] = normalize_coordinate(pixel.x as f32, width);
                pixels[[b, i, 1]] = normalize_coordinate(pixel.y as f32, height);
                depths[[b, i]] = z as f32;
            }
        }
        Ok((pixels, depths))
    }
}

/// Convenience for callers holding `(B0, B1, N, 2)` arrays built elsewhere.
pub fn reprojection_from_parts(coords: Array4<f32>, valid: ndarray::Array3<bool>) -> Result<Reprojection> {
    let (b0, b1, n, two) = coords.dim();
    if two != 2 || valid.dim() != (b0, b1, n) {
        return Err(shape_error("reprojection", "(B0, B1, N, 2) with a (B0, B1, N) mask", coords.shape()));
    }
    Ok(Reprojection { coords, valid })
}
