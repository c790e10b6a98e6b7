use crate::error::{shape_error, Result};
use cv_projector::{
    dst_repeat, dst_repeat_frames, in_view, reprojection_from_parts, sample_maps, src_repeat,
    CameraIntrinsics, CameraToWorld, Projector, Reprojection,
};
use log::*;
use ndarray::{Array2, Array3, ArrayView3};

/// Co-visibility of a set of reference frames with a set of target frames.
#[derive(Debug, Clone, PartialEq)]
pub struct Covisibility {
    /// `(B0, B1)` number of reference points seen by each target frame
    pub counts: Array2<f32>,
    /// Where every reference point landed, when requested
    pub projections: Option<Reprojection>,
}

/// Counts how many world points of each reference frame are visible from
/// each target frame.
///
/// `world` holds `(B0, N, 3)` reference points and `depth` the `(B1, H, W)`
/// depth maps of the targets, whose poses and intrinsics are given one per
/// target. A point is visible from a target if it lands inside the image in
/// front of the camera and no deeper than `eps` behind the surface the target
/// observed there. The relation is not symmetric.
pub fn feature_pt_ncovis<P: Projector + ?Sized>(
    world: ArrayView3<f32>,
    depth: ArrayView3<f32>,
    poses: &[CameraToWorld],
    intrinsics: &[CameraIntrinsics],
    projector: &P,
    eps: f32,
    return_projections: bool,
) -> Result<Covisibility> {
    let (sources, n, coords) = world.dim();
    if coords != 3 {
        return Err(shape_error("world points", "(B0, N, 3)", world.shape()));
    }
    let (targets, height, width) = depth.dim();

    // Row `a * B1 + b` pairs reference `a` with target `b`.
    let world = src_repeat(world, targets);
    let poses = dst_repeat(poses, sources);
    let intrinsics = dst_repeat(intrinsics, sources);
    let depth = dst_repeat_frames(depth, sources);

    let (pixels, z) = projector.world2pix(world.view(), (height, width), &poses, &intrinsics)?;
    let observed = sample_maps(depth.view(), pixels.view())?;
    let valid = Array2::from_shape_fn((sources * targets, n), |(row, i)| {
        let (x, y, z) = (pixels[[row, i, 0]], pixels[[row, i, 1]], z[[row, i]]);
        in_view(x, y, z) && z <= observed[[row, i]] + eps
    });

    let valid = valid
        .into_shape((sources, targets, n))
        .map_err(|_| shape_error("visibility", "(B0 * B1, N)", &[sources * targets, n]))?;
    let projection = reprojection_from_parts(into_pairs(pixels, sources, targets)?, valid)?;
    let counts = projection.counts();
    trace!("co-visibility of {} references with {} targets: {}", sources, targets, counts);

    Ok(Covisibility {
        counts,
        projections: return_projections.then(|| projection),
    })
}

fn into_pairs(pixels: Array3<f32>, sources: usize, targets: usize) -> Result<ndarray::Array4<f32>> {
    let (_, n, _) = pixels.dim();
    pixels
        .into_shape((sources, targets, n, 2))
        .map_err(|_| shape_error("reprojection", "(B0 * B1, N, 2)", &[sources * targets, n, 2]))
}
