//! This crate moves keypoints between posed depth frames.
//!
//! Supervising a keypoint network without labelled correspondences needs a
//! geometric stand-in for ground truth: a pixel of one frame, its depth, and
//! the poses of two cameras are enough to tell where that pixel should appear
//! in the other frame. The [`Projector`] trait captures that contract and
//! [`PinholeProjector`] implements it for ideal pinhole cameras.
//!
//! Points are exchanged in normalized image coordinates, where `-1` and `1`
//! are the centers of the outermost pixels (see [`normalize_coordinate`]).
//! Projections that fail (behind the camera, outside the image) are never
//! dropped or replaced with NaN; they are reported through the validity mask
//! of a [`Reprojection`].

mod coords;
mod error;
mod intrinsics;
mod pose;
mod projector;
mod reprojection;
mod sample;

pub use coords::*;
pub use error::*;
pub use intrinsics::*;
pub use nalgebra;
pub use pose::*;
pub use projector::*;
pub use reprojection::*;
pub use sample::*;
