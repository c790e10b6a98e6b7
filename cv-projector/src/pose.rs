use derive_more::{AsMut, AsRef, From, Into};
use nalgebra::{IsometryMatrix3, Point3, Rotation3, Vector3};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// This contains a camera pose, which is a pose of the camera relative to the world.
/// This transforms camera points (with depth as `z`) into world coordinates.
/// This also tells you where the camera is located and oriented in the world.
///
/// Frame poses handed to the supervision engine are always of this kind.
#[derive(Debug, Clone, Copy, PartialEq, AsMut, AsRef, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CameraToWorld(pub IsometryMatrix3<f64>);

/// This contains a world pose, which is a pose of the world relative to the camera.
/// This maps world points into camera points, changing an absolute position into
/// a vector relative to the camera.
#[derive(Debug, Clone, Copy, PartialEq, AsMut, AsRef, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct WorldToCamera(pub IsometryMatrix3<f64>);

impl CameraToWorld {
    /// Creates a pose with no change in position or orientation.
    pub fn identity() -> Self {
        Self(IsometryMatrix3::identity())
    }

    /// Create the pose from rotation and translation.
    pub fn from_parts(translation: Vector3<f64>, rotation: Rotation3<f64>) -> Self {
        Self(IsometryMatrix3::from_parts(translation.into(), rotation))
    }

    /// Takes the inverse of the pose.
    pub fn inverse(self) -> WorldToCamera {
        WorldToCamera(self.0.inverse())
    }

    /// Moves a point from the camera frame into the world frame.
    pub fn transform(self, point: Point3<f64>) -> Point3<f64> {
        self.0 * point
    }
}

impl WorldToCamera {
    /// Takes the inverse of the pose.
    pub fn inverse(self) -> CameraToWorld {
        CameraToWorld(self.0.inverse())
    }

    /// Moves a point from the world frame into the camera frame.
    pub fn transform(self, point: Point3<f64>) -> Point3<f64> {
        self.0 * point
    }
}
