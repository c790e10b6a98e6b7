use nalgebra::{Matrix3, Point2, Point3, Vector2};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// This contains intrinsic camera parameters as per
/// [this Wikipedia page](https://en.wikipedia.org/wiki/Camera_resectioning#Intrinsic_parameters).
///
/// Pixel coordinates use the convention of the dense maps: `x` is the column,
/// `y` is the row, and `(0, 0)` is the center of the top-left pixel.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CameraIntrinsics {
    pub focals: Vector2<f64>,
    pub principal_point: Point2<f64>,
    pub skew: f64,
}

impl CameraIntrinsics {
    /// Creates camera intrinsics that would create an identity intrinsic matrix.
    /// This would imply that the pixel positions have an origin at `0,0`,
    /// the pixel distance unit is the focal length, pixels are square,
    /// and there is no skew.
    pub fn identity() -> Self {
        Self {
            focals: Vector2::new(1.0, 1.0),
            skew: 0.0,
            principal_point: Point2::new(0.0, 0.0),
        }
    }

    pub fn focals(self, focals: Vector2<f64>) -> Self {
        Self { focals, ..self }
    }

    pub fn focal(self, focal: f64) -> Self {
        Self {
            focals: Vector2::new(focal, focal),
            ..self
        }
    }

    pub fn principal_point(self, principal_point: Point2<f64>) -> Self {
        Self {
            principal_point,
            ..self
        }
    }

    pub fn skew(self, skew: f64) -> Self {
        Self { skew, ..self }
    }

    #[rustfmt::skip]
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.focals.x,  self.skew,      self.principal_point.x,
            0.0,            self.focals.y,  self.principal_point.y,
            0.0,            0.0,            1.0,
        )
    }

    /// Lifts a pixel with a known depth into the camera frame.
    ///
    /// ```
    /// use cv_projector::CameraIntrinsics;
    /// use cv_projector::nalgebra::{Point2, Vector2};
    /// let intrinsics = CameraIntrinsics {
    ///     focals: Vector2::new(800.0, 900.0),
    ///     principal_point: Point2::new(500.0, 600.0),
    ///     skew: 1.7,
    /// };
    /// let pixel = Point2::new(471.0, 322.0);
    /// let (back, depth) = intrinsics.project(intrinsics.unproject(pixel, 3.0));
    /// assert!((back - pixel).norm() < 1e-9);
    /// assert!((depth - 3.0).abs() < 1e-12);
    /// ```
    pub fn unproject(&self, pixel: Point2<f64>, depth: f64) -> Point3<f64> {
        let centered = pixel - self.principal_point;
        let y = centered.y / self.focals.y;
        let x = (centered.x - self.skew * y) / self.focals.x;
        Point3::new(x * depth, y * depth, depth)
    }

    /// Projects a camera-frame point onto the image, returning the pixel and its depth.
    ///
    /// The pixel is only meaningful when the depth is positive.
    pub fn project(&self, point: Point3<f64>) -> (Point2<f64>, f64) {
        let depth = point.z;
        let pixel = self.matrix() * (point.coords / depth);
        (Point2::new(pixel.x, pixel.y), depth)
    }
}
