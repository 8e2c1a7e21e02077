//! Rigid-body poses in a shared reference frame.
//!
//! Positions are metres, orientations are unit quaternions. Container-relative
//! product poses are turned into world poses with [`Pose::compose`].

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance_to(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

impl Quaternion {
    pub fn identity() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            w: 1.0,
        }
    }

    /// Rotation of `angle` radians about the world Z axis.
    pub fn from_yaw(angle: f64) -> Self {
        let half = angle / 2.0;
        Self {
            x: 0.0,
            y: 0.0,
            z: half.sin(),
            w: half.cos(),
        }
    }

    pub fn normalized(&self) -> Self {
        let norm = (self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w).sqrt();
        if norm == 0.0 {
            return Self::identity();
        }
        Self {
            x: self.x / norm,
            y: self.y / norm,
            z: self.z / norm,
            w: self.w / norm,
        }
    }

    /// Hamilton product `self * rhs`.
    pub fn mul(&self, rhs: &Quaternion) -> Quaternion {
        Quaternion {
            w: self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            x: self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            y: self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            z: self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        }
    }

    /// Inverse rotation of a unit quaternion.
    pub fn conjugate(&self) -> Self {
        Self {
            x: -self.x,
            y: -self.y,
            z: -self.z,
            w: self.w,
        }
    }

    pub fn rotate(&self, p: &Point) -> Point {
        let q = self.normalized();
        let v = Quaternion {
            x: p.x,
            y: p.y,
            z: p.z,
            w: 0.0,
        };
        let r = q.mul(&v).mul(&q.conjugate());
        Point::new(r.x, r.y, r.z)
    }

    /// Smallest rotation angle between two orientations, in radians.
    pub fn angle_to(&self, other: &Quaternion) -> f64 {
        let a = self.normalized();
        let b = other.normalized();
        // q and -q encode the same rotation
        let dot = (a.x * b.x + a.y * b.y + a.z * b.z + a.w * b.w).abs().min(1.0);
        2.0 * dot.acos()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub position: Point,
    #[serde(default)]
    pub orientation: Quaternion,
}

impl Pose {
    pub fn new(position: Point, orientation: Quaternion) -> Self {
        Self {
            position,
            orientation,
        }
    }

    pub fn identity() -> Self {
        Self::default()
    }

    pub fn at(x: f64, y: f64, z: f64) -> Self {
        Self::new(Point::new(x, y, z), Quaternion::identity())
    }

    /// Express `local` (given in this pose's frame) in the parent frame.
    pub fn compose(&self, local: &Pose) -> Pose {
        let rotated = self.orientation.rotate(&local.position);
        Pose {
            position: Point::new(
                self.position.x + rotated.x,
                self.position.y + rotated.y,
                self.position.z + rotated.z,
            ),
            orientation: self.orientation.mul(&local.orientation).normalized(),
        }
    }

    /// The pose that undoes this one: `p.inverse().compose(&p.compose(&x)) == x`.
    pub fn inverse(&self) -> Pose {
        let orientation = self.orientation.normalized().conjugate();
        let back = orientation.rotate(&self.position);
        Pose {
            position: Point::new(-back.x, -back.y, -back.z),
            orientation,
        }
    }

    pub fn distance_to(&self, other: &Pose) -> f64 {
        self.position.distance_to(&other.position)
    }

    pub fn angle_to(&self, other: &Pose) -> f64 {
        self.orientation.angle_to(&other.orientation)
    }

    /// Same orientation, raised by `dz` along world Z.
    pub fn above(&self, dz: f64) -> Pose {
        Pose {
            position: Point::new(self.position.x, self.position.y, self.position.z + dz),
            orientation: self.orientation,
        }
    }
}

impl std::fmt::Display for Pose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({:.3}, {:.3}, {:.3})",
            self.position.x, self.position.y, self.position.z
        )
    }
}
