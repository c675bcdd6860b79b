use std::ops::Mul;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::constants::EPSILON;

/// Quaternion `(w, x, y, z)` used as the orientation of a wave pattern.
///
/// Constructors normalize; `from_raw` is the one escape hatch, used when a
/// persisted value has to be checked against the unit-norm invariant rather
/// than silently repaired. Multiplication is the Hamilton product and does
/// not commute.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl PartialEq for Quaternion {
    fn eq(&self, other: &Self) -> bool {
        (self.w - other.w).abs() < EPSILON
            && (self.x - other.x).abs() < EPSILON
            && (self.y - other.y).abs() < EPSILON
            && (self.z - other.z).abs() < EPSILON
    }
}

impl Quaternion {
    /// Create a new quaternion, automatically normalized.
    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }.normalize()
    }

    /// Create a quaternion exactly as given, without normalizing.
    pub fn from_raw(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    /// Identity quaternion (1, 0, 0, 0).
    pub fn identity() -> Self {
        Self {
            w: 1.0,
            x: 0.0,
            y: 0.0,
            z: 0.0,
        }
    }

    pub fn norm(self) -> f64 {
        self.dot(self).sqrt()
    }

    pub fn is_unit(self, tolerance: f64) -> bool {
        let norm = self.norm();
        norm.is_finite() && (norm - 1.0).abs() <= tolerance
    }

    /// Normalize to unit length. Returns identity if near-zero or non-finite.
    pub fn normalize(self) -> Self {
        let norm = self.norm();
        if norm < EPSILON || !norm.is_finite() {
            return Self::identity();
        }
        Self {
            w: self.w / norm,
            x: self.x / norm,
            y: self.y / norm,
            z: self.z / norm,
        }
    }

    /// 4D dot product.
    pub fn dot(self, other: Self) -> f64 {
        self.w * other.w + self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn conjugate(self) -> Self {
        Self {
            w: self.w,
            x: -self.x,
            y: -self.y,
            z: -self.z,
        }
    }

    /// Geodesic distance on S³. Range: [0, π].
    /// Uses abs(dot) so q and -q are the same point.
    pub fn angular_distance(self, other: Self) -> f64 {
        let d = self.dot(other).abs().clamp(-1.0, 1.0);
        2.0 * d.acos()
    }

    /// Fractional rotation `self^t` of a unit quaternion.
    ///
    /// `t >= 1` returns `self` unchanged and `t <= 0` returns the identity.
    /// In between, the rotation angle is scaled along the shorter arc.
    pub fn powf(self, t: f64) -> Self {
        if t >= 1.0 {
            return self;
        }
        if t <= 0.0 {
            return Self::identity();
        }

        let q = if self.w < 0.0 { -self } else { self };
        let sin_half = (q.x * q.x + q.y * q.y + q.z * q.z).sqrt();
        if sin_half < EPSILON {
            return Self::identity();
        }

        let half_angle = sin_half.atan2(q.w);
        let scaled = half_angle * t;
        let k = scaled.sin() / sin_half;

        Self {
            w: scaled.cos(),
            x: q.x * k,
            y: q.y * k,
            z: q.z * k,
        }
        .normalize()
    }

    /// Uniform random quaternion on S³ using Shoemake's method.
    pub fn random(rng: &mut impl Rng) -> Self {
        let s1: f64 = rng.random();
        let t1 = std::f64::consts::TAU * rng.random::<f64>();
        let t2 = std::f64::consts::TAU * rng.random::<f64>();

        let r1 = (1.0 - s1).sqrt();
        let r2 = s1.sqrt();

        Self {
            w: r1 * t1.sin(),
            x: r1 * t1.cos(),
            y: r2 * t2.sin(),
            z: r2 * t2.cos(),
        }
        .normalize()
    }

    /// Convert to [w, x, y, z] array for serialization.
    pub fn to_array(self) -> [f64; 4] {
        [self.w, self.x, self.y, self.z]
    }
}

impl std::ops::Neg for Quaternion {
    type Output = Self;

    fn neg(self) -> Self {
        Self {
            w: -self.w,
            x: -self.x,
            y: -self.y,
            z: -self.z,
        }
    }
}

/// Hamilton product (quaternion multiplication).
impl Mul for Quaternion {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        Self {
            w: self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            x: self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            y: self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            z: self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        }
    }
}
