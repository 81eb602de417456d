//! Small vector/quaternion primitives for the attitude simulation.

use std::ops::{Add, AddAssign, Mul, Neg, Sub};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn dot(self, other: Self) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(self, other: Self) -> Self {
        Self {
            x: self.y * other.z - self.z * other.y,
            y: self.z * other.x - self.x * other.z,
            z: self.x * other.y - self.y * other.x,
        }
    }

    pub fn magnitude(self) -> f64 {
        self.dot(self).sqrt()
    }

    pub fn normalized(self) -> Self {
        let mag = self.magnitude();
        if mag > 0.0 {
            self * (1.0 / mag)
        } else {
            Self::ZERO
        }
    }
}

impl Add for Vec3 {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }
}

impl AddAssign for Vec3 {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

impl Sub for Vec3 {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        Self::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }
}

impl Mul<f64> for Vec3 {
    type Output = Self;

    fn mul(self, scalar: f64) -> Self {
        Self::new(self.x * scalar, self.y * scalar, self.z * scalar)
    }
}

impl Neg for Vec3 {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

/// Attitude quaternion, scalar-first.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quat {
    pub const IDENTITY: Self = Self {
        w: 1.0,
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    pub fn norm(self) -> f64 {
        (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn normalized(self) -> Self {
        let mag = self.norm();
        if mag > 0.0 {
            Self::new(self.w / mag, self.x / mag, self.y / mag, self.z / mag)
        } else {
            Self::IDENTITY
        }
    }

    pub fn conjugate(self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    /// Quaternion kinematics: q' = 1/2 * Omega(omega) * q, with omega the
    /// body-frame angular rate in rad/s.
    pub fn derivative(self, omega: Vec3) -> Self {
        Self::new(
            -0.5 * (self.x * omega.x + self.y * omega.y + self.z * omega.z),
            0.5 * (self.w * omega.x + self.y * omega.z - self.z * omega.y),
            0.5 * (self.w * omega.y + self.z * omega.x - self.x * omega.z),
            0.5 * (self.w * omega.z + self.x * omega.y - self.y * omega.x),
        )
    }

    /// One explicit Euler step followed by renormalisation.
    pub fn integrate(self, omega: Vec3, dt: f64) -> Self {
        let dq = self.derivative(omega);
        Self::new(
            self.w + dq.w * dt,
            self.x + dq.x * dt,
            self.y + dq.y * dt,
            self.z + dq.z * dt,
        )
        .normalized()
    }

    /// Rotate a vector from the reference frame into the body frame.
    pub fn rotate_into_body(self, v: Vec3) -> Vec3 {
        self.conjugate().rotate(v)
    }

    /// Rotate a vector by this quaternion (body to reference for an attitude
    /// quaternion).
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let qv = Vec3::new(self.x, self.y, self.z);
        let t = qv.cross(v) * 2.0;
        v + t * self.w + qv.cross(t)
    }
}

pub fn clamp(value: f64, limit: f64) -> f64 {
    value.clamp(-limit, limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cross_product_handedness() {
        let x = Vec3::new(1.0, 0.0, 0.0);
        let y = Vec3::new(0.0, 1.0, 0.0);
        assert_eq!(x.cross(y), Vec3::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn integration_preserves_unit_norm() {
        let mut q = Quat::IDENTITY;
        let omega = Vec3::new(0.1, -0.02, 0.3);
        for _ in 0..10_000 {
            q = q.integrate(omega, 1.0 / 80.0);
        }
        assert!((q.norm() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn rotate_identity_is_noop() {
        let v = Vec3::new(1.0, 2.0, 3.0);
        let rotated = Quat::IDENTITY.rotate(v);
        assert!((rotated - v).magnitude() < 1e-12);
    }

    #[test]
    fn rotate_into_body_inverts_rotate() {
        // 90 degrees about Z.
        let half = std::f64::consts::FRAC_PI_4;
        let q = Quat::new(half.cos(), 0.0, 0.0, half.sin());
        let v = Vec3::new(1.0, 0.0, 0.0);
        let there = q.rotate(v);
        let back = q.rotate_into_body(there);
        assert!((back - v).magnitude() < 1e-12);
    }
}
