//! Three-dimensional position/vector primitive.
//!
//! [`Position`] is a small `Copy` value type used for grid points, source
//! locations and direction vectors alike. All angles follow the physics
//! convention: $\theta$ is the polar angle measured from $+z$ (the vertical
//! axis) and $\phi$ the azimuth measured from $+x$ towards $+y$.

use std::f64::consts::PI;
use std::ops::{Add, Mul, Neg, Sub};

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// A point or vector in 3D space (metres).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub const fn origin() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub const fn from_array(a: [f64; 3]) -> Self {
        Self::new(a[0], a[1], a[2])
    }

    /// Build a vector of length `r` pointing along the spherical direction
    /// $(\theta, \phi)$.
    pub fn from_spherical(r: f64, theta: f64, phi: f64) -> Self {
        let (st, ct) = theta.sin_cos();
        let (sp, cp) = phi.sin_cos();
        Self::new(r * st * cp, r * st * sp, r * ct)
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    pub fn to_vector(self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }

    pub fn from_vector(v: &Vector3<f64>) -> Self {
        Self::new(v.x, v.y, v.z)
    }

    /// Component by axis index (0 = x, 1 = y, 2 = z).
    pub fn component(&self, axis: usize) -> f64 {
        match axis {
            0 => self.x,
            1 => self.y,
            _ => self.z,
        }
    }

    pub fn with_component(mut self, axis: usize, value: f64) -> Self {
        match axis {
            0 => self.x = value,
            1 => self.y = value,
            _ => self.z = value,
        }
        self
    }

    pub fn dot(&self, other: &Position) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(&self, other: &Position) -> Position {
        Position::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    /// Euclidean length.
    pub fn norm(&self) -> f64 {
        self.dot(self).sqrt()
    }

    pub fn distance(&self, other: &Position) -> f64 {
        (*self - *other).norm()
    }

    /// Unit vector in the same direction, or `None` for a (near) zero vector.
    pub fn normalised(&self) -> Option<Position> {
        let len = self.norm();
        if len < 1e-300 {
            None
        } else {
            Some(*self * (1.0 / len))
        }
    }

    /// Polar angle from $+z$, in $[0, \pi]$.
    pub fn theta(&self) -> f64 {
        let r = self.norm();
        if r < 1e-300 {
            return 0.0;
        }
        (self.z / r).clamp(-1.0, 1.0).acos()
    }

    /// Azimuth from $+x$, wrapped into $[0, 2\pi)$.
    pub fn phi(&self) -> f64 {
        let p = self.y.atan2(self.x);
        if p < 0.0 {
            p + 2.0 * PI
        } else {
            p
        }
    }

    /// Angle between this vector and `axis` (radians, in $[0, \pi]$).
    pub fn angle_to(&self, axis: &Position) -> f64 {
        let denom = self.norm() * axis.norm();
        if denom < 1e-300 {
            return 0.0;
        }
        (self.dot(axis) / denom).clamp(-1.0, 1.0).acos()
    }

    /// Rotate about the vertical ($z$) axis by `angle` radians
    /// (counter-clockwise seen from $+z$).
    pub fn rotate_z(&self, angle: f64) -> Position {
        let (s, c) = angle.sin_cos();
        Position::new(c * self.x - s * self.y, s * self.x + c * self.y, self.z)
    }

    /// Approximate equality on every component.
    pub fn approx_eq(&self, other: &Position, tol: f64) -> bool {
        (self.x - other.x).abs() <= tol
            && (self.y - other.y).abs() <= tol
            && (self.z - other.z).abs() <= tol
    }
}

impl Add for Position {
    type Output = Position;
    fn add(self, rhs: Position) -> Position {
        Position::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Position {
    type Output = Position;
    fn sub(self, rhs: Position) -> Position {
        Position::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Neg for Position {
    type Output = Position;
    fn neg(self) -> Position {
        Position::new(-self.x, -self.y, -self.z)
    }
}

impl Mul<f64> for Position {
    type Output = Position;
    fn mul(self, rhs: f64) -> Position {
        Position::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl From<[f64; 3]> for Position {
    fn from(a: [f64; 3]) -> Self {
        Position::from_array(a)
    }
}

/// Orthonormal spherical basis $(\hat{r}, \hat{\theta}, \hat{\phi})$ at the
/// direction $(\theta, \phi)$.
pub fn spherical_basis(theta: f64, phi: f64) -> (Position, Position, Position) {
    let (st, ct) = theta.sin_cos();
    let (sp, cp) = phi.sin_cos();
    (
        Position::new(st * cp, st * sp, ct),
        Position::new(ct * cp, ct * sp, -st),
        Position::new(-sp, cp, 0.0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_rotate_z_round_trip() {
        let p = Position::new(1.3, -0.4, 2.2);
        for &angle in &[0.0, 0.3, PI / 2.0, 2.5, -1.1, 7.0] {
            let back = p.rotate_z(angle).rotate_z(-angle);
            assert!(back.approx_eq(&p, 1e-12), "angle {angle}: {back:?}");
        }
    }

    #[test]
    fn test_rotate_z_quarter_turn() {
        let p = Position::new(1.0, 0.0, 5.0).rotate_z(PI / 2.0);
        assert_abs_diff_eq!(p.x, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(p.y, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(p.z, 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_spherical_angles_round_trip() {
        let p = Position::from_spherical(2.0, 1.1, 4.0);
        assert_abs_diff_eq!(p.norm(), 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(p.theta(), 1.1, epsilon = 1e-12);
        assert_abs_diff_eq!(p.phi(), 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_spherical_basis_is_orthonormal() {
        let (r, t, f) = spherical_basis(0.7, 2.1);
        assert_abs_diff_eq!(r.norm(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(t.norm(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(f.norm(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(r.dot(&t), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(r.dot(&f), 0.0, epsilon = 1e-12);
        // r x theta = phi (right-handed)
        assert!(r.cross(&t).approx_eq(&f, 1e-12));
    }

    #[test]
    fn test_angle_to_axis() {
        let p = Position::new(1.0, 1.0, 0.0);
        assert_abs_diff_eq!(p.angle_to(&Position::new(1.0, 0.0, 0.0)), PI / 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(p.angle_to(&Position::new(0.0, 0.0, 1.0)), PI / 2.0, epsilon = 1e-12);
    }
}
