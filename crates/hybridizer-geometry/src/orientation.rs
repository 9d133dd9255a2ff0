//! Orientation of a radiating element relative to its canonical frame.
//!
//! Every radiation pattern is tabulated in a local frame whose propagation
//! (boresight) axis is $+z$. An [`Orientation`] is the rotation taking that
//! local frame into the global frame. Grid points are expressed in the local
//! frame with [`Orientation::to_local`] before a pattern lookup, and the local
//! polarisation basis is brought back with [`Orientation::to_global`].

use std::f64::consts::PI;

use nalgebra::{UnitQuaternion, Vector3};

use crate::position::Position;

/// A rigid rotation from the element frame to the global frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Orientation {
    rotation: UnitQuaternion<f64>,
}

impl Default for Orientation {
    fn default() -> Self {
        Self::identity()
    }
}

impl Orientation {
    /// Local and global frames coincide (boresight along $+z$).
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
        }
    }

    /// Rotate the canonical axis $+z$ onto `direction`.
    ///
    /// A zero direction yields the identity. The antiparallel case is a
    /// half-turn about $+x$.
    pub fn facing(direction: Position) -> Self {
        let Some(dir) = direction.normalised() else {
            return Self::identity();
        };
        let rotation = UnitQuaternion::rotation_between(&Vector3::z(), &dir.to_vector())
            .unwrap_or_else(|| UnitQuaternion::from_axis_angle(&Vector3::x_axis(), PI));
        Self { rotation }
    }

    /// Rotation by `angle` about the vertical axis.
    pub fn about_z(angle: f64) -> Self {
        Self {
            rotation: UnitQuaternion::from_axis_angle(&Vector3::z_axis(), angle),
        }
    }

    /// Additionally roll the element by `angle` about its own boresight.
    pub fn with_roll(&self, angle: f64) -> Self {
        let roll = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), angle);
        Self {
            rotation: self.rotation * roll,
        }
    }

    /// Compose: apply `self`, then `other`.
    pub fn then(&self, other: &Orientation) -> Orientation {
        Orientation {
            rotation: other.rotation * self.rotation,
        }
    }

    /// Boresight direction in the global frame.
    pub fn boresight(&self) -> Position {
        self.to_global(&Position::new(0.0, 0.0, 1.0))
    }

    /// Express a global-frame vector in the element frame.
    pub fn to_local(&self, v: &Position) -> Position {
        Position::from_vector(&self.rotation.inverse_transform_vector(&v.to_vector()))
    }

    /// Express an element-frame vector in the global frame.
    pub fn to_global(&self, v: &Position) -> Position {
        Position::from_vector(&self.rotation.transform_vector(&v.to_vector()))
    }
}
