//! Pattern file parsers.
//!
//! Supported formats:
//! - [`table`]: two header lines followed by 8 numeric columns sampled in
//!   degrees, gains in dB or linear units
//! - [`far_field`]: JSON far-field record keyed by field-group name

pub mod far_field;
pub mod table;

pub use far_field::{parse_far_field, FarFieldGroup};
pub use table::parse_table;

use num_complex::Complex64;

use crate::provider::PatternComponent;

/// Sampled pattern on a $(\theta, \phi)$ lattice, angles in radians.
///
/// Each sample carries both polarisation components as linear complex
/// phasors.
#[derive(Debug, Clone, Default)]
pub struct PatternTable {
    pub theta: Vec<f64>,
    pub phi: Vec<f64>,
    pub e_theta: Vec<Complex64>,
    pub e_phi: Vec<Complex64>,
}

impl PatternTable {
    pub fn len(&self) -> usize {
        self.theta.len()
    }

    pub fn is_empty(&self) -> bool {
        self.theta.is_empty()
    }

    pub fn push(&mut self, theta: f64, phi: f64, e_theta: Complex64, e_phi: Complex64) {
        self.theta.push(theta);
        self.phi.push(phi);
        self.e_theta.push(e_theta);
        self.e_phi.push(e_phi);
    }

    pub fn component(&self, component: PatternComponent) -> &[Complex64] {
        match component {
            PatternComponent::Theta => &self.e_theta,
            PatternComponent::Phi => &self.e_phi,
        }
    }

    /// Largest sample magnitude over both components.
    pub fn peak_magnitude(&self) -> f64 {
        self.e_theta
            .iter()
            .chain(&self.e_phi)
            .map(|v| v.norm())
            .fold(0.0, f64::max)
    }
}
