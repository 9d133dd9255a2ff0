//! Radiation pattern trait.
//!
//! Every antenna type implements [`RadiationPattern`], which returns the
//! complex far-field pattern component at a local direction $(\theta, \phi)$.
//! Patterns are immutable once constructed and are shared read-only (behind
//! an `Arc`) by every source element of the same antenna type.

use std::f64::consts::PI;

use num_complex::Complex64;
use thiserror::Error;

/// Errors from pattern construction and lookup.
#[derive(Debug, Error)]
pub enum PatternError {
    #[error("Failed to read pattern file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error at line {line}: {message}")]
    Format { line: usize, message: String },

    #[error("Invalid far-field record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Pattern not found: {0}")]
    NotFound(String),

    #[error("Data error: {0}")]
    DataError(String),
}

/// Which family a pattern belongs to. Drives power normalisation and the
/// propagation model used by source elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    /// Thin half-wave dipole along the local $z$ axis.
    HalfWaveDipole,
    /// Equal radiation in every direction.
    Isotropic,
    /// Ideal plane wave travelling along the local $+z$ axis.
    PlaneWave,
    /// Measured or full-wave derived table (no absolute calibration).
    Measured,
}

/// Polarisation component of a pattern lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternComponent {
    Theta,
    Phi,
}

impl PatternComponent {
    pub fn index(self) -> usize {
        match self {
            PatternComponent::Theta => 0,
            PatternComponent::Phi => 1,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PatternComponent::Theta => "theta",
            PatternComponent::Phi => "phi",
        }
    }
}

/// Directional gain/phase model of one antenna type.
pub trait RadiationPattern: Send + Sync + std::fmt::Debug {
    /// Antenna type name (registry key).
    fn name(&self) -> &str;

    fn kind(&self) -> PatternKind;

    /// Complex pattern value of one polarisation component at the local
    /// direction $(\theta, \phi)$. Angles are wrapped before lookup.
    fn gain(
        &self,
        theta: f64,
        phi: f64,
        component: PatternComponent,
    ) -> Result<Complex64, PatternError>;

    /// Largest physical dimension of the antenna (metres), used for the
    /// Fraunhofer distance. `None` when the pattern has no physical extent.
    fn size(&self, wavelength: f64) -> Option<f64>;

    /// Whether the caller should report this pattern's missing absolute
    /// calibration now. Patterns that track it return `true` once.
    fn uncalibrated_notice(&self) -> bool {
        self.kind() == PatternKind::Measured
    }

    /// Both polarisation components at once.
    fn gain_pair(&self, theta: f64, phi: f64) -> Result<(Complex64, Complex64), PatternError> {
        Ok((
            self.gain(theta, phi, PatternComponent::Theta)?,
            self.gain(theta, phi, PatternComponent::Phi)?,
        ))
    }
}

/// Wrap a direction so that $\theta \in [0, \pi]$ and $\phi \in [0, 2\pi)$.
///
/// A polar angle beyond $\pi$ is reflected through the pole, which turns the
/// azimuth by half a revolution.
pub fn wrap_angles(theta: f64, phi: f64) -> (f64, f64) {
    let two_pi = 2.0 * PI;
    let mut t = theta.rem_euclid(two_pi);
    let mut p = phi;
    if t > PI {
        t = two_pi - t;
        p += PI;
    }
    (t, p.rem_euclid(two_pi))
}
