//! Closed-form radiation patterns.
//!
//! These patterns bypass interpolation entirely. Values are normalised field
//! patterns $F(\theta, \phi)$; absolute scaling from transmit power is applied
//! by the source element.

use std::f64::consts::PI;

use num_complex::Complex64;

use crate::provider::{wrap_angles, PatternComponent, PatternError, PatternKind, RadiationPattern};

/// Half-wave dipole, isotropic radiator or ideal plane wave.
#[derive(Debug, Clone)]
pub struct ClosedFormPattern {
    name: String,
    kind: PatternKind,
}

impl ClosedFormPattern {
    pub fn half_wave_dipole() -> Self {
        Self {
            name: "dipole".into(),
            kind: PatternKind::HalfWaveDipole,
        }
    }

    pub fn isotropic() -> Self {
        Self {
            name: "isotropic".into(),
            kind: PatternKind::Isotropic,
        }
    }

    pub fn plane_wave() -> Self {
        Self {
            name: "plane_wave".into(),
            kind: PatternKind::PlaneWave,
        }
    }
}

/// $\theta$-polarised far-field pattern of a thin half-wave dipole:
/// $F_\theta = \cos(\tfrac{\pi}{2}\cos\theta) / \sin\theta$.
pub fn half_wave_dipole_factor(theta: f64) -> f64 {
    let s = theta.sin();
    if s.abs() < 1e-9 {
        return 0.0;
    }
    (0.5 * PI * theta.cos()).cos() / s
}

impl RadiationPattern for ClosedFormPattern {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> PatternKind {
        self.kind
    }

    fn gain(
        &self,
        theta: f64,
        phi: f64,
        component: PatternComponent,
    ) -> Result<Complex64, PatternError> {
        let (theta, _phi) = wrap_angles(theta, phi);
        let value = match (self.kind, component) {
            (_, PatternComponent::Phi) => 0.0,
            (PatternKind::HalfWaveDipole, PatternComponent::Theta) => half_wave_dipole_factor(theta),
            (PatternKind::Isotropic | PatternKind::PlaneWave, PatternComponent::Theta) => 1.0,
            (PatternKind::Measured, PatternComponent::Theta) => {
                return Err(PatternError::DataError(
                    "closed-form pattern cannot be of measured kind".into(),
                ))
            }
        };
        Ok(Complex64::new(value, 0.0))
    }

    fn size(&self, wavelength: f64) -> Option<f64> {
        match self.kind {
            PatternKind::HalfWaveDipole => Some(wavelength / 2.0),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_dipole_broadside_and_nulls() {
        let d = ClosedFormPattern::half_wave_dipole();
        let broadside = d.gain(PI / 2.0, 0.3, PatternComponent::Theta).unwrap();
        assert_abs_diff_eq!(broadside.re, 1.0, epsilon = 1e-12);
        let axial = d.gain(0.0, 0.0, PatternComponent::Theta).unwrap();
        assert_abs_diff_eq!(axial.norm(), 0.0, epsilon = 1e-12);
        let cross = d.gain(PI / 2.0, 0.0, PatternComponent::Phi).unwrap();
        assert_abs_diff_eq!(cross.norm(), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(d.size(0.01).unwrap(), 0.005, epsilon = 1e-15);
    }

    #[test]
    fn test_isotropic_is_uniform() {
        let iso = ClosedFormPattern::isotropic();
        for &(t, p) in &[(0.0, 0.0), (1.0, 2.0), (3.0, 5.0)] {
            assert_abs_diff_eq!(iso.gain(t, p, PatternComponent::Theta).unwrap().re, 1.0);
        }
        assert!(iso.size(0.01).is_none());
    }
}
