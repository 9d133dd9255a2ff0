//! Radiating source elements.
//!
//! A [`SourceElement`] is a positioned, oriented radiator. Antennas carry a
//! shared [`RadiationPattern`] and a transmit power; clusters are isotropic
//! secondary radiators whose complex weight is referenced to a receiver
//! position. Each element computes the E/H field it contributes over a grid
//! into a freshly owned buffer.
//!
//! Field model for antennas (far/near combined spherical wave):
//!
//! $$
//! \mathbf{E}(\mathbf{r}) = C \frac{e^{jkr}}{r}
//!   \left( F_\theta \hat{\boldsymbol\theta} + F_\phi \hat{\boldsymbol\phi} \right),
//! \qquad
//! \mathbf{H} = \frac{\hat{\mathbf{r}} \times \mathbf{E}}{\eta_0}
//! $$
//!
//! where $(\theta, \phi)$ are measured in the element frame and $C$ follows
//! from the transmit power.

use std::f64::consts::PI;
use std::sync::Arc;

use ndarray::s;
use num_complex::Complex64;

use hybridizer_compute::{ComputeBackend, ComputeError, FIELD_COMPONENTS};
use hybridizer_geometry::{spherical_basis, Grid, Orientation, Position};
use hybridizer_patterns::{PatternKind, RadiationPattern};

use crate::error::{HybridError, Result};
use crate::types::{
    ClusterModel, FieldBuffers, SimulationParams, DIPOLE_RADIATION_RESISTANCE,
    FREE_SPACE_IMPEDANCE,
};

/// Complex 3-vector.
pub type CVec3 = [Complex64; 3];

const ZERO: Complex64 = Complex64::new(0.0, 0.0);

fn scale(v: &Position, c: Complex64) -> CVec3 {
    [c * v.x, c * v.y, c * v.z]
}

fn add(a: CVec3, b: CVec3) -> CVec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

/// $\hat{u} \times \mathbf{E} / \eta_0$ for a real unit vector $\hat{u}$.
fn magnetic_from(u: &Position, e: &CVec3) -> CVec3 {
    [
        (e[2] * u.y - e[1] * u.z) / FREE_SPACE_IMPEDANCE,
        (e[0] * u.z - e[2] * u.x) / FREE_SPACE_IMPEDANCE,
        (e[1] * u.x - e[0] * u.y) / FREE_SPACE_IMPEDANCE,
    ]
}

/// Projection of a complex vector onto a real direction.
pub fn project(v: &CVec3, dir: &Position) -> Complex64 {
    v[0] * dir.x + v[1] * dir.y + v[2] * dir.z
}

/// Unit $\hat\theta$ vector for the direction of `v`.
///
/// Opposite directions share the same $\hat\theta$, so the receiver-to-source
/// and source-to-receiver bases agree.
pub fn theta_hat(v: &Position) -> Position {
    spherical_basis(v.theta(), v.phi()).1
}

/// What an element is.
#[derive(Debug, Clone)]
pub enum SourceKind {
    /// Physical antenna radiating `power` watts (W/m² for plane waves).
    Antenna {
        pattern: Arc<dyn RadiationPattern>,
        power: f64,
    },
    /// Isotropic scatterer whose field equals `weight` at `receiver`.
    Cluster { weight: Complex64, receiver: Position },
    /// Passive receiver point used in receiver collections.
    Receiver,
}

/// A positioned, oriented source.
#[derive(Debug, Clone)]
pub struct SourceElement {
    position: Position,
    orientation: Orientation,
    kind: SourceKind,
}

impl SourceElement {
    pub fn antenna(
        position: Position,
        orientation: Orientation,
        pattern: Arc<dyn RadiationPattern>,
        power: f64,
    ) -> Self {
        Self {
            position,
            orientation,
            kind: SourceKind::Antenna { pattern, power },
        }
    }

    /// Cluster at `position`, oriented towards `receiver`.
    pub fn cluster(position: Position, weight: Complex64, receiver: Position) -> Self {
        Self {
            position,
            orientation: Orientation::facing(receiver - position),
            kind: SourceKind::Cluster { weight, receiver },
        }
    }

    pub fn receiver(position: Position) -> Self {
        Self {
            position,
            orientation: Orientation::identity(),
            kind: SourceKind::Receiver,
        }
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn set_orientation(&mut self, orientation: Orientation) {
        self.orientation = orientation;
    }

    pub fn kind(&self) -> &SourceKind {
        &self.kind
    }

    pub fn pattern(&self) -> Option<&Arc<dyn RadiationPattern>> {
        match &self.kind {
            SourceKind::Antenna { pattern, .. } => Some(pattern),
            _ => None,
        }
    }

    /// Transmit power of an antenna; zero for other kinds.
    pub fn power(&self) -> f64 {
        match &self.kind {
            SourceKind::Antenna { power, .. } => *power,
            _ => 0.0,
        }
    }

    pub fn set_power(&mut self, new_power: f64) {
        if let SourceKind::Antenna { power, .. } = &mut self.kind {
            *power = new_power;
        }
    }

    /// Receiver-referenced weight of a cluster.
    pub fn weight(&self) -> Option<Complex64> {
        match &self.kind {
            SourceKind::Cluster { weight, .. } => Some(*weight),
            _ => None,
        }
    }

    /// Field amplitude constant $C$ from the transmit power.
    ///
    /// Measured patterns carry no absolute calibration; they use $C = 1$.
    fn amplitude(pattern: &dyn RadiationPattern, power: f64) -> Complex64 {
        let eta = FREE_SPACE_IMPEDANCE;
        match pattern.kind() {
            PatternKind::HalfWaveDipole => {
                let current = (power / DIPOLE_RADIATION_RESISTANCE).sqrt();
                Complex64::new(0.0, eta * current / (2.0 * PI))
            }
            PatternKind::Isotropic => Complex64::new((eta * power / (2.0 * PI)).sqrt(), 0.0),
            PatternKind::PlaneWave => Complex64::new((2.0 * eta * power).sqrt(), 0.0),
            PatternKind::Measured => Complex64::new(1.0, 0.0),
        }
    }

    /// E and H contributed at `point`.
    ///
    /// # Arguments
    /// * `point` - Observation point (m).
    /// * `k` - Free-space wavenumber (rad/m).
    /// * `model` - Propagation model, used by clusters only.
    pub fn field_at(&self, point: &Position, k: f64, model: ClusterModel) -> Result<(CVec3, CVec3)> {
        let d = *point - self.position;
        let r = d.norm();
        match &self.kind {
            SourceKind::Receiver => Err(HybridError::Configuration(
                "receiver elements do not radiate".into(),
            )),
            SourceKind::Antenna { pattern, power } => {
                let c = Self::amplitude(pattern.as_ref(), *power);
                if pattern.kind() == PatternKind::PlaneWave {
                    let dir = self.orientation.boresight();
                    let pol = self.orientation.to_global(&Position::new(1.0, 0.0, 0.0));
                    let phasor = c * Complex64::new(0.0, k * d.dot(&dir)).exp();
                    let e = scale(&pol, phasor);
                    return Ok((e, magnetic_from(&dir, &e)));
                }
                if r < 1e-12 {
                    return Ok(([ZERO; 3], [ZERO; 3]));
                }
                let local = self.orientation.to_local(&d);
                let (theta, phi) = (local.theta(), local.phi());
                let (f_theta, f_phi) = pattern.gain_pair(theta, phi)?;
                let (_, th, ph) = spherical_basis(theta, phi);
                let th = self.orientation.to_global(&th);
                let ph = self.orientation.to_global(&ph);

                let prop = c * Complex64::new(0.0, k * r).exp() / r;
                let e = add(scale(&th, prop * f_theta), scale(&ph, prop * f_phi));
                let r_hat = d * (1.0 / r);
                Ok((e, magnetic_from(&r_hat, &e)))
            }
            SourceKind::Cluster { weight, receiver } => {
                let to_rx = *receiver - self.position;
                let r_rx = to_rx.norm();
                if r_rx < 1e-12 {
                    return Err(HybridError::Configuration(
                        "cluster coincides with its receiver".into(),
                    ));
                }
                match model {
                    ClusterModel::Spherical => {
                        if r < 1e-12 {
                            return Ok(([ZERO; 3], [ZERO; 3]));
                        }
                        let phasor = *weight
                            * (r_rx / r)
                            * Complex64::new(0.0, k * (r - r_rx)).exp();
                        let e = scale(&theta_hat(&d), phasor);
                        let r_hat = d * (1.0 / r);
                        Ok((e, magnetic_from(&r_hat, &e)))
                    }
                    ClusterModel::PlaneWave => {
                        let u = to_rx * (1.0 / r_rx);
                        let phasor =
                            *weight * Complex64::new(0.0, k * u.dot(&(*point - *receiver))).exp();
                        let e = scale(&theta_hat(&u), phasor);
                        Ok((e, magnetic_from(&u, &e)))
                    }
                }
            }
        }
    }

    /// Field of this element over every point of `grid`.
    ///
    /// Returns an owned buffer; near-field points are blanked to NaN when
    /// `params.prune_near_field` is set.
    pub fn compute_field(
        &self,
        grid: &Grid,
        params: &SimulationParams,
        backend: &dyn ComputeBackend,
    ) -> Result<FieldBuffers> {
        if let SourceKind::Receiver = self.kind {
            return Err(HybridError::Configuration(
                "receiver elements do not radiate".into(),
            ));
        }
        if let Some(pattern) = self.pattern() {
            if pattern.kind() == PatternKind::Measured && pattern.uncalibrated_notice() {
                log::warn!(
                    "Pattern '{}' has no absolute calibration; using unit feed current",
                    pattern.name()
                );
            }
        }

        let k = params.wavenumber();
        let model = params.cluster_model;
        let kernel = |i: usize| -> std::result::Result<[Complex64; FIELD_COMPONENTS], ComputeError> {
            let p = grid.point_at_flat(i);
            let (e, h) = self.field_at(&p, k, model).map_err(|err| ComputeError::Kernel {
                index: i,
                message: err.to_string(),
            })?;
            Ok([e[0], e[1], e[2], h[0], h[1], h[2]])
        };
        let values = backend.parallel_point_fill(grid.len(), &kernel)?;

        let [nx, ny, nz] = grid.shape();
        let reshape = |cols: std::ops::Range<usize>| {
            values
                .slice(s![.., cols])
                .to_owned()
                .into_shape((nx, ny, nz, 3))
                .map_err(|e| HybridError::Dimension(e.to_string()))
        };
        let mut field = FieldBuffers {
            e: reshape(0..3)?,
            h: reshape(3..6)?,
        };

        if params.prune_near_field {
            self.prune_near_field(grid, &mut field, params.wavelength());
        }
        Ok(field)
    }

    /// Radius inside which the far-field model is invalid: twice the
    /// Fraunhofer distance $2D^2/\lambda$. `None` for sources without extent.
    pub fn exclusion_radius(&self, wavelength: f64) -> Option<f64> {
        let size = self.pattern()?.size(wavelength)?;
        Some(2.0 * (2.0 * size * size / wavelength))
    }

    /// Set every point of `field` inside the exclusion radius to NaN.
    ///
    /// Returns the number of blanked points.
    pub fn prune_near_field(&self, grid: &Grid, field: &mut FieldBuffers, wavelength: f64) -> usize {
        let Some(radius) = self.exclusion_radius(wavelength) else {
            return 0;
        };
        let mut count = 0;
        for member in grid.contains_sphere(&self.position, radius) {
            if let Some(local) = grid.from_parent_index(member.index) {
                field.invalidate(local);
                count += 1;
            }
        }
        if count > 0 {
            log::debug!(
                "Blanked {} points within {:.4} m of source at {:?}",
                count,
                radius,
                self.position.to_array()
            );
        }
        count
    }
}
