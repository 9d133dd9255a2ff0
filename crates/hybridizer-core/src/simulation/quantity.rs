//! Derived quantities evaluated from the accumulated fields.
//!
//! A [`Quantity`] names one derived array. [`DeterministicSimulation::get_value`]
//! evaluates it over the full grid and returns the values together with
//! their [`QuantityInfo`] (unit, sign, dB scaling).
//!
//! | Quantity | Definition |
//! |----------|------------|
//! | `Field` | Re/Im/abs/phase of one Cartesian component of E or H, or $|\mathbf{F}|$ |
//! | `PoyntingComplex` ($S$) | $c\,|\mathbf{E}\times\mathbf{H}^*|$ |
//! | `PoyntingMagnitude` ($S_m$) | $c\,|\mathbf{E}|\,|\mathbf{H}|$ |
//! | `PoyntingAverage` ($\langle S\rangle$) | $c\,|\Re(\mathbf{E}\times\mathbf{H}^*)|$ |
//! | `Sinc` | $\langle S\rangle_n$ averaged over a square of the configured side |
//! | `Sab` | $S_{inc}\,(1 - |\Gamma|^2)$ |
//!
//! Here $c$ is the [`PowerNormalisation`](crate::types::PowerNormalisation)
//! factor (1/2 for peak phasors) and
//! $\Gamma = (1-\sqrt{\varepsilon_r})/(1+\sqrt{\varepsilon_r})$ is the normal
//! incidence reflection coefficient of the tissue. Undefined (NaN) grid
//! points are skipped by the area average.

use ndarray::{Array3, Axis};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use super::DeterministicSimulation;
use crate::error::{HybridError, Result};
use crate::source::CVec3;
use crate::types::FieldBuffers;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    E,
    H,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    X,
    Y,
    Z,
    /// Euclidean norm of the complex vector.
    Norm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Part {
    Re,
    Im,
    Abs,
    Phase,
}

/// Catalogue of derived quantities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Quantity {
    Field {
        field: FieldKind,
        component: Component,
        part: Part,
    },
    PoyntingComplex,
    PoyntingMagnitude,
    PoyntingAverage,
    /// Incident power density through the plane normal to axis `normal`.
    Sinc { normal: usize },
    /// Absorbed power density for a tissue surface normal to axis `normal`.
    Sab { normal: usize },
}

impl Quantity {
    /// $|E|$, the usual quantity for field maps and hotspots.
    pub const E_NORM: Quantity = Quantity::Field {
        field: FieldKind::E,
        component: Component::Norm,
        part: Part::Abs,
    };

    /// Short label used in file names and logs.
    pub fn label(&self) -> String {
        match self {
            Quantity::Field {
                field,
                component,
                part,
            } => format!("{:?}_{:?}_{:?}", field, component, part).to_lowercase(),
            Quantity::PoyntingComplex => "S".into(),
            Quantity::PoyntingMagnitude => "S_m".into(),
            Quantity::PoyntingAverage => "<S>".into(),
            Quantity::Sinc { .. } => "Sinc".into(),
            Quantity::Sab { .. } => "Sab".into(),
        }
    }

    pub fn info(&self) -> QuantityInfo {
        match *self {
            Quantity::Field { field, part, .. } => {
                let unit = match (part, field) {
                    (Part::Phase, _) => "rad",
                    (_, FieldKind::E) => "V/m",
                    (_, FieldKind::H) => "A/m",
                };
                QuantityInfo {
                    unit,
                    always_positive: part == Part::Abs,
                    db_factor: (part == Part::Abs).then_some(20.0),
                }
            }
            _ => QuantityInfo {
                unit: "W/m^2",
                always_positive: true,
                db_factor: Some(10.0),
            },
        }
    }
}

/// Metadata returned with every derived array.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantityInfo {
    pub unit: &'static str,
    pub always_positive: bool,
    /// `10` for power quantities, `20` for field amplitudes, `None` where dB
    /// is meaningless.
    pub db_factor: Option<f64>,
}

/// A derived array over the grid, shape `[nx, ny, nz]`.
#[derive(Debug, Clone)]
pub struct QuantityValue {
    pub values: Array3<f64>,
    pub info: QuantityInfo,
}

impl QuantityValue {
    /// Values in dB, if the quantity has a dB scaling.
    pub fn to_db(&self) -> Option<Array3<f64>> {
        let factor = self.info.db_factor?;
        Some(self.values.mapv(|v| factor * v.abs().log10()))
    }

    /// Largest finite value and its index. NaN points are ignored.
    pub fn max_finite(&self) -> Option<(f64, [usize; 3])> {
        self.values
            .indexed_iter()
            .filter(|(_, v)| v.is_finite())
            .fold(None, |best, ((i, j, k), &v)| match best {
                Some((b, _)) if b >= v => best,
                _ => Some((v, [i, j, k])),
            })
    }
}

fn cross_conj(e: &CVec3, h: &CVec3) -> CVec3 {
    let hc = [h[0].conj(), h[1].conj(), h[2].conj()];
    [
        e[1] * hc[2] - e[2] * hc[1],
        e[2] * hc[0] - e[0] * hc[2],
        e[0] * hc[1] - e[1] * hc[0],
    ]
}

fn norm(v: &CVec3) -> f64 {
    v.iter().map(|c| c.norm_sqr()).sum::<f64>().sqrt()
}

/// Windowed sum of `half` cells either side along `axis`, via prefix sums.
fn window_sum(values: &mut Array3<f64>, axis: usize, half: usize) {
    let mut prefix = Vec::new();
    for mut lane in values.lanes_mut(Axis(axis)) {
        let n = lane.len();
        prefix.clear();
        prefix.push(0.0);
        let mut acc = 0.0;
        for v in lane.iter() {
            acc += v;
            prefix.push(acc);
        }
        for i in 0..n {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(n);
            lane[i] = prefix[hi] - prefix[lo];
        }
    }
}

/// Mean over a box of `half[a]` cells either side on each axis, skipping NaN.
///
/// Sums and counts are filtered separately, so the result is the exact mean
/// of the finite points inside the (boundary-clipped) window.
pub(crate) fn nan_box_mean(values: &Array3<f64>, half: [usize; 3]) -> Array3<f64> {
    let mut sums = values.mapv(|v| if v.is_finite() { v } else { 0.0 });
    let mut counts = values.mapv(|v| if v.is_finite() { 1.0 } else { 0.0 });
    for (axis, &h) in half.iter().enumerate() {
        if h > 0 {
            window_sum(&mut sums, axis, h);
            window_sum(&mut counts, axis, h);
        }
    }
    ndarray::Zip::from(&mut sums).and(&counts).for_each(|s, &c| {
        *s = if c > 0.0 { *s / c } else { f64::NAN };
    });
    sums
}

impl DeterministicSimulation {
    /// Evaluate a derived quantity over the grid.
    ///
    /// # Errors
    /// * [`HybridError::Prerequisite`] after [`Self::clear`].
    /// * [`HybridError::UnsupportedMode`] for a non-magnitude part of a
    ///   vector norm.
    /// * [`HybridError::Configuration`] for an invalid normal axis.
    pub fn get_value(&self, quantity: &Quantity) -> Result<QuantityValue> {
        let fields = self.fields_or_err()?;
        let c = self.params.power_normalisation.factor();
        let values = match *quantity {
            Quantity::Field {
                field,
                component,
                part,
            } => field_part(fields, field, component, part)?,
            Quantity::PoyntingComplex => {
                map_points(fields, |e, h| c * norm(&cross_conj(e, h)))
            }
            Quantity::PoyntingMagnitude => map_points(fields, |e, h| c * norm(e) * norm(h)),
            Quantity::PoyntingAverage => map_points(fields, |e, h| {
                let s = cross_conj(e, h);
                c * (s[0].re.powi(2) + s[1].re.powi(2) + s[2].re.powi(2)).sqrt()
            }),
            Quantity::Sinc { normal } => self.incident_power_density(fields, normal)?,
            Quantity::Sab { normal } => {
                let eps_sqrt = self.params.tissue_permittivity.sqrt();
                let one = Complex64::new(1.0, 0.0);
                let gamma = (one - eps_sqrt) / (one + eps_sqrt);
                let transmission = 1.0 - gamma.norm_sqr();
                self.incident_power_density(fields, normal)?
                    .mapv(|v| v * transmission)
            }
        };
        Ok(QuantityValue {
            values,
            info: quantity.info(),
        })
    }

    fn incident_power_density(&self, fields: &FieldBuffers, normal: usize) -> Result<Array3<f64>> {
        if normal > 2 {
            return Err(HybridError::Configuration(format!(
                "normal axis must be 0, 1 or 2, got {}",
                normal
            )));
        }
        let c = self.params.power_normalisation.factor();
        let normal_density = map_points(fields, |e, h| (c * cross_conj(e, h)[normal].re).abs());
        let step = self.grid.step();
        let shape = self.grid.shape();
        let mut half = [0; 3];
        for a in 0..3 {
            if a != normal && shape[a] > 1 {
                half[a] = (self.params.averaging_side / 2.0 / step[a]).round() as usize;
            }
        }
        Ok(nan_box_mean(&normal_density, half))
    }
}

fn map_points(fields: &FieldBuffers, f: impl Fn(&CVec3, &CVec3) -> f64) -> Array3<f64> {
    let [nx, ny, nz] = fields.shape();
    Array3::from_shape_fn((nx, ny, nz), |(i, j, k)| {
        f(&fields.e_at([i, j, k]), &fields.h_at([i, j, k]))
    })
}

fn field_part(
    fields: &FieldBuffers,
    field: FieldKind,
    component: Component,
    part: Part,
) -> Result<Array3<f64>> {
    let pick = |e: &CVec3, h: &CVec3| -> CVec3 {
        match field {
            FieldKind::E => *e,
            FieldKind::H => *h,
        }
    };
    let index = match component {
        Component::X => 0,
        Component::Y => 1,
        Component::Z => 2,
        Component::Norm => {
            if part != Part::Abs {
                return Err(HybridError::UnsupportedMode(format!(
                    "{:?} of a vector norm is undefined",
                    part
                )));
            }
            return Ok(map_points(fields, |e, h| norm(&pick(e, h))));
        }
    };
    Ok(map_points(fields, |e, h| {
        let v = pick(e, h)[index];
        match part {
            Part::Re => v.re,
            Part::Im => v.im,
            Part::Abs => v.norm(),
            Part::Phase => v.arg(),
        }
    }))
}
