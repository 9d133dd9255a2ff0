//! Core types shared across the hybridizer engine.
//!
//! Physical constants, simulation parameters and the complex field buffers
//! that a simulation accumulates into. All quantities are SI (metres, hertz,
//! watts, V/m, A/m).

use ndarray::{s, Array4, ArrayView4};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// Speed of light in vacuum (m/s).
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Free-space wave impedance $\eta_0 = \mu_0 c$ (Ω).
pub const FREE_SPACE_IMPEDANCE: f64 = 376.730_313_668;

/// Half the radiation resistance of a thin half-wave dipole (Ω), so that
/// $P = 36.4\,I^2$ for peak feed current $I$.
pub const DIPOLE_RADIATION_RESISTANCE: f64 = 36.4;

/// Below this many cells per wavelength the grid is considered too coarse.
pub const MIN_CELLS_PER_WAVELENGTH: f64 = 10.0;

/// Wavelength (m) at `frequency` (Hz).
pub fn wavelength(frequency: f64) -> f64 {
    SPEED_OF_LIGHT / frequency
}

/// Free-space wavenumber $k = 2\pi f / c$ (rad/m).
pub fn wavenumber(frequency: f64) -> f64 {
    2.0 * std::f64::consts::PI * frequency / SPEED_OF_LIGHT
}

/// Polarisation sampled by receivers on 2D grids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Polarisation {
    /// Transverse magnetic: $E_z$ normal to the simulation plane.
    #[default]
    TM,
    /// Transverse electric: in-plane E.
    TE,
}

/// Propagation model used by cluster sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterModel {
    /// Exact spherical decay from the cluster position.
    #[default]
    Spherical,
    /// Plane wave arriving from the cluster's direction of arrival.
    PlaneWave,
}

/// Beamforming scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrecodingScheme {
    /// Maximum-ratio transmission (matched filter).
    #[default]
    Mrt,
    /// Zero forcing (channel inversion).
    Zf,
}

/// Phasor convention for power-density quantities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerNormalisation {
    /// Peak phasors: $\langle S \rangle = \tfrac{1}{2}\Re(E \times H^*)$.
    #[default]
    Peak,
    /// RMS phasors: $\langle S \rangle = \Re(E \times H^*)$.
    Rms,
}

impl PowerNormalisation {
    pub fn factor(self) -> f64 {
        match self {
            PowerNormalisation::Peak => 0.5,
            PowerNormalisation::Rms => 1.0,
        }
    }
}

/// Memory-bounded evaluation: per-source fields are only computed on thin
/// slabs at the volume faces and on boxes around each receiver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SliceConfig {
    /// Thickness of each face slab (m).
    pub face_thickness: f64,
    /// Edge length of the box around each receiver (m).
    pub receiver_box: f64,
}

/// Parameters of one deterministic simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationParams {
    /// Carrier frequency (Hz).
    pub frequency: f64,
    pub polarisation: Polarisation,
    pub cluster_model: ClusterModel,
    pub precoding: PrecodingScheme,
    /// Blank grid points inside twice the Fraunhofer distance of each source.
    pub prune_near_field: bool,
    /// Replace channel phases with uniform random values.
    pub phase_scrambling: bool,
    pub scramble_seed: u64,
    pub power_normalisation: PowerNormalisation,
    /// Side of the square averaging area for Sinc/Sab (m).
    pub averaging_side: f64,
    /// Complex relative permittivity of the exposed tissue, used by Sab.
    pub tissue_permittivity: Complex64,
    pub sliced: Option<SliceConfig>,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            frequency: 28e9,
            polarisation: Polarisation::TM,
            cluster_model: ClusterModel::Spherical,
            precoding: PrecodingScheme::Mrt,
            prune_near_field: true,
            phase_scrambling: false,
            scramble_seed: 0,
            power_normalisation: PowerNormalisation::Peak,
            averaging_side: 0.02,
            // Dry skin near 28 GHz.
            tissue_permittivity: Complex64::new(16.55, 16.21),
            sliced: None,
        }
    }
}

impl SimulationParams {
    pub fn wavelength(&self) -> f64 {
        wavelength(self.frequency)
    }

    pub fn wavenumber(&self) -> f64 {
        wavenumber(self.frequency)
    }
}

/// Complex E and H vectors on a grid, shape `[nx, ny, nz, 3]`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldBuffers {
    pub e: Array4<Complex64>,
    pub h: Array4<Complex64>,
}

impl FieldBuffers {
    /// Zero-initialised buffers for a grid of `shape`.
    pub fn zeros(shape: [usize; 3]) -> Self {
        let dims = (shape[0], shape[1], shape[2], 3);
        Self {
            e: Array4::zeros(dims),
            h: Array4::zeros(dims),
        }
    }

    pub fn shape(&self) -> [usize; 3] {
        let s = self.e.shape();
        [s[0], s[1], s[2]]
    }

    pub fn len(&self) -> usize {
        let s = self.shape();
        s[0] * s[1] * s[2]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `self += weight * other`, elementwise.
    pub fn add_scaled(&mut self, weight: Complex64, other: &FieldBuffers) {
        self.e.scaled_add(weight, &other.e);
        self.h.scaled_add(weight, &other.h);
    }

    /// Overwrite the slab starting at `offset` with `slab`.
    pub fn write_slab(&mut self, offset: [usize; 3], slab: &FieldBuffers) {
        let [nx, ny, nz] = slab.shape();
        let [ox, oy, oz] = offset;
        let region = s![ox..ox + nx, oy..oy + ny, oz..oz + nz, ..];
        self.e.slice_mut(region).assign(&slab.e);
        self.h.slice_mut(region).assign(&slab.h);
    }

    /// View of the sub-block starting at `offset` with `shape` points.
    pub fn block(
        &self,
        offset: [usize; 3],
        shape: [usize; 3],
    ) -> (ArrayView4<'_, Complex64>, ArrayView4<'_, Complex64>) {
        let region = s![
            offset[0]..offset[0] + shape[0],
            offset[1]..offset[1] + shape[1],
            offset[2]..offset[2] + shape[2],
            ..
        ];
        (self.e.slice(region), self.h.slice(region))
    }

    /// E vector at grid index `i`.
    pub fn e_at(&self, i: [usize; 3]) -> [Complex64; 3] {
        [self.e[[i[0], i[1], i[2], 0]], self.e[[i[0], i[1], i[2], 1]], self.e[[i[0], i[1], i[2], 2]]]
    }

    /// H vector at grid index `i`.
    pub fn h_at(&self, i: [usize; 3]) -> [Complex64; 3] {
        [self.h[[i[0], i[1], i[2], 0]], self.h[[i[0], i[1], i[2], 1]], self.h[[i[0], i[1], i[2], 2]]]
    }

    /// Set both vectors at grid index `i` to NaN.
    pub fn invalidate(&mut self, i: [usize; 3]) {
        let nan = Complex64::new(f64::NAN, f64::NAN);
        for c in 0..3 {
            self.e[[i[0], i[1], i[2], c]] = nan;
            self.h[[i[0], i[1], i[2], c]] = nan;
        }
    }

    /// Approximate heap size in bytes.
    pub fn nbytes(&self) -> usize {
        2 * self.e.len() * std::mem::size_of::<Complex64>()
    }
}
