//! Deterministic multi-source simulation.
//!
//! A [`DeterministicSimulation`] owns one grid, one radiating collection
//! (antenna array or cluster set), one receiver collection and the field
//! buffers sized to the grid. Work proceeds through a fixed sequence:
//!
//! ```text
//! Constructed -> ChannelComputed -> PrecodingComputed -> Focused -> (Cleared)
//! ```
//!
//! Each step checks that the previous one has completed and fails with
//! [`HybridError::Prerequisite`] otherwise.
//!
//! ## Memory-bounded mode
//!
//! With [`SimulationParams::sliced`] set, per-source fields are only
//! evaluated on thin slabs at each face of the volume and on boxes around
//! each receiver. Focusing writes each weighted slab into the full-size
//! buffer; points outside every slab stay zero.

mod channel;
mod diagnostics;
mod focus;
mod precoding;
pub mod quantity;

pub use precoding::{singular_values, SINGULAR_TOLERANCE};
pub use quantity::{Component, FieldKind, Part, Quantity, QuantityInfo, QuantityValue};

use std::sync::Arc;

use ndarray::{Array1, Array2};
use num_complex::Complex64;

use hybridizer_compute::ComputeBackend;
use hybridizer_geometry::Grid;

use crate::collection::{CollectionKind, SourceCollection};
use crate::error::{HybridError, Result};
use crate::types::{FieldBuffers, SimulationParams, MIN_CELLS_PER_WAVELENGTH};

/// Lifecycle of a simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SimulationState {
    Constructed,
    ChannelComputed,
    PrecodingComputed,
    Focused,
    Cleared,
}

pub struct DeterministicSimulation {
    grid: Grid,
    /// Child grids evaluated in memory-bounded mode; `None` means the whole grid.
    regions: Option<Vec<Grid>>,
    sources: SourceCollection,
    receivers: SourceCollection,
    params: SimulationParams,
    backend: Arc<dyn ComputeBackend>,
    state: SimulationState,
    /// Per-source fields, indexed `[source][region]`.
    source_fields: Vec<Vec<FieldBuffers>>,
    channel: Option<Array2<Complex64>>,
    precoding: Option<Array2<Complex64>>,
    weights: Option<Array1<Complex64>>,
    fields: Option<FieldBuffers>,
}

impl std::fmt::Debug for DeterministicSimulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeterministicSimulation")
            .field("grid_shape", &self.grid.shape())
            .field("sources", &self.sources.len())
            .field("receivers", &self.receivers.len())
            .field("state", &self.state)
            .finish()
    }
}

impl DeterministicSimulation {
    /// Build a simulation with zero-initialised field buffers.
    ///
    /// # Arguments
    /// * `grid` - Evaluation grid.
    /// * `sources` - Antenna array or cluster set.
    /// * `receivers` - Receiver collection (may be empty for pure radiation).
    /// * `params` - Frequency, models and metric conventions.
    /// * `backend` - Executes the per-point field kernels.
    pub fn new(
        mut grid: Grid,
        sources: SourceCollection,
        receivers: SourceCollection,
        params: SimulationParams,
        backend: Arc<dyn ComputeBackend>,
    ) -> Result<Self> {
        if sources.kind() == CollectionKind::Receivers {
            return Err(HybridError::Configuration(
                "radiating collection must hold antennas or clusters".into(),
            ));
        }
        if receivers.kind() != CollectionKind::Receivers {
            return Err(HybridError::Configuration(
                "receiver collection must hold receivers".into(),
            ));
        }
        if !(params.frequency > 0.0) {
            return Err(HybridError::Configuration(format!(
                "frequency must be positive, got {}",
                params.frequency
            )));
        }

        let cpw = grid.cells_per_wavelength(params.wavelength());
        if cpw < MIN_CELLS_PER_WAVELENGTH {
            log::warn!(
                "Grid too coarse for {:.3} GHz: {:.1} cells per wavelength (recommended >= {})",
                params.frequency / 1e9,
                cpw,
                MIN_CELLS_PER_WAVELENGTH
            );
        }

        let regions = match params.sliced {
            Some(slice) => Some(Self::build_regions(
                &mut grid,
                &receivers,
                slice.face_thickness,
                slice.receiver_box,
            )?),
            None => None,
        };

        let fields = FieldBuffers::zeros(grid.shape());
        log::debug!(
            "Simulation grid {:?} ({} points, {:.1} MiB of field buffers)",
            grid.shape(),
            grid.len(),
            fields.nbytes() as f64 / (1024.0 * 1024.0)
        );

        Ok(Self {
            grid,
            regions,
            sources,
            receivers,
            params,
            backend,
            state: SimulationState::Constructed,
            source_fields: Vec::new(),
            channel: None,
            precoding: None,
            weights: None,
            fields: Some(fields),
        })
    }

    /// Face slabs on both ends of every active axis plus a box around each
    /// receiver, all registered as children of `grid`.
    fn build_regions(
        grid: &mut Grid,
        receivers: &SourceCollection,
        thickness: f64,
        receiver_box: f64,
    ) -> Result<Vec<Grid>> {
        let active = if grid.is_2d() { 2 } else { 3 };
        let (ll, ur) = (grid.lower_left(), grid.upper_right());
        let mut regions = Vec::new();
        for axis in 0..active {
            for face in [ll, ur] {
                let centre = grid.centre().with_component(axis, face.component(axis));
                regions.push(grid.face_slice(&centre, thickness, axis)?);
            }
        }
        for rx in receivers.iter() {
            regions.push(grid.subgrid(&rx.position(), [receiver_box; 3])?);
        }
        Ok(regions)
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn sources(&self) -> &SourceCollection {
        &self.sources
    }

    pub fn sources_mut(&mut self) -> &mut SourceCollection {
        &mut self.sources
    }

    pub fn receivers(&self) -> &SourceCollection {
        &self.receivers
    }

    pub fn params(&self) -> &SimulationParams {
        &self.params
    }

    pub fn state(&self) -> SimulationState {
        self.state
    }

    pub fn is_sliced(&self) -> bool {
        self.regions.is_some()
    }

    pub fn channel_matrix(&self) -> Option<&Array2<Complex64>> {
        self.channel.as_ref()
    }

    pub fn precoding_matrix(&self) -> Option<&Array2<Complex64>> {
        self.precoding.as_ref()
    }

    /// Per-source weights applied by the last focus.
    pub fn weights(&self) -> Option<&Array1<Complex64>> {
        self.weights.as_ref()
    }

    /// Accumulated fields; `None` once cleared.
    pub fn fields(&self) -> Option<&FieldBuffers> {
        self.fields.as_ref()
    }

    pub(crate) fn fields_or_err(&self) -> Result<&FieldBuffers> {
        self.fields.as_ref().ok_or_else(|| {
            HybridError::Prerequisite("fields have been cleared".into())
        })
    }

    /// Grids evaluated per source: the children in sliced mode, else the grid itself.
    pub(crate) fn region_grids(&self) -> Vec<&Grid> {
        match &self.regions {
            Some(children) => children.iter().collect(),
            None => vec![&self.grid],
        }
    }

    /// Release all field memory. The channel and precoding matrices are kept.
    pub fn clear(&mut self) {
        self.fields = None;
        self.source_fields = Vec::new();
        self.state = SimulationState::Cleared;
    }

    fn require_not_cleared(&self) -> Result<()> {
        if self.state == SimulationState::Cleared {
            return Err(HybridError::Prerequisite(
                "simulation has been cleared".into(),
            ));
        }
        Ok(())
    }
}
