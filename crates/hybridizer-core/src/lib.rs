//! # Hybridizer Core
//!
//! Deterministic multi-source field superposition. Radiating elements
//! (antennas or channel-model scattering clusters) are evaluated on a grid,
//! combined through a channel matrix and a precoding scheme, and reduced to
//! exposure metrics.
//!
//! ## Architecture
//!
//! A [`simulation::DeterministicSimulation`] ties one grid to one radiating
//! [`collection::SourceCollection`] and one receiver collection and walks
//! the channel -> precoding -> focus sequence. A
//! [`time_domain::TimeDomainSimulation`] builds one such simulation per
//! snapshot of an imported [`trace::ChannelTrace`] and drives the batch
//! exposure pipelines.
//!
//! ## Modules
//!
//! - [`types`]: Constants, simulation parameters and field buffers.
//! - [`source`]: Single radiating element and its field model.
//! - [`collection`]: Ordered element collections, placement and pruning.
//! - [`simulation`]: Channel matrix, precoding, focusing and derived quantities.
//! - [`hotspot`]: Peak detection and hotspot dimensionality.
//! - [`trace`]: Channel trace import, subsampling and truncation.
//! - [`time_domain`]: Per-snapshot simulations and batch pipelines.
//! - [`export`]: Boundary-field records for the external solver.
//! - [`solver`]: External full-wave solver contract.
//! - [`checkpoint`]: Per-snapshot result checkpoints.

pub mod checkpoint;
pub mod collection;
pub mod error;
pub mod export;
pub mod hotspot;
pub mod simulation;
pub mod solver;
pub mod source;
pub mod time_domain;
pub mod trace;
pub mod types;

pub use checkpoint::Checkpoint;
pub use collection::{CollectionKind, SourceCollection};
pub use error::{HybridError, Result};
pub use export::{AxisRange, BoundaryRecord};
pub use hotspot::{find_peaks, hotspot_at, hotspot_in, AxisPeak, Hotspot, HotspotAnchor, HotspotShape, Peak};
pub use simulation::{DeterministicSimulation, Quantity, SimulationState};
pub use solver::{ExternalProcessSolver, FullWaveSolver, SolverResult};
pub use source::{SourceElement, SourceKind};
pub use time_domain::{TimeDomainConfig, TimeDomainSimulation};
pub use trace::{ChannelTrace, Scenario};
pub use types::{
    ClusterModel, FieldBuffers, Polarisation, PowerNormalisation, PrecodingScheme,
    SimulationParams, SliceConfig,
};
