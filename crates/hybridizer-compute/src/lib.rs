//! # Hybridizer Compute
//!
//! Compute backend abstraction for the hybridizer field engine. This crate
//! provides a [`ComputeBackend`](backend::ComputeBackend) trait that isolates
//! the physics code from the execution strategy.
//!
//! ## Available backends
//!
//! | Backend | Feature flag | Notes |
//! |---------|-------------|--------|
//! | CPU (Rayon) | `cpu` (default) | Parallel per-point fill |
//! | Sequential | always | Reference implementation |
//!
//! Dense solves go through `faer` LU on every backend ([`dense`]).

pub mod backend;
pub mod dense;

#[cfg(feature = "cpu")]
pub mod cpu;

pub use backend::{
    BackendType, ComputeBackend, ComputeError, DeviceInfo, PointKernel, SequentialBackend,
    FIELD_COMPONENTS,
};

#[cfg(feature = "cpu")]
pub use cpu::CpuBackend;

/// Default backend for the enabled feature set.
#[cfg(feature = "cpu")]
pub fn default_backend() -> std::sync::Arc<dyn ComputeBackend> {
    std::sync::Arc::new(CpuBackend::new())
}

/// Default backend for the enabled feature set.
#[cfg(not(feature = "cpu"))]
pub fn default_backend() -> std::sync::Arc<dyn ComputeBackend> {
    std::sync::Arc::new(SequentialBackend)
}
