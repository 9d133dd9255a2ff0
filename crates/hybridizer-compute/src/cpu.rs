//! CPU compute backend using Rayon for shared-memory parallelism.

use ndarray::Array2;
use num_complex::Complex64;
use rayon::prelude::*;

use crate::backend::{
    BackendType, ComputeBackend, ComputeError, DeviceInfo, PointKernel, FIELD_COMPONENTS,
};

/// CPU backend that parallelises work across threads via Rayon.
#[derive(Debug, Clone)]
pub struct CpuBackend {
    num_threads: usize,
}

impl CpuBackend {
    /// Create a new CPU backend using all available threads.
    pub fn new() -> Self {
        Self {
            num_threads: rayon::current_num_threads(),
        }
    }

    /// Create a CPU backend with a specified thread count.
    pub fn with_threads(num_threads: usize) -> Self {
        Self { num_threads }
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeBackend for CpuBackend {
    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            name: format!("CPU ({} threads)", self.num_threads),
            backend_type: BackendType::Cpu,
            compute_units: Some(self.num_threads),
        }
    }

    fn parallel_point_fill(
        &self,
        n_points: usize,
        kernel: &PointKernel<'_>,
    ) -> Result<Array2<Complex64>, ComputeError> {
        let rows: Vec<[Complex64; FIELD_COMPONENTS]> = (0..n_points)
            .into_par_iter()
            .map(|i| kernel(i))
            .collect::<Result<_, _>>()?;

        let data: Vec<Complex64> = rows.into_iter().flatten().collect();
        Array2::from_shape_vec((n_points, FIELD_COMPONENTS), data)
            .map_err(|e| ComputeError::DeviceError(e.to_string()))
    }

    fn parallel_matrix_fill(
        &self,
        rows: usize,
        cols: usize,
        fill_fn: &(dyn Fn(usize, usize) -> Complex64 + Send + Sync),
    ) -> Result<Array2<Complex64>, ComputeError> {
        let data: Vec<Complex64> = (0..rows * cols)
            .into_par_iter()
            .map(|idx| {
                let i = idx / cols;
                let j = idx % cols;
                fill_fn(i, j)
            })
            .collect();

        Array2::from_shape_vec((rows, cols), data)
            .map_err(|e| ComputeError::DeviceError(e.to_string()))
    }
}
