//! Compute backend trait and device abstraction.
//!
//! The [`ComputeBackend`] trait isolates the hot loops of the field engine
//! (per-grid-point field evaluation, small dense linear algebra) from the
//! execution strategy, so that `hybridizer-core` stays device-agnostic.

use ndarray::{Array1, Array2};
use num_complex::Complex64;
use thiserror::Error;

/// Number of complex values produced per grid point: $E_x, E_y, E_z, H_x, H_y, H_z$.
pub const FIELD_COMPONENTS: usize = 6;

/// Errors originating from compute backends.
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Backend not available: {0}")]
    Unavailable(String),

    #[error("Device error: {0}")]
    DeviceError(String),

    #[error("Kernel failed at item {index}: {message}")]
    Kernel { index: usize, message: String },

    #[error("Singular system: {0}")]
    Singular(String),

    #[error("Dimension mismatch: {0}")]
    Dimension(String),
}

/// Describes the capabilities of a compute backend.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub backend_type: BackendType,
    pub compute_units: Option<usize>,
}

/// The type of compute backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Cpu,
    Sequential,
}

/// Per-point kernel: returns the six field components at flat point `index`.
pub type PointKernel<'a> =
    dyn Fn(usize) -> Result<[Complex64; FIELD_COMPONENTS], ComputeError> + Send + Sync + 'a;

/// Abstraction over compute backends.
pub trait ComputeBackend: Send + Sync {
    /// Return information about the device.
    fn device_info(&self) -> DeviceInfo;

    /// Evaluate `kernel` at every point `0..n_points`.
    ///
    /// Returns an $N \times 6$ array whose rows are the kernel outputs in
    /// point order. The first kernel error aborts the fill.
    fn parallel_point_fill(
        &self,
        n_points: usize,
        kernel: &PointKernel<'_>,
    ) -> Result<Array2<Complex64>, ComputeError>;

    /// Fill a matrix element-wise; each $(i, j)$ is independent.
    fn parallel_matrix_fill(
        &self,
        rows: usize,
        cols: usize,
        fill_fn: &(dyn Fn(usize, usize) -> Complex64 + Send + Sync),
    ) -> Result<Array2<Complex64>, ComputeError>;

    /// Complex matrix-vector product $\mathbf{y} = \mathbf{A}\mathbf{x}$.
    fn matvec(
        &self,
        matrix: &Array2<Complex64>,
        vector: &Array1<Complex64>,
    ) -> Result<Array1<Complex64>, ComputeError> {
        if matrix.ncols() != vector.len() {
            return Err(ComputeError::Dimension(format!(
                "matrix has {} columns, vector has {} entries",
                matrix.ncols(),
                vector.len()
            )));
        }
        Ok(matrix.dot(vector))
    }

    /// Solve $\mathbf{A}\mathbf{X} = \mathbf{B}$ for a square $\mathbf{A}$
    /// and any number of right-hand-side columns.
    fn dense_solve(
        &self,
        matrix: &Array2<Complex64>,
        rhs: &Array2<Complex64>,
    ) -> Result<Array2<Complex64>, ComputeError> {
        crate::dense::solve_lu(matrix, rhs)
    }
}

/// Single-threaded backend; the reference the parallel backends are tested against.
#[derive(Debug, Default, Clone, Copy)]
pub struct SequentialBackend;

impl ComputeBackend for SequentialBackend {
    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            name: "Sequential".into(),
            backend_type: BackendType::Sequential,
            compute_units: Some(1),
        }
    }

    fn parallel_point_fill(
        &self,
        n_points: usize,
        kernel: &PointKernel<'_>,
    ) -> Result<Array2<Complex64>, ComputeError> {
        let mut out = Array2::zeros((n_points, FIELD_COMPONENTS));
        for (i, mut row) in out.outer_iter_mut().enumerate() {
            let values = kernel(i)?;
            for (dst, v) in row.iter_mut().zip(values) {
                *dst = v;
            }
        }
        Ok(out)
    }

    fn parallel_matrix_fill(
        &self,
        rows: usize,
        cols: usize,
        fill_fn: &(dyn Fn(usize, usize) -> Complex64 + Send + Sync),
    ) -> Result<Array2<Complex64>, ComputeError> {
        Ok(Array2::from_shape_fn((rows, cols), |(i, j)| fill_fn(i, j)))
    }
}
