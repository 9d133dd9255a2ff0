//! Precoding (beamforming) matrices.
//!
//! The precoding matrix is stored in the channel's shape
//! (#receivers x #sources) so that the per-source weights for a symbol
//! vector $\mathbf{s}$ are $\mathbf{w} = \mathbf{P}^{\mathsf T}\mathbf{s}$.
//!
//! - MRT: $\mathbf{P} = \overline{\mathbf{H}}$, i.e.
//!   $\mathbf{P}^{\mathsf T} = \mathbf{H}^{\mathsf H}$.
//! - ZF: $\mathbf{P}^{\mathsf T} = \mathbf{H}^{\mathsf H}(\mathbf{H}\mathbf{H}^{\mathsf H})^{-1}$,
//!   so that $\mathbf{H}\mathbf{P}^{\mathsf T} = \mathbf{I}$. Since the Gram
//!   matrix is Hermitian this equals
//!   $\overline{(\mathbf{H}\mathbf{H}^{\mathsf H})^{-1}\mathbf{H}}$, which
//!   is what the LU solve produces.
//!
//! Both are scaled to unit Frobenius norm.

use nalgebra::DMatrix;
use ndarray::Array2;
use num_complex::Complex64;

use hybridizer_compute::ComputeError;

use super::{DeterministicSimulation, SimulationState};
use crate::error::{HybridError, Result};
use crate::types::PrecodingScheme;

/// Ratio of smallest to largest singular value below which a Gram matrix
/// is treated as singular.
pub const SINGULAR_TOLERANCE: f64 = 1e-12;

/// Singular values of a complex matrix, descending.
pub fn singular_values(matrix: &Array2<Complex64>) -> Vec<f64> {
    let (rows, cols) = matrix.dim();
    let m = DMatrix::from_fn(rows, cols, |i, j| matrix[[i, j]]);
    let mut sv: Vec<f64> = m.singular_values().iter().copied().collect();
    sv.sort_by(|a, b| b.total_cmp(a));
    sv
}

fn frobenius_normalise(matrix: &mut Array2<Complex64>) -> Result<()> {
    let norm = matrix.iter().map(|c| c.norm_sqr()).sum::<f64>().sqrt();
    if !(norm > 0.0) || !norm.is_finite() {
        return Err(HybridError::SingularMatrix(format!(
            "precoding matrix has Frobenius norm {}",
            norm
        )));
    }
    matrix.mapv_inplace(|c| c / norm);
    Ok(())
}

impl DeterministicSimulation {
    /// Derive the precoding matrix from the channel matrix.
    ///
    /// # Errors
    /// * [`HybridError::Prerequisite`] before [`Self::compute_channel_matrix`].
    /// * [`HybridError::SingularMatrix`] for ZF on a rank-deficient channel.
    pub fn compute_precoding_matrix(
        &mut self,
        scheme: PrecodingScheme,
    ) -> Result<&Array2<Complex64>> {
        self.require_not_cleared()?;
        let channel = self.channel.as_ref().ok_or_else(|| {
            HybridError::Prerequisite("compute the channel matrix before precoding".into())
        })?;

        let mut precoding = match scheme {
            PrecodingScheme::Mrt => channel.mapv(|h| h.conj()),
            PrecodingScheme::Zf => {
                let gram = channel.dot(&channel.t().mapv(|h| h.conj()));
                let sv = singular_values(&gram);
                let (largest, smallest) = (sv[0], sv[sv.len() - 1]);
                if !(largest > 0.0) || smallest <= largest * SINGULAR_TOLERANCE {
                    return Err(HybridError::SingularMatrix(format!(
                        "channel Gram matrix is rank deficient (singular values {:.3e}..{:.3e})",
                        largest, smallest
                    )));
                }
                let solved = self
                    .backend
                    .dense_solve(&gram, channel)
                    .map_err(|e| match e {
                        ComputeError::Singular(msg) => HybridError::SingularMatrix(msg),
                        other => HybridError::Compute(other),
                    })?;
                solved.mapv(|x| x.conj())
            }
        };
        frobenius_normalise(&mut precoding)?;

        log::info!("Precoding matrix computed ({:?})", scheme);
        self.precoding = Some(precoding);
        self.weights = None;
        self.state = SimulationState::PrecodingComputed;
        self.precoding
            .as_ref()
            .ok_or_else(|| HybridError::Prerequisite("precoding matrix missing".into()))
    }
}
