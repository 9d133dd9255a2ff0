//! Read-only diagnostics of the channel matrix.

use ndarray::Array2;
use num_complex::Complex64;

use super::precoding::singular_values;
use super::DeterministicSimulation;
use crate::error::{HybridError, Result};

impl DeterministicSimulation {
    fn channel_or_err(&self) -> Result<&Array2<Complex64>> {
        self.channel
            .as_ref()
            .ok_or_else(|| HybridError::Prerequisite("no channel matrix".into()))
    }

    /// Source-side Gram matrix $\mathbf{G} = \mathbf{H}^{\mathsf H}\mathbf{H}$.
    pub fn gram_matrix(&self) -> Result<Array2<Complex64>> {
        let h = self.channel_or_err()?;
        Ok(h.t().mapv(|c| c.conj()).dot(h))
    }

    /// Fraction of the Gram matrix energy on its diagonal,
    /// $\gamma = \sum_i |G_{ii}|^2 / \sum_{ij} |G_{ij}|^2$.
    ///
    /// Equals 1 for mutually orthogonal source channels.
    pub fn gamma(&self) -> Result<f64> {
        let g = self.gram_matrix()?;
        let total: f64 = g.iter().map(|c| c.norm_sqr()).sum();
        if total == 0.0 {
            return Err(HybridError::SingularMatrix("channel matrix is zero".into()));
        }
        let diagonal: f64 = g.diag().iter().map(|c| c.norm_sqr()).sum();
        Ok(diagonal / total)
    }

    /// Condition number of the channel matrix, $\sigma_{max}/\sigma_{min}$.
    ///
    /// Infinite for a rank-deficient channel.
    pub fn kappa(&self) -> Result<f64> {
        let sv = singular_values(self.channel_or_err()?);
        match (sv.first(), sv.last()) {
            (Some(&max), Some(&min)) if min > 0.0 => Ok(max / min),
            (Some(_), Some(_)) => Ok(f64::INFINITY),
            _ => Err(HybridError::Dimension("empty channel matrix".into())),
        }
    }
}
