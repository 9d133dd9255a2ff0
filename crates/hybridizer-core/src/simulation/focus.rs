//! Weighted superposition of source fields.

use ndarray::{Array1, Array2};
use num_complex::Complex64;

use super::{DeterministicSimulation, SimulationState};
use crate::error::{HybridError, Result};
use crate::types::FieldBuffers;

impl DeterministicSimulation {
    /// Accumulate $\sum_i w_i \mathbf{F}_i$ with $\mathbf{w} = \mathbf{P}^{\mathsf T}\mathbf{s}$.
    ///
    /// `symbols` defaults to a one-hot vector selecting receiver 0. Returns
    /// the applied per-source weights.
    pub fn focus(&mut self, symbols: Option<&Array1<Complex64>>) -> Result<&Array1<Complex64>> {
        self.require_not_cleared()?;
        let precoding = self.precoding.as_ref().ok_or_else(|| {
            HybridError::Prerequisite("compute the precoding matrix before focusing".into())
        })?;
        if self.source_fields.len() != self.sources.len() {
            return Err(HybridError::Prerequisite(
                "per-source fields are missing; recompute the channel matrix".into(),
            ));
        }

        let n_rx = precoding.nrows();
        let symbols = match symbols {
            Some(s) if s.len() != n_rx => {
                return Err(HybridError::Dimension(format!(
                    "symbol vector has {} entries, expected {}",
                    s.len(),
                    n_rx
                )))
            }
            Some(s) => s.clone(),
            None => {
                let mut one_hot = Array1::zeros(n_rx);
                one_hot[0] = Complex64::new(1.0, 0.0);
                one_hot
            }
        };

        let weights = self
            .backend
            .matvec(&precoding.t().to_owned(), &symbols)?;
        self.apply_weights(&weights)?;

        self.weights = Some(weights);
        self.state = SimulationState::Focused;
        self.weights
            .as_ref()
            .ok_or_else(|| HybridError::Prerequisite("weights missing".into()))
    }

    /// Focus on a single receiver.
    pub fn focus_on(&mut self, receiver: usize) -> Result<&Array1<Complex64>> {
        let n_rx = self.receivers.len();
        if receiver >= n_rx {
            return Err(HybridError::Configuration(format!(
                "receiver {} out of range ({} receivers)",
                receiver, n_rx
            )));
        }
        let mut symbols = Array1::zeros(n_rx);
        symbols[receiver] = Complex64::new(1.0, 0.0);
        self.focus(Some(&symbols))
    }

    fn apply_weights(&mut self, weights: &Array1<Complex64>) -> Result<()> {
        let fields = self.fields.as_mut().ok_or_else(|| {
            HybridError::Prerequisite("fields have been cleared".into())
        })?;
        match &self.regions {
            None => {
                for (w, per_region) in weights.iter().zip(&self.source_fields) {
                    fields.add_scaled(*w, &per_region[0]);
                }
            }
            Some(children) => {
                for (r, child) in children.iter().enumerate() {
                    let mut slab = FieldBuffers::zeros(child.shape());
                    for (w, per_region) in weights.iter().zip(&self.source_fields) {
                        slab.add_scaled(*w, &per_region[r]);
                    }
                    fields.write_slab(child.offset().unwrap_or([0; 3]), &slab);
                }
            }
        }
        Ok(())
    }

    /// Derive weights so that the single receiver sees `target[i]` from source `i`.
    ///
    /// The weights are stored as a one-row precoding matrix, so a following
    /// [`Self::focus`] applies them unchanged. Returns the weights.
    pub fn custom_channel_matrix(
        &mut self,
        target: &Array1<Complex64>,
    ) -> Result<Array1<Complex64>> {
        self.require_not_cleared()?;
        let channel = self.channel.as_ref().ok_or_else(|| {
            HybridError::Prerequisite("compute the channel matrix first".into())
        })?;
        if channel.nrows() != 1 {
            return Err(HybridError::Configuration(format!(
                "custom channel needs exactly one receiver, have {}",
                channel.nrows()
            )));
        }
        if target.len() != channel.ncols() {
            return Err(HybridError::Dimension(format!(
                "target has {} entries, expected {}",
                target.len(),
                channel.ncols()
            )));
        }

        let mut weights = Array1::zeros(target.len());
        for (i, (t, h)) in target.iter().zip(channel.row(0)).enumerate() {
            if h.norm() == 0.0 {
                return Err(HybridError::SingularMatrix(format!(
                    "source {} has a zero channel coefficient",
                    i
                )));
            }
            weights[i] = t / h;
        }

        let row = weights.clone().into_shape((1, weights.len())).map_err(|e| {
            HybridError::Dimension(e.to_string())
        })?;
        self.precoding = Some(row);
        self.weights = None;
        self.state = SimulationState::PrecodingComputed;
        Ok(weights)
    }

    /// Superpose every source with unit weight without storing per-source fields.
    ///
    /// Used when weights are already built into the sources (clusters) and
    /// only the total field is needed.
    pub fn radiate_equal_weights(&mut self) -> Result<()> {
        self.require_not_cleared()?;
        if self.sources.is_empty() {
            return Err(HybridError::Prerequisite(
                "no radiating elements; populate the source collection first".into(),
            ));
        }
        let one = Complex64::new(1.0, 0.0);
        let regions: Vec<(Option<[usize; 3]>, FieldBuffers)> = {
            let grids = self.region_grids();
            let mut acc: Vec<(Option<[usize; 3]>, FieldBuffers)> = grids
                .iter()
                .map(|g| (g.offset(), FieldBuffers::zeros(g.shape())))
                .collect();
            for source in self.sources.iter() {
                for (g, (_, slab)) in grids.iter().zip(acc.iter_mut()) {
                    let field = source.compute_field(g, &self.params, self.backend.as_ref())?;
                    slab.add_scaled(one, &field);
                }
            }
            acc
        };

        let fields = self.fields.as_mut().ok_or_else(|| {
            HybridError::Prerequisite("fields have been cleared".into())
        })?;
        for (offset, slab) in regions {
            match offset {
                Some(o) => fields.write_slab(o, &slab),
                None => fields.add_scaled(one, &slab),
            }
        }
        self.state = SimulationState::Focused;
        log::debug!("Radiated {} sources with unit weights", self.sources.len());
        Ok(())
    }

    /// Channel realised at each receiver by the current weights, $\mathbf{H}\mathbf{w}$.
    pub fn realised_channel(&self) -> Result<Array1<Complex64>> {
        let channel: &Array2<Complex64> = self
            .channel
            .as_ref()
            .ok_or_else(|| HybridError::Prerequisite("no channel matrix".into()))?;
        let weights = self
            .weights
            .as_ref()
            .ok_or_else(|| HybridError::Prerequisite("no weights; focus first".into()))?;
        Ok(self.backend.matvec(channel, weights)?)
    }
}
