//! Channel matrix computation.

use std::f64::consts::PI;

use ndarray::Array2;
use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use hybridizer_geometry::Position;

use super::{DeterministicSimulation, SimulationState};
use crate::error::{HybridError, Result};
use crate::source::{project, theta_hat};
use crate::types::{FieldBuffers, Polarisation};

/// Channel coefficient seen by `rx` in a source's `field`.
///
/// 3D grids sample along $\hat\theta$ of the receiver-to-source direction;
/// 2D grids sample $E_z$ (TM only, checked before sampling).
fn sample(
    field: &FieldBuffers,
    rx: &ReceiverSample,
    source_pos: &Position,
    is_2d: bool,
) -> Complex64 {
    let e = field.e_at(rx.local);
    if is_2d {
        return e[2];
    }
    project(&e, &theta_hat(&(*source_pos - rx.position)))
}

/// Where a receiver samples the per-source fields.
struct ReceiverSample {
    position: Position,
    region: usize,
    local: [usize; 3],
}

impl DeterministicSimulation {
    fn locate_receivers(&self) -> Result<Vec<ReceiverSample>> {
        let regions = self.region_grids();
        self.receivers
            .iter()
            .enumerate()
            .map(|(r, rx)| {
                let global = self.grid.discretize(&rx.position());
                regions
                    .iter()
                    .enumerate()
                    .find_map(|(i, g)| {
                        g.from_parent_index(global).map(|local| ReceiverSample {
                            position: rx.position(),
                            region: i,
                            local,
                        })
                    })
                    .ok_or_else(|| {
                        HybridError::Configuration(format!(
                            "receiver {} lies outside every evaluated region",
                            r
                        ))
                    })
            })
            .collect()
    }

    /// Compute every source's field and the (#receivers x #sources) channel matrix.
    ///
    /// # Errors
    /// * [`HybridError::Prerequisite`] if either collection is empty or the
    ///   simulation was cleared.
    /// * [`HybridError::UnsupportedMode`] for TE sampling on a 2D grid.
    pub fn compute_channel_matrix(&mut self) -> Result<&Array2<Complex64>> {
        self.require_not_cleared()?;
        if self.sources.is_empty() {
            return Err(HybridError::Prerequisite(
                "no radiating elements; populate the source collection first".into(),
            ));
        }
        if self.receivers.is_empty() {
            return Err(HybridError::Prerequisite(
                "no receivers; populate the receiver collection first".into(),
            ));
        }
        if self.grid.is_2d() && self.params.polarisation == Polarisation::TE {
            return Err(HybridError::UnsupportedMode(
                "TE receivers on 2D grids are not implemented".into(),
            ));
        }

        let samples = self.locate_receivers()?;
        let (n_rx, n_tx) = (self.receivers.len(), self.sources.len());
        let source_fields = self
            .sources
            .iter()
            .enumerate()
            .map(|(s, source)| -> Result<Vec<FieldBuffers>> {
                let per_region = self
                    .region_grids()
                    .into_iter()
                    .map(|g| source.compute_field(g, &self.params, self.backend.as_ref()))
                    .collect::<Result<Vec<_>>>()?;
                log::debug!("Computed field of source {}/{}", s + 1, n_tx);
                Ok(per_region)
            })
            .collect::<Result<Vec<_>>>()?;

        let source_positions: Vec<Position> = self.sources.iter().map(|s| s.position()).collect();
        let is_2d = self.grid.is_2d();
        let mut channel = self.backend.parallel_matrix_fill(n_rx, n_tx, &|r, s| {
            let rx = &samples[r];
            sample(&source_fields[s][rx.region], rx, &source_positions[s], is_2d)
        })?;

        if self.params.phase_scrambling {
            let mut rng = StdRng::seed_from_u64(self.params.scramble_seed);
            channel.mapv_inplace(|h| Complex64::from_polar(h.norm(), rng.gen_range(0.0..2.0 * PI)));
        }

        log::info!("Channel matrix computed: {} receivers x {} sources", n_rx, n_tx);
        self.source_fields = source_fields;
        self.channel = Some(channel);
        self.precoding = None;
        self.weights = None;
        self.state = SimulationState::ChannelComputed;
        self.channel
            .as_ref()
            .ok_or_else(|| HybridError::Prerequisite("channel matrix missing".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::two_by_two;
    use super::*;
    use crate::collection::SourceCollection;
    use crate::types::{SimulationParams, FREE_SPACE_IMPEDANCE};
    use approx::assert_abs_diff_eq;
    use hybridizer_compute::{
        ComputeBackend, ComputeError, DeviceInfo, PointKernel, SequentialBackend,
    };
    use hybridizer_geometry::Grid;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Sequential backend that counts matrix fills.
    #[derive(Default)]
    struct CountingBackend {
        matrix_fills: AtomicUsize,
    }

    impl ComputeBackend for CountingBackend {
        fn device_info(&self) -> DeviceInfo {
            SequentialBackend.device_info()
        }

        fn parallel_point_fill(
            &self,
            n_points: usize,
            kernel: &PointKernel<'_>,
        ) -> std::result::Result<Array2<Complex64>, ComputeError> {
            SequentialBackend.parallel_point_fill(n_points, kernel)
        }

        fn parallel_matrix_fill(
            &self,
            rows: usize,
            cols: usize,
            fill_fn: &(dyn Fn(usize, usize) -> Complex64 + Send + Sync),
        ) -> std::result::Result<Array2<Complex64>, ComputeError> {
            self.matrix_fills.fetch_add(1, Ordering::SeqCst);
            SequentialBackend.parallel_matrix_fill(rows, cols, fill_fn)
        }
    }

    fn params() -> SimulationParams {
        SimulationParams {
            frequency: 3e9,
            ..Default::default()
        }
    }

    #[test]
    fn test_isotropic_channel_entries() {
        let mut sim = two_by_two(params());
        let k = sim.params().wavenumber();
        let channel = sim.compute_channel_matrix().unwrap().clone();
        assert_eq!(channel.dim(), (2, 2));

        let amp = (FREE_SPACE_IMPEDANCE * 0.5 / (2.0 * PI)).sqrt();
        let src = Position::new(-0.15, 0.0, 0.0);
        let rx = Position::new(-0.1, 2.0, 0.0);
        let r = src.distance(&rx);
        let expected = amp * Complex64::new(0.0, k * r).exp() / r;
        assert_abs_diff_eq!(channel[[0, 0]].re, expected.re, epsilon = 1e-9);
        assert_abs_diff_eq!(channel[[0, 0]].im, expected.im, epsilon = 1e-9);
        assert_eq!(sim.state(), SimulationState::ChannelComputed);
    }

    #[test]
    fn test_channel_sampled_through_backend_matrix_fill() {
        let reference = two_by_two(params()).compute_channel_matrix().unwrap().clone();

        let backend = Arc::new(CountingBackend::default());
        let mut sim = two_by_two(params());
        let shared: Arc<dyn ComputeBackend> = backend.clone();
        sim.backend = shared;
        let channel = sim.compute_channel_matrix().unwrap().clone();
        assert_eq!(backend.matrix_fills.load(Ordering::SeqCst), 1);
        assert_eq!(channel, reference);
    }

    #[test]
    fn test_empty_collections_rejected() {
        let grid = Grid::new(Position::origin(), Position::new(1.0, 1.0, 1.0), 4, false).unwrap();
        let mut sim = DeterministicSimulation::new(
            grid,
            SourceCollection::antenna_array(1.0),
            SourceCollection::receivers_at(&[Position::new(0.5, 0.5, 0.5)]),
            params(),
            Arc::new(SequentialBackend),
        )
        .unwrap();
        assert!(matches!(
            sim.compute_channel_matrix(),
            Err(HybridError::Prerequisite(_))
        ));
    }

    #[test]
    fn test_phase_scrambling_keeps_magnitudes() {
        let mut plain = two_by_two(params());
        let reference = plain.compute_channel_matrix().unwrap().clone();
        let mut scrambled = two_by_two(SimulationParams {
            phase_scrambling: true,
            scramble_seed: 7,
            ..params()
        });
        let channel = scrambled.compute_channel_matrix().unwrap().clone();
        for (a, b) in reference.iter().zip(channel.iter()) {
            assert_abs_diff_eq!(a.norm(), b.norm(), epsilon = 1e-12);
        }
        assert!(reference
            .iter()
            .zip(channel.iter())
            .any(|(a, b)| (a.arg() - b.arg()).abs() > 1e-6));
    }

    #[test]
    fn test_cluster_channel_recovers_weights() {
        let rx = Position::new(0.0, 0.0, 0.0);
        let grid = Grid::new(
            Position::new(-0.1, -0.1, -0.1),
            Position::new(0.1, 0.1, 0.1),
            8,
            false,
        )
        .unwrap();
        let mut clusters = SourceCollection::cluster_set();
        let weights = [Complex64::new(1.0, 0.5), Complex64::new(-0.2, 0.3)];
        clusters.add_cluster(Position::new(5.0, 1.0, 2.0), weights[0], rx).unwrap();
        clusters.add_cluster(Position::new(-3.0, 4.0, -1.0), weights[1], rx).unwrap();
        let mut sim = DeterministicSimulation::new(
            grid,
            clusters,
            SourceCollection::receivers_at(&[rx]),
            params(),
            Arc::new(SequentialBackend),
        )
        .unwrap();
        let channel = sim.compute_channel_matrix().unwrap();
        for (s, w) in weights.iter().enumerate() {
            assert_abs_diff_eq!(channel[[0, s]].re, w.re, epsilon = 1e-12);
            assert_abs_diff_eq!(channel[[0, s]].im, w.im, epsilon = 1e-12);
        }
    }
}
