//! Snapshot-by-snapshot simulation of a channel trace.
//!
//! Each trace snapshot becomes one [`DeterministicSimulation`]: a grid
//! centred on that snapshot's receiver, a cluster set built from the
//! snapshot's last-bounce scatterers and their summed sub-path gains, and a
//! single receiver. Cluster weights already encode the channel, so fields
//! are superposed with unit weights instead of going through precoding.
//!
//! The batch pipelines isolate failures per snapshot: a failing snapshot is
//! logged, recorded as NaN, and the run continues. Results are checkpointed
//! after every snapshot; a rerun with the same checkpoint only processes
//! snapshots that do not yet hold a finite value.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use hybridizer_compute::ComputeBackend;
use hybridizer_geometry::{Grid, Position};

use crate::checkpoint::Checkpoint;
use crate::collection::SourceCollection;
use crate::error::{HybridError, Result};
use crate::export::BoundaryRecord;
use crate::hotspot::{hotspot_at, Hotspot, HotspotAnchor};
use crate::simulation::{DeterministicSimulation, Quantity};
use crate::solver::FullWaveSolver;
use crate::trace::ChannelTrace;
use crate::types::SimulationParams;

/// How snapshots are turned into simulations and evaluated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeDomainConfig {
    /// Half edge lengths of the grid around the receiver (m).
    pub grid_half_size: [f64; 3],
    /// Grid cell size (m).
    pub cell_size: f64,
    pub is_2d: bool,
    pub receiver_index: usize,
    pub transmitter_index: usize,
    /// Prune each cluster set to this unaccounted weight-magnitude fraction.
    pub prune_target: Option<f64>,
    /// Hotspot anchor relative to the receiver; `None` anchors at the maximum.
    pub hotspot_offset: Option<[f64; 3]>,
    pub hotspot_quantity: Quantity,
    /// Surface normal axis for Sinc.
    pub sinc_normal: usize,
    /// Half edge length of the exported boundary box (m).
    pub export_half_size: f64,
    pub yee_averaging: bool,
    pub unit_power: bool,
}

impl Default for TimeDomainConfig {
    fn default() -> Self {
        Self {
            grid_half_size: [0.02, 0.02, 0.02],
            cell_size: 1e-3,
            is_2d: false,
            receiver_index: 0,
            transmitter_index: 0,
            prune_target: None,
            hotspot_offset: None,
            hotspot_quantity: Quantity::E_NORM,
            sinc_normal: 2,
            export_half_size: 0.01,
            yee_averaging: true,
            unit_power: true,
        }
    }
}

pub struct TimeDomainSimulation {
    trace: ChannelTrace,
    config: TimeDomainConfig,
    params: SimulationParams,
    backend: Arc<dyn ComputeBackend>,
    snapshots: Vec<DeterministicSimulation>,
}

impl std::fmt::Debug for TimeDomainSimulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeDomainSimulation")
            .field("snapshots", &self.trace.num_snapshots())
            .field("built", &self.snapshots.len())
            .field("config", &self.config)
            .finish()
    }
}

impl TimeDomainSimulation {
    /// Simulation of `trace`. The trace's centre frequency overrides
    /// `params.frequency`.
    pub fn new(
        trace: ChannelTrace,
        config: TimeDomainConfig,
        mut params: SimulationParams,
        backend: Arc<dyn ComputeBackend>,
    ) -> Result<Self> {
        if config.receiver_index >= trace.num_receivers()
            || config.transmitter_index >= trace.num_transmitters()
        {
            return Err(HybridError::Configuration(format!(
                "rx {} / tx {} out of range for a {}x{} trace",
                config.receiver_index,
                config.transmitter_index,
                trace.num_receivers(),
                trace.num_transmitters()
            )));
        }
        if config.sinc_normal > 2 {
            return Err(HybridError::Configuration(format!(
                "sinc normal axis must be 0, 1 or 2, got {}",
                config.sinc_normal
            )));
        }
        params.frequency = trace.center_frequency;
        Ok(Self {
            trace,
            config,
            params,
            backend,
            snapshots: Vec::new(),
        })
    }

    /// Load a trace file and wrap it.
    pub fn import_channel_trace(
        path: &Path,
        config: TimeDomainConfig,
        params: SimulationParams,
        backend: Arc<dyn ComputeBackend>,
    ) -> Result<Self> {
        Self::new(ChannelTrace::load(path)?, config, params, backend)
    }

    pub fn trace(&self) -> &ChannelTrace {
        &self.trace
    }

    /// Mutable trace access for subsampling or truncation. Drops any
    /// already built snapshot state.
    pub fn trace_mut(&mut self) -> &mut ChannelTrace {
        self.snapshots.clear();
        &mut self.trace
    }

    pub fn config(&self) -> &TimeDomainConfig {
        &self.config
    }

    pub fn params(&self) -> &SimulationParams {
        &self.params
    }

    pub fn num_snapshots(&self) -> usize {
        self.trace.num_snapshots()
    }

    /// Simulations from [`Self::build_per_snapshot_state`].
    pub fn snapshots(&self) -> &[DeterministicSimulation] {
        &self.snapshots
    }

    pub fn receiver_position(&self, snapshot: usize) -> Position {
        self.trace
            .receiver_position(self.config.receiver_index, snapshot)
    }

    /// Build the simulation of one snapshot.
    pub fn build_snapshot(&self, snapshot: usize) -> Result<DeterministicSimulation> {
        if snapshot >= self.num_snapshots() {
            return Err(HybridError::Configuration(format!(
                "snapshot {} out of range ({} snapshots)",
                snapshot,
                self.num_snapshots()
            )));
        }
        let (rx_i, tx_i) = (self.config.receiver_index, self.config.transmitter_index);
        let rx = self.receiver_position(snapshot);
        let h = self.config.grid_half_size;
        let grid = Grid::centred(
            rx,
            [2.0 * h[0], 2.0 * h[1], 2.0 * h[2]],
            self.config.cell_size,
            self.config.is_2d,
        )?;

        let mut clusters = SourceCollection::cluster_set();
        for c in 0..self.trace.num_clusters() {
            let weight = self.trace.cluster_weight(rx_i, tx_i, c, snapshot);
            if weight.norm_sqr() == 0.0 {
                continue;
            }
            let position = self.trace.cluster_position(rx_i, tx_i, c, snapshot);
            clusters.add_cluster(position, weight, rx)?;
        }
        if let Some(target) = self.config.prune_target {
            if !clusters.is_empty() {
                clusters.prune_by_contribution(target)?;
            }
        }

        DeterministicSimulation::new(
            grid,
            clusters,
            SourceCollection::receivers_at(&[rx]),
            self.params.clone(),
            self.backend.clone(),
        )
    }

    /// Build and keep the simulation of every snapshot.
    ///
    /// Each simulation allocates full field buffers; for long traces prefer
    /// the pipelines, which build one snapshot at a time.
    pub fn build_per_snapshot_state(&mut self) -> Result<()> {
        let built = (0..self.num_snapshots())
            .map(|t| self.build_snapshot(t))
            .collect::<Result<Vec<_>>>()?;
        log::info!("Built {} snapshot simulations", built.len());
        self.snapshots = built;
        Ok(())
    }

    fn anchor(&self, snapshot: usize) -> HotspotAnchor {
        match self.config.hotspot_offset {
            Some([dx, dy, dz]) => {
                HotspotAnchor::Point(self.receiver_position(snapshot) + Position::new(dx, dy, dz))
            }
            None => HotspotAnchor::Maximum,
        }
    }

    /// Radiate every built snapshot with unit weights and locate its hotspot.
    ///
    /// With `only_keep_hotspot` each simulation's fields are released right
    /// after its hotspot is extracted. Failed snapshots are logged and
    /// yield `None`.
    pub fn radiate_across_snapshots(&mut self, only_keep_hotspot: bool) -> Result<Vec<Option<Hotspot>>> {
        if self.snapshots.is_empty() {
            return Err(HybridError::Prerequisite(
                "build the per-snapshot state first".into(),
            ));
        }
        let anchors: Vec<HotspotAnchor> = (0..self.snapshots.len()).map(|t| self.anchor(t)).collect();
        let quantity = self.config.hotspot_quantity;
        let n = self.snapshots.len();
        let mut hotspots = Vec::with_capacity(n);
        for (t, sim) in self.snapshots.iter_mut().enumerate() {
            let outcome = sim
                .radiate_equal_weights()
                .and_then(|_| hotspot_at(sim, &quantity, anchors[t]));
            match outcome {
                Ok(h) => hotspots.push(Some(h)),
                Err(e) => {
                    log::error!("Snapshot {} failed: {}", self.trace.snapshot_numbers_in_input_data()[t], e);
                    hotspots.push(None);
                }
            }
            if only_keep_hotspot {
                sim.clear();
            }
            log::info!("Radiated snapshot {}/{}", t + 1, n);
        }
        Ok(hotspots)
    }

    /// Write the boundary field of a radiated simulation around its receiver.
    ///
    /// The file is `<dir>/snapshot_<input index>.hbf`.
    pub fn export_boundary_field(
        &self,
        sim: &DeterministicSimulation,
        snapshot: usize,
        dir: &Path,
    ) -> Result<PathBuf> {
        let mut record = BoundaryRecord::from_fields(
            sim.grid(),
            sim.fields_or_err()?,
            &self.receiver_position(snapshot),
            self.config.export_half_size,
            self.params.frequency,
            self.config.unit_power,
        )?;
        if self.config.yee_averaging {
            record.yee_average();
        }
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("snapshot_{}.hbf", self.input_index(snapshot)));
        record.write_binary(&path)?;
        log::debug!("Exported boundary field to {}", path.display());
        Ok(path)
    }

    fn exposure_of(&self, snapshot: usize, solver: &dyn FullWaveSolver, dir: &Path) -> Result<f64> {
        let mut sim = self.build_snapshot(snapshot)?;
        sim.radiate_equal_weights()?;
        let boundary = self.export_boundary_field(&sim, snapshot, dir)?;
        sim.clear();
        let result = solver.solve(&boundary, self.input_index(snapshot))?;
        Ok(result.peak_spatial_average_power_density)
    }

    /// Peak incident power density of one snapshot, without a solver.
    pub fn sinc_of(&self, snapshot: usize) -> Result<f64> {
        let mut sim = self.build_snapshot(snapshot)?;
        sim.radiate_equal_weights()?;
        let value = sim.get_value(&Quantity::Sinc {
            normal: self.config.sinc_normal,
        })?;
        sim.clear();
        value
            .max_finite()
            .map(|(v, _)| v)
            .ok_or_else(|| HybridError::Dimension("Sinc map holds no finite values".into()))
    }

    /// Hotspot of one snapshot, built and released on the spot.
    pub fn hotspot_of(&self, snapshot: usize) -> Result<Hotspot> {
        let mut sim = self.build_snapshot(snapshot)?;
        sim.radiate_equal_weights()?;
        let hotspot = hotspot_at(&sim, &self.config.hotspot_quantity, self.anchor(snapshot));
        sim.clear();
        hotspot
    }

    /// Index of a retained snapshot in the original trace.
    fn input_index(&self, snapshot: usize) -> usize {
        self.trace
            .snapshot_numbers_in_input_data()
            .get(snapshot)
            .copied()
            .unwrap_or(snapshot)
    }

    /// Values saved by an earlier run, or all-NaN when there are none.
    ///
    /// An unreadable or mismatched checkpoint is logged and ignored.
    fn resume_values(&self, checkpoint: &Checkpoint) -> Vec<f64> {
        let n = self.num_snapshots();
        match checkpoint.resume() {
            Ok(Some(v)) if v.len() == n => v,
            Ok(Some(v)) => {
                log::warn!(
                    "Ignoring checkpoint {} with {} values for {} snapshots",
                    checkpoint.path().display(),
                    v.len(),
                    n
                );
                vec![f64::NAN; n]
            }
            Ok(None) => vec![f64::NAN; n],
            Err(e) => {
                log::warn!("Ignoring unreadable checkpoint {}: {}", checkpoint.path().display(), e);
                vec![f64::NAN; n]
            }
        }
    }

    fn save_progress(checkpoint: &Checkpoint, values: &[f64]) {
        if let Err(e) = checkpoint.write(values) {
            log::error!("Failed to write checkpoint {}: {}", checkpoint.path().display(), e);
        }
    }

    fn evaluate_logged<F>(&self, t: usize, metric: &str, evaluate: &F) -> f64
    where
        F: Fn(usize) -> Result<f64>,
    {
        evaluate(t).unwrap_or_else(|e| {
            log::error!("Snapshot {} ({}) failed: {}", self.input_index(t), metric, e);
            f64::NAN
        })
    }

    /// Drive `evaluate` over every snapshot with checkpointing.
    ///
    /// Snapshot and checkpoint failures are logged; the run always completes.
    fn run_checkpointed<F>(&self, checkpoint: &Checkpoint, metric: &str, evaluate: F) -> Result<Vec<f64>>
    where
        F: Fn(usize) -> Result<f64>,
    {
        let n = self.num_snapshots();
        let mut values = self.resume_values(checkpoint);
        for t in 0..n {
            if values[t].is_finite() {
                continue;
            }
            values[t] = self.evaluate_logged(t, metric, &evaluate);
            Self::save_progress(checkpoint, &values);
            log::info!("Snapshot {}/{} {} = {:.4e}", t + 1, n, metric, values[t]);
        }
        Ok(values)
    }

    /// Radiate, export, solve and checkpoint every snapshot.
    ///
    /// Returns the peak spatial-average power density per snapshot, NaN for
    /// failed snapshots.
    pub fn run_exposure_pipeline(
        &self,
        solver: &dyn FullWaveSolver,
        checkpoint: &Checkpoint,
        work_dir: &Path,
    ) -> Result<Vec<f64>> {
        log::info!("Exposure pipeline with solver '{}'", solver.name());
        self.run_checkpointed(checkpoint, "psapd", |t| self.exposure_of(t, solver, work_dir))
    }

    /// Peak Sinc per snapshot, sequentially with per-snapshot checkpoints.
    pub fn run_sinc_pipeline(&self, checkpoint: &Checkpoint) -> Result<Vec<f64>> {
        self.run_checkpointed(checkpoint, "Sinc", |t| self.sinc_of(t))
    }

    /// Peak Sinc per snapshot across the rayon pool.
    ///
    /// Each worker builds its own simulations. Snapshots already finite in
    /// the checkpoint are skipped; the checkpoint is rewritten under a lock
    /// as each snapshot completes.
    pub fn run_sinc_pipeline_parallel(&self, checkpoint: &Checkpoint) -> Result<Vec<f64>> {
        let initial = self.resume_values(checkpoint);
        let pending: Vec<usize> = (0..initial.len()).filter(|&t| !initial[t].is_finite()).collect();
        let n = initial.len();
        let values = Mutex::new(initial);

        pending.into_par_iter().for_each(|t| {
            let value = self.evaluate_logged(t, "Sinc", &|t| self.sinc_of(t));
            let mut guard = values.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            guard[t] = value;
            Self::save_progress(checkpoint, &guard);
            log::info!("Snapshot {}/{} Sinc = {:.4e}", t + 1, n, value);
        });

        Ok(values.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::SolverResult;
    use crate::trace::tests::synthetic_trace;
    use hybridizer_compute::SequentialBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config() -> TimeDomainConfig {
        TimeDomainConfig {
            grid_half_size: [0.004, 0.004, 0.004],
            cell_size: 0.001,
            export_half_size: 0.002,
            ..Default::default()
        }
    }

    fn simulation(snapshots: usize) -> TimeDomainSimulation {
        TimeDomainSimulation::new(
            synthetic_trace(3, snapshots),
            config(),
            SimulationParams::default(),
            Arc::new(SequentialBackend),
        )
        .unwrap()
    }

    /// Fails on snapshot `fail_on`, otherwise reports the snapshot index.
    struct MockSolver {
        fail_on: usize,
        calls: AtomicUsize,
    }

    impl FullWaveSolver for MockSolver {
        fn name(&self) -> &str {
            "mock"
        }

        fn solve(&self, boundary: &Path, snapshot: usize) -> Result<SolverResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(boundary.exists());
            if snapshot == self.fail_on {
                return Err(HybridError::Solver("diverged".into()));
            }
            Ok(SolverResult {
                peak_spatial_average_power_density: snapshot as f64 + 1.0,
                peak_location: [0.0; 3],
            })
        }
    }

    #[test]
    fn test_snapshot_uses_trace_geometry() {
        let td = simulation(3);
        assert_eq!(td.params().frequency, 28e9);
        let sim = td.build_snapshot(2).unwrap();
        assert_eq!(sim.sources().len(), 3);
        assert!(sim.grid().contains_point(&td.receiver_position(2)));
        assert_eq!(sim.grid().shape(), [9, 9, 9]);
    }

    #[test]
    fn test_radiate_recovers_trace_weight_at_receiver() {
        let mut td = simulation(2);
        td.build_per_snapshot_state().unwrap();
        let hotspots = td.radiate_across_snapshots(false).unwrap();
        assert!(hotspots.iter().all(|h| h.is_some()));

        let sim = &td.snapshots()[1];
        let rx = td.receiver_position(1);
        let idx = sim.grid().discretize(&rx);
        let e = sim.fields().unwrap().e_at(idx);
        let bound: f64 = (0..3)
            .map(|c| td.trace().cluster_weight(0, 0, c, 1).norm())
            .sum();
        let magnitude = e.iter().map(|c| c.norm_sqr()).sum::<f64>().sqrt();
        // Each cluster contributes exactly its weight at the receiver.
        assert!(magnitude > 0.0 && magnitude <= bound * (1.0 + 1e-9));
        // Clusters sit in the xz plane through the receiver.
        assert!(e[1].norm() < 1e-9 * bound);
    }

    #[test]
    fn test_only_keep_hotspot_clears_fields() {
        let mut td = simulation(2);
        td.build_per_snapshot_state().unwrap();
        let hotspots = td.radiate_across_snapshots(true).unwrap();
        assert_eq!(hotspots.len(), 2);
        assert!(td.snapshots().iter().all(|s| s.fields().is_none()));
    }

    #[test]
    fn test_hotspot_of_matches_batch_radiation() {
        let mut td = simulation(2);
        let single = td.hotspot_of(1).unwrap();
        td.build_per_snapshot_state().unwrap();
        let batch = td.radiate_across_snapshots(true).unwrap();
        let batch = batch[1].as_ref().unwrap();
        assert_eq!(single.anchor, batch.anchor);
        assert!((single.value - batch.value).abs() <= 1e-12 * batch.value.abs());
    }

    #[test]
    fn test_radiate_requires_built_state() {
        let mut td = simulation(2);
        assert!(matches!(
            td.radiate_across_snapshots(true),
            Err(HybridError::Prerequisite(_))
        ));
    }

    #[test]
    fn test_exposure_pipeline_isolates_failures_and_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let td = simulation(4);
        let checkpoint = Checkpoint::for_trace(dir.path(), Path::new("trace.json"), "psapd");
        let solver = MockSolver {
            fail_on: 2,
            calls: AtomicUsize::new(0),
        };
        let values = td
            .run_exposure_pipeline(&solver, &checkpoint, dir.path())
            .unwrap();
        assert_eq!(values[..2], [1.0, 2.0]);
        assert!(values[2].is_nan());
        assert_eq!(values[3], 4.0);
        assert_eq!(solver.calls.load(Ordering::SeqCst), 4);

        let saved = checkpoint.read().unwrap();
        assert!(saved[2].is_nan());
        assert_eq!(saved[3], 4.0);

        // A rerun only retries the failed snapshot.
        let retry = MockSolver {
            fail_on: usize::MAX,
            calls: AtomicUsize::new(0),
        };
        let values = td
            .run_exposure_pipeline(&retry, &checkpoint, dir.path())
            .unwrap();
        assert_eq!(retry.calls.load(Ordering::SeqCst), 1);
        assert_eq!(values[2], 3.0);
    }

    #[test]
    fn test_parallel_sinc_matches_sequential() {
        let dir = tempfile::tempdir().unwrap();
        let td = simulation(3);
        let seq = td
            .run_sinc_pipeline(&Checkpoint::new(dir.path().join("seq.bin")))
            .unwrap();
        let par = td
            .run_sinc_pipeline_parallel(&Checkpoint::new(dir.path().join("par.bin")))
            .unwrap();
        assert_eq!(seq.len(), 3);
        for (a, b) in seq.iter().zip(&par) {
            assert!(a.is_finite() && *a > 0.0);
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_parallel_sinc_resumes_partial_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let td = simulation(3);
        let reference = td
            .run_sinc_pipeline(&Checkpoint::new(dir.path().join("seq.bin")))
            .unwrap();

        let checkpoint = Checkpoint::new(dir.path().join("par.bin"));
        checkpoint.write(&[f64::NAN, 123.0, f64::NAN]).unwrap();
        let values = td.run_sinc_pipeline_parallel(&checkpoint).unwrap();
        assert_eq!(values[1], 123.0);
        assert_eq!(values[0], reference[0]);
        assert_eq!(values[2], reference[2]);
        assert_eq!(checkpoint.read().unwrap(), values);
    }

    #[test]
    fn test_unwritable_checkpoint_does_not_abort_run() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let checkpoint = Checkpoint::new(blocker.join("sinc.bin"));
        let td = simulation(2);

        let values = td.run_sinc_pipeline(&checkpoint).unwrap();
        assert_eq!(values.len(), 2);
        assert!(values.iter().all(|v| v.is_finite()));

        let values = td.run_sinc_pipeline_parallel(&checkpoint).unwrap();
        assert!(values.iter().all(|v| v.is_finite()));
    }

    /// Records the snapshot numbers it is asked to solve.
    struct RecordingSolver {
        seen: Mutex<Vec<(usize, PathBuf)>>,
    }

    impl FullWaveSolver for RecordingSolver {
        fn name(&self) -> &str {
            "recording"
        }

        fn solve(&self, boundary: &Path, snapshot: usize) -> Result<SolverResult> {
            self.seen.lock().unwrap().push((snapshot, boundary.to_path_buf()));
            Ok(SolverResult {
                peak_spatial_average_power_density: 1.0,
                peak_location: [0.0; 3],
            })
        }
    }

    #[test]
    fn test_solver_sees_input_snapshot_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let mut td = simulation(5);
        td.trace_mut().subsample(3);
        assert_eq!(td.trace().snapshot_numbers_in_input_data(), &[0, 2, 4][..]);

        let solver = RecordingSolver {
            seen: Mutex::new(Vec::new()),
        };
        let checkpoint = Checkpoint::new(dir.path().join("psapd.bin"));
        td.run_exposure_pipeline(&solver, &checkpoint, dir.path()).unwrap();

        let seen = solver.seen.into_inner().unwrap();
        let numbers: Vec<usize> = seen.iter().map(|(n, _)| *n).collect();
        assert_eq!(numbers, vec![0, 2, 4]);
        for (n, path) in &seen {
            assert!(path.ends_with(format!("snapshot_{}.hbf", n)));
        }
    }
}
