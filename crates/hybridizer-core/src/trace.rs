//! Import of stochastic channel traces.
//!
//! A trace is a JSON record produced by an external ray/cluster channel
//! model. Arrays use the `ndarray` serde layout (`{"v":1,"dim":[..],"data":[..]}`),
//! complex values are `[re, im]` pairs.
//!
//! | Field | Shape |
//! |-------|-------|
//! | `channel` (or `precoded_channel` / `unprecoded_channel`) | `[rx, tx, cluster, subpath, snapshot]` |
//! | `rx_positions` | `[3, rx, snapshot]` |
//! | `lbs_position` | `[3, rx, tx, cluster, snapshot]` |
//! | `num_sub_paths` | per cluster |
//! | `center_frequency` | Hz |
//! | `scenario_list` | optional tag per snapshot |
//!
//! The snapshot axis is always last, so [`ChannelTrace::subsample`] and
//! [`ChannelTrace::truncate`] select along the final axis of every array.

use std::path::Path;

use ndarray::{s, Array3, Array5, Axis};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use hybridizer_geometry::Position;

use crate::error::{HybridError, Result};

/// Propagation condition of one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scenario {
    LineOfSight,
    NonLineOfSight,
    Other(String),
}

impl Scenario {
    pub fn parse(tag: &str) -> Self {
        match tag.trim().to_ascii_uppercase().as_str() {
            "LOS" => Scenario::LineOfSight,
            "NLOS" => Scenario::NonLineOfSight,
            _ => Scenario::Other(tag.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelTrace {
    #[serde(alias = "precoded_channel", alias = "unprecoded_channel")]
    pub channel: Array5<Complex64>,
    pub rx_positions: Array3<f64>,
    pub lbs_position: Array5<f64>,
    #[serde(default)]
    pub num_sub_paths: Vec<usize>,
    pub center_frequency: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario_list: Option<Vec<String>>,
    /// Original snapshot index of each retained snapshot.
    #[serde(default)]
    pub snapshot_numbers_in_input_data: Vec<usize>,
}

impl ChannelTrace {
    /// Read and validate a trace file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content).map_err(|e| match e {
            HybridError::Json(err) => HybridError::format(path.display().to_string(), err.to_string()),
            other => other,
        })
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let mut trace: ChannelTrace = serde_json::from_str(content)?;
        if trace.snapshot_numbers_in_input_data.is_empty() {
            trace.snapshot_numbers_in_input_data = (0..trace.num_snapshots()).collect();
        }
        trace.validate()?;
        log::info!(
            "Loaded channel trace: {} rx, {} tx, {} clusters, {} snapshots at {:.3} GHz",
            trace.num_receivers(),
            trace.num_transmitters(),
            trace.num_clusters(),
            trace.num_snapshots(),
            trace.center_frequency / 1e9
        );
        Ok(trace)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let [n_rx, n_tx, n_cl, _, n_snap] = dims5(self.channel.shape());
        let err = |m: String| Err(HybridError::format("channel trace", m));
        if self.rx_positions.shape() != &[3, n_rx, n_snap][..] {
            return err(format!(
                "rx_positions has shape {:?}, expected [3, {}, {}]",
                self.rx_positions.shape(),
                n_rx,
                n_snap
            ));
        }
        if self.lbs_position.shape() != &[3, n_rx, n_tx, n_cl, n_snap][..] {
            return err(format!(
                "lbs_position has shape {:?}, expected [3, {}, {}, {}, {}]",
                self.lbs_position.shape(),
                n_rx,
                n_tx,
                n_cl,
                n_snap
            ));
        }
        if !self.num_sub_paths.is_empty() && self.num_sub_paths.len() != n_cl {
            return err(format!(
                "num_sub_paths has {} entries for {} clusters",
                self.num_sub_paths.len(),
                n_cl
            ));
        }
        if let Some(tags) = &self.scenario_list {
            if tags.len() != n_snap {
                return err(format!("scenario_list has {} tags for {} snapshots", tags.len(), n_snap));
            }
        }
        if self.snapshot_numbers_in_input_data.len() != n_snap {
            return err("snapshot index map does not match the snapshot count".into());
        }
        if !(self.center_frequency > 0.0) {
            return err(format!("center_frequency must be positive, got {}", self.center_frequency));
        }
        Ok(())
    }

    pub fn num_receivers(&self) -> usize {
        self.channel.shape()[0]
    }

    pub fn num_transmitters(&self) -> usize {
        self.channel.shape()[1]
    }

    pub fn num_clusters(&self) -> usize {
        self.channel.shape()[2]
    }

    pub fn num_snapshots(&self) -> usize {
        self.channel.shape()[4]
    }

    pub fn snapshot_numbers_in_input_data(&self) -> &[usize] {
        &self.snapshot_numbers_in_input_data
    }

    /// Keep `count` snapshots evenly spread over the trace.
    ///
    /// The first and last snapshots are always kept. A `count` of zero or
    /// at least the current snapshot count leaves the trace unchanged.
    pub fn subsample(&mut self, count: usize) {
        let n = self.num_snapshots();
        if count == 0 || count >= n {
            return;
        }
        let indices: Vec<usize> = if count == 1 {
            vec![0]
        } else {
            (0..count)
                .map(|i| ((i * (n - 1)) as f64 / (count - 1) as f64).round() as usize)
                .collect()
        };
        self.select_snapshots(&indices);
        log::info!("Subsampled trace to {} of {} snapshots", count, n);
    }

    /// Keep only the first `count` snapshots.
    pub fn truncate(&mut self, count: usize) {
        let n = self.num_snapshots();
        if count >= n {
            return;
        }
        let indices: Vec<usize> = (0..count).collect();
        self.select_snapshots(&indices);
    }

    fn select_snapshots(&mut self, indices: &[usize]) {
        self.channel = self.channel.select(Axis(4), indices);
        self.rx_positions = self.rx_positions.select(Axis(2), indices);
        self.lbs_position = self.lbs_position.select(Axis(4), indices);
        if let Some(tags) = self.scenario_list.take() {
            self.scenario_list = Some(indices.iter().map(|&i| tags[i].clone()).collect());
        }
        self.snapshot_numbers_in_input_data = indices
            .iter()
            .map(|&i| self.snapshot_numbers_in_input_data[i])
            .collect();
    }

    pub fn receiver_position(&self, rx: usize, snapshot: usize) -> Position {
        let p = self.rx_positions.slice(s![.., rx, snapshot]);
        Position::new(p[0], p[1], p[2])
    }

    /// Last-bounce scatterer position of one cluster.
    pub fn cluster_position(&self, rx: usize, tx: usize, cluster: usize, snapshot: usize) -> Position {
        let p = self.lbs_position.slice(s![.., rx, tx, cluster, snapshot]);
        Position::new(p[0], p[1], p[2])
    }

    /// Complex cluster gain at the receiver: the sum over its sub-paths.
    pub fn cluster_weight(&self, rx: usize, tx: usize, cluster: usize, snapshot: usize) -> Complex64 {
        let paths = self.channel.slice(s![rx, tx, cluster, .., snapshot]);
        let used = self
            .num_sub_paths
            .get(cluster)
            .copied()
            .unwrap_or(paths.len())
            .min(paths.len());
        paths.iter().take(used).sum()
    }

    /// Propagation condition tag of a snapshot, if the trace carries tags.
    pub fn scenario(&self, snapshot: usize) -> Option<Scenario> {
        self.scenario_list
            .as_ref()
            .and_then(|tags| tags.get(snapshot))
            .map(|t| Scenario::parse(t))
    }
}

fn dims5(shape: &[usize]) -> [usize; 5] {
    let mut d = [0; 5];
    for (slot, &n) in d.iter_mut().zip(shape) {
        *slot = n;
    }
    d
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array5;

    /// Single rx/tx trace with `clusters` clusters of two sub-paths.
    ///
    /// Cluster `c` sits at `(c + 1, 0, 2)` relative to the receiver, which
    /// walks along x by 1 cm per snapshot.
    pub fn synthetic_trace(clusters: usize, snapshots: usize) -> ChannelTrace {
        let channel = Array5::from_shape_fn((1, 1, clusters, 2, snapshots), |(_, _, c, p, t)| {
            Complex64::new(1.0 / (c + 1) as f64, 0.1 * t as f64) * if p == 0 { 1.0 } else { 0.5 }
        });
        let rx_positions = Array3::from_shape_fn((3, 1, snapshots), |(a, _, t)| {
            if a == 0 {
                0.01 * t as f64
            } else {
                0.0
            }
        });
        let lbs_position = Array5::from_shape_fn((3, 1, 1, clusters, snapshots), |(a, _, _, c, t)| {
            match a {
                0 => 0.01 * t as f64 + (c + 1) as f64,
                1 => 0.0,
                _ => 2.0,
            }
        });
        ChannelTrace {
            channel,
            rx_positions,
            lbs_position,
            num_sub_paths: vec![2; clusters],
            center_frequency: 28e9,
            scenario_list: Some(
                (0..snapshots)
                    .map(|t| if t % 2 == 0 { "LOS".into() } else { "NLOS".into() })
                    .collect(),
            ),
            snapshot_numbers_in_input_data: (0..snapshots).collect(),
        }
    }

    #[test]
    fn test_json_round_trip_with_alias() {
        let trace = synthetic_trace(3, 4);
        let json = serde_json::to_string(&trace)
            .unwrap()
            .replacen("\"channel\"", "\"precoded_channel\"", 1);
        let loaded = ChannelTrace::from_json(&json).unwrap();
        assert_eq!(loaded.channel, trace.channel);
        assert_eq!(loaded.num_snapshots(), 4);
        assert_eq!(loaded.scenario(1), Some(Scenario::NonLineOfSight));
    }

    #[test]
    fn test_missing_snapshot_map_defaults_to_identity() {
        let mut trace = synthetic_trace(1, 3);
        trace.snapshot_numbers_in_input_data.clear();
        let json = serde_json::to_string(&trace).unwrap();
        let loaded = ChannelTrace::from_json(&json).unwrap();
        assert_eq!(loaded.snapshot_numbers_in_input_data(), &[0, 1, 2]);
    }

    #[test]
    fn test_subsample_maps_back_to_input() {
        let mut trace = synthetic_trace(2, 10);
        trace.subsample(5);
        assert_eq!(trace.num_snapshots(), 5);
        let map = trace.snapshot_numbers_in_input_data().to_vec();
        assert_eq!(map, vec![0, 2, 5, 7, 9]);
        for (t, &orig) in map.iter().enumerate() {
            assert_abs_diff_eq!(trace.receiver_position(0, t).x, 0.01 * orig as f64, epsilon = 1e-15);
        }
        // A second reduction composes with the first.
        trace.truncate(2);
        assert_eq!(trace.snapshot_numbers_in_input_data(), &[0, 2]);
        assert_eq!(trace.scenario_list.as_ref().map(|s| s.len()), Some(2));
    }

    #[test]
    fn test_cluster_weight_sums_sub_paths() {
        let trace = synthetic_trace(2, 3);
        let w = trace.cluster_weight(0, 0, 1, 2);
        // (0.5 + 0.2j) * (1 + 0.5)
        assert_abs_diff_eq!(w.re, 0.75, epsilon = 1e-15);
        assert_abs_diff_eq!(w.im, 0.3, epsilon = 1e-15);
        let p = trace.cluster_position(0, 0, 1, 2);
        assert_abs_diff_eq!(p.x, 2.02, epsilon = 1e-12);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let mut trace = synthetic_trace(2, 3);
        trace.rx_positions = Array3::zeros((3, 1, 2));
        let json = serde_json::to_string(&trace).unwrap();
        assert!(matches!(
            ChannelTrace::from_json(&json),
            Err(HybridError::Format { .. })
        ));
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.json");
        let trace = synthetic_trace(1, 2);
        trace.save(&path).unwrap();
        let loaded = ChannelTrace::load(&path).unwrap();
        assert_eq!(loaded.lbs_position, trace.lbs_position);
    }
}
