//! End-to-end scenarios for the field engine.
//!
//! - Geometry: rotation round trip, nearest-coordinate discretisation
//! - Precoding: unit Frobenius norm, MRT vs ZF focusing and suppression
//! - Cluster pruning: requested unaccounted fraction, dominant cluster
//! - Hotspot: Gaussian peak height and FWHM
//! - Channel trace: subsampling index map, file round trip
//! - Boundary export: binary and text round trips from a focused simulation

use std::f64::consts::PI;
use std::sync::Arc;

use approx::{assert_abs_diff_eq, assert_relative_eq};
use ndarray::{Array3, Array5};
use num_complex::Complex64;

use hybridizer_compute::{CpuBackend, SequentialBackend};
use hybridizer_core::collection::tail_fraction;
use hybridizer_core::{
    hotspot_in, BoundaryRecord, ChannelTrace, DeterministicSimulation, HotspotAnchor,
    PrecodingScheme, Quantity, SimulationParams, SourceCollection,
};
use hybridizer_geometry::{Grid, Position};
use hybridizer_patterns::{PatternRegistry, RadiationPattern};

// ─────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────

fn params() -> SimulationParams {
    SimulationParams {
        frequency: 3e9,
        ..Default::default()
    }
}

/// Two isotropic elements 30 cm apart and two receivers 30 cm apart, 2 m away.
fn two_element_link(backend_parallel: bool) -> DeterministicSimulation {
    let grid = Grid::new(
        Position::new(-0.5, 1.5, -0.05),
        Position::new(0.5, 2.5, 0.05),
        [40, 40, 4],
        false,
    )
    .unwrap();
    let registry = PatternRegistry::with_builtins();
    let iso = registry.get("isotropic").unwrap();
    let mut array = SourceCollection::antenna_array(1.0);
    array.add_element(Position::new(-0.15, 0.0, 0.0), iso.clone(), None).unwrap();
    array.add_element(Position::new(0.15, 0.0, 0.0), iso, None).unwrap();
    array.divide_power().unwrap();
    let receivers = SourceCollection::receivers_at(&[
        Position::new(-0.1, 2.0, 0.0),
        Position::new(0.2, 2.0, 0.0),
    ]);
    let backend: Arc<dyn hybridizer_compute::ComputeBackend> = if backend_parallel {
        Arc::new(CpuBackend::new())
    } else {
        Arc::new(SequentialBackend)
    };
    DeterministicSimulation::new(grid, array, receivers, params(), backend).unwrap()
}

fn frobenius(m: &ndarray::Array2<Complex64>) -> f64 {
    m.iter().map(|c| c.norm_sqr()).sum::<f64>().sqrt()
}

fn realised(sim: &DeterministicSimulation, weights: &ndarray::Array1<Complex64>) -> Vec<f64> {
    let h = sim.channel_matrix().unwrap();
    h.rows()
        .into_iter()
        .map(|row| row.iter().zip(weights).map(|(a, b)| a * b).sum::<Complex64>().norm())
        .collect()
}

// ─────────────────────────────────────────────────────────────
// Geometry
// ─────────────────────────────────────────────────────────────

#[test]
fn test_rotation_round_trip() {
    let points = [
        Position::new(1.0, 2.0, 3.0),
        Position::new(-0.3, 0.0, 7.5),
        Position::new(1e-3, -4e-3, 0.0),
    ];
    for p in points {
        for theta in [0.0, 0.3, PI / 2.0, -2.1, 5.0] {
            let back = p.rotate_z(theta).rotate_z(-theta);
            assert!(back.approx_eq(&p, 1e-12), "{:?} -> {:?}", p, back);
        }
    }
}

#[test]
fn test_discretize_picks_nearest_coordinates() {
    let grid = Grid::new(Position::origin(), Position::new(1.0, 2.0, 0.5), [10, 8, 5], false).unwrap();
    let p = Position::new(0.43, 1.13, 0.26);
    let idx = grid.discretize(&p);
    for axis in 0..3 {
        let coords = grid.axis(axis);
        let value = p.component(axis);
        let best = coords
            .iter()
            .map(|c| (c - value).abs())
            .fold(f64::INFINITY, f64::min);
        assert_abs_diff_eq!((coords[idx[axis]] - value).abs(), best, epsilon = 1e-12);
    }
}

// ─────────────────────────────────────────────────────────────
// Precoding and focusing
// ─────────────────────────────────────────────────────────────

#[test]
fn test_precoding_has_unit_frobenius_norm() {
    for scheme in [PrecodingScheme::Mrt, PrecodingScheme::Zf] {
        let mut sim = two_element_link(true);
        sim.compute_channel_matrix().unwrap();
        let p = sim.compute_precoding_matrix(scheme).unwrap();
        assert_relative_eq!(frobenius(p), 1.0, epsilon = 1e-12);
    }
}

#[test]
fn test_mrt_beats_zf_at_target_and_both_suppress_other_receiver() {
    let mut mrt = two_element_link(true);
    mrt.compute_channel_matrix().unwrap();
    mrt.compute_precoding_matrix(PrecodingScheme::Mrt).unwrap();
    let w_mrt = mrt.focus_on(0).unwrap().clone();

    let mut zf = two_element_link(false);
    zf.compute_channel_matrix().unwrap();
    zf.compute_precoding_matrix(PrecodingScheme::Zf).unwrap();
    let w_zf = zf.focus_on(0).unwrap().clone();

    // Equal weights under the same Frobenius convention.
    let equal = ndarray::Array1::from_elem(2, Complex64::new(0.5, 0.0));

    let g_mrt = realised(&mrt, &w_mrt);
    let g_zf = realised(&zf, &w_zf);
    let g_eq = realised(&mrt, &equal);
    assert!(g_mrt[0] >= g_zf[0], "MRT {} < ZF {}", g_mrt[0], g_zf[0]);
    assert!(g_zf[1] < 1e-9 * g_zf[0]);
    assert!(g_mrt[1] < g_eq[1]);
    assert!(mrt.gamma().unwrap() < 1.0);
    assert!(zf.kappa().unwrap() > 1.0);
}

#[test]
fn test_focused_field_peaks_near_target() {
    let mut sim = two_element_link(true);
    sim.compute_channel_matrix().unwrap();
    sim.compute_precoding_matrix(PrecodingScheme::Zf).unwrap();
    sim.focus_on(1).unwrap();
    let map = sim.get_value(&Quantity::E_NORM).unwrap();
    let grid = sim.grid();
    let at_target = map.values[grid.discretize(&Position::new(0.2, 2.0, 0.0))];
    let at_other = map.values[grid.discretize(&Position::new(-0.1, 2.0, 0.0))];
    assert!(at_target > 1e6 * at_other);
}

// ─────────────────────────────────────────────────────────────
// Cluster pruning
// ─────────────────────────────────────────────────────────────

fn cluster_set(weights: &[f64]) -> SourceCollection {
    let rx = Position::origin();
    let mut set = SourceCollection::cluster_set();
    for (i, &w) in weights.iter().enumerate() {
        let angle = i as f64 * 0.7;
        set.add_cluster(
            Position::new(10.0 * angle.cos(), 10.0 * angle.sin(), 1.0),
            Complex64::from_polar(w, angle),
            rx,
        )
        .unwrap();
    }
    set
}

#[test]
fn test_prune_by_magnitude_fraction() {
    let weights = [1.0, 10.0, 1.0, 1.0, 1.0];
    let mut set = cluster_set(&weights);
    let kept = set.prune_by_contribution(0.1).unwrap();
    assert_eq!(kept, 4);
    let total: f64 = weights.iter().sum();
    let discarded = total - set.iter().map(|e| e.weight().unwrap().norm()).sum::<f64>();
    assert_relative_eq!(discarded / total, 1.0 / 14.0, epsilon = 1e-12);
    assert!(set.iter().any(|e| (e.weight().unwrap().norm() - 10.0).abs() < 1e-12));
}

#[test]
fn test_prune_fraction_within_one_step() {
    let weights: Vec<f64> = (0..40).map(|i| 1.0 / (1.0 + i as f64).sqrt()).collect();
    let mut sorted: Vec<f64> = weights.clone();
    sorted.sort_by(|a, b| b.total_cmp(a));
    for target in [0.05, 0.2, 0.5] {
        let mut set = cluster_set(&weights);
        let kept = set.prune_by_contribution(target).unwrap();
        let achieved = tail_fraction(&sorted, kept);
        // Neighbouring counts differ by one element's share.
        let step = sorted[kept - 1] / sorted.iter().sum::<f64>();
        assert!(
            (achieved - target).abs() <= step + 1e-12,
            "target {} achieved {} with {} kept",
            target,
            achieved,
            kept
        );
    }
}

// ─────────────────────────────────────────────────────────────
// Hotspot
// ─────────────────────────────────────────────────────────────

#[test]
fn test_gaussian_hotspot_height_and_width() {
    let grid = Grid::new(Position::new(-0.05, 0.0, 0.0), Position::new(0.05, 0.01, 0.01), [200, 2, 2], false)
        .unwrap();
    let (height, fwhm) = (42.0, 0.012);
    let sigma = fwhm / (2.0 * (2.0 * 2.0_f64.ln()).sqrt());
    let values = Array3::from_shape_fn((201, 3, 3), |(i, _, _)| {
        let x = grid.axis(0)[i] - 0.005;
        height * (-x * x / (2.0 * sigma * sigma)).exp()
    });
    let hotspot = hotspot_in(&values, &grid, HotspotAnchor::Maximum).unwrap();
    let x = hotspot.axes[0].unwrap();
    assert_relative_eq!(x.height, height, max_relative = 0.02);
    assert_relative_eq!(x.fwhm, fwhm, max_relative = 0.03);
    assert_relative_eq!(x.coordinate, 0.005, epsilon = 1e-9);
    assert_eq!(hotspot.dimensionality, 1);
}

// ─────────────────────────────────────────────────────────────
// Channel trace
// ─────────────────────────────────────────────────────────────

fn trace_json(snapshots: usize) -> String {
    let channel = Array5::from_shape_fn((1, 1, 2, 1, snapshots), |(_, _, c, _, t)| {
        Complex64::new(1.0 + c as f64, t as f64)
    });
    let rx = Array3::from_shape_fn((3, 1, snapshots), |(a, _, t)| if a == 1 { t as f64 } else { 0.0 });
    let lbs = Array5::from_shape_fn((3, 1, 1, 2, snapshots), |(a, _, _, c, _)| (a + c) as f64 + 3.0);
    serde_json::json!({
        "unprecoded_channel": channel,
        "rx_positions": rx,
        "lbs_position": lbs,
        "num_sub_paths": [1, 1],
        "center_frequency": 28e9,
    })
    .to_string()
}

#[test]
fn test_subsample_halves_snapshots_and_maps_back() {
    for n in [10, 11, 7] {
        let mut trace = ChannelTrace::from_json(&trace_json(n)).unwrap();
        trace.subsample(n / 2);
        let kept = trace.num_snapshots();
        assert!((kept as isize - (n / 2) as isize).abs() <= 1);
        for (t, &orig) in trace.snapshot_numbers_in_input_data().iter().enumerate() {
            // Receiver y encodes the original snapshot number.
            assert_eq!(trace.receiver_position(0, t).y, orig as f64);
            assert_eq!(trace.cluster_weight(0, 0, 0, t).im, orig as f64);
        }
    }
}

#[test]
fn test_trace_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trace.json");
    std::fs::write(&path, trace_json(4)).unwrap();
    let mut trace = ChannelTrace::load(&path).unwrap();
    trace.truncate(3);
    let copy = dir.path().join("copy.json");
    trace.save(&copy).unwrap();
    let back = ChannelTrace::load(&copy).unwrap();
    assert_eq!(back.num_snapshots(), 3);
    assert_eq!(back.snapshot_numbers_in_input_data(), &[0, 1, 2]);
    assert!(back.scenario(0).is_none());
}

// ─────────────────────────────────────────────────────────────
// Boundary export
// ─────────────────────────────────────────────────────────────

#[test]
fn test_exported_boundary_field_reads_back() {
    let mut sim = two_element_link(true);
    sim.compute_channel_matrix().unwrap();
    sim.compute_precoding_matrix(PrecodingScheme::Mrt).unwrap();
    sim.focus(None).unwrap();

    let record = BoundaryRecord::from_fields(
        sim.grid(),
        sim.fields().unwrap(),
        &Position::new(-0.1, 2.0, 0.0),
        0.1,
        sim.params().frequency,
        true,
    )
    .unwrap();
    assert_eq!(record.shape(), [9, 9, 5]);

    let dir = tempfile::tempdir().unwrap();
    let bin = dir.path().join("rx0.hbf");
    record.write_binary(&bin).unwrap();
    assert_eq!(BoundaryRecord::read_binary(&bin).unwrap(), record);

    let stem = dir.path().join("rx0");
    record.write_text(&stem).unwrap();
    let text = BoundaryRecord::read_text(&stem).unwrap();
    for (a, b) in text.e.iter().zip(record.e.iter()) {
        assert_relative_eq!(a.re, b.re, max_relative = 1e-12, epsilon = 1e-300);
        assert_relative_eq!(a.im, b.im, max_relative = 1e-12, epsilon = 1e-300);
    }
}

#[test]
fn test_measured_pattern_shared_from_registry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("horn.txt");
    let mut table = String::from("Theta Phi Abs(Grlz)[dBi] Abs(Theta) Phase(Theta) Abs(Phi) Phase(Phi) Ax.Ratio\n----\n");
    for t in (0..=180).step_by(30) {
        for p in (0..360).step_by(90) {
            table.push_str(&format!("{} {} 0 0 0 -100 0 40\n", t, p));
        }
    }
    std::fs::write(&path, table).unwrap();
    let mut registry = PatternRegistry::with_builtins();
    registry.load_table("horn", &path, None).unwrap();
    let horn = registry.get("horn").unwrap();
    let again = registry.get("horn").unwrap();
    assert!(Arc::ptr_eq(&horn, &again));
    let g = horn.gain(1.0, 0.5, hybridizer_patterns::PatternComponent::Theta).unwrap();
    assert_relative_eq!(g.norm(), 1.0, max_relative = 1e-9);
}
