//! Job execution: load the trace, run the snapshot pipeline, write results.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use hybridizer_compute::ComputeBackend;
use hybridizer_core::{Checkpoint, ExternalProcessSolver, Hotspot, TimeDomainSimulation};

use crate::config::JobConfig;

/// Result of a completed job.
pub struct JobOutput {
    /// Name of the per-snapshot metric, `psapd` or `Sinc`.
    pub metric: &'static str,
    /// Metric per retained snapshot, NaN where the snapshot failed.
    pub values: Vec<f64>,
    /// Input-trace index of each retained snapshot.
    pub input_snapshots: Vec<usize>,
    pub hotspots: Option<Vec<Option<Hotspot>>>,
}

impl JobOutput {
    pub fn failed(&self) -> usize {
        self.values.iter().filter(|v| !v.is_finite()).count()
    }
}

/// Load the trace described by `job` with subsampling and truncation applied.
pub fn prepare_simulation(job: &JobConfig) -> Result<TimeDomainSimulation> {
    let backend = create_backend(&job.simulation.backend)?;
    let mut td = TimeDomainSimulation::import_channel_trace(
        &job.trace.file,
        job.trace.time_domain.clone(),
        job.simulation.params.clone(),
        backend,
    )
    .with_context(|| format!("Failed to import channel trace {}", job.trace.file.display()))?;

    if let Some(n) = job.trace.subsample {
        td.trace_mut().subsample(n);
    }
    if let Some(n) = job.trace.truncate {
        td.trace_mut().truncate(n);
    }
    if td.num_snapshots() == 0 {
        bail!("Channel trace {} holds no snapshots", job.trace.file.display());
    }
    Ok(td)
}

/// Run the job, checkpointing into `out_dir`.
pub fn run_job(job: &JobConfig, out_dir: &Path) -> Result<JobOutput> {
    let td = prepare_simulation(job)?;
    let trace = td.trace();
    println!(
        "Trace: {} snapshots, {} clusters, {:.3} GHz",
        td.num_snapshots(),
        trace.num_clusters(),
        td.params().frequency / 1e9
    );

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output directory {}", out_dir.display()))?;

    let (metric, values) = match &job.solver {
        Some(solver_cfg) => {
            let solver = ExternalProcessSolver::new(
                &solver_cfg.program,
                solver_cfg.args.clone(),
                &solver_cfg.project,
                &solver_cfg.work_dir,
            );
            let checkpoint = Checkpoint::for_trace(out_dir, &job.trace.file, "psapd");
            println!("Solver: {}", solver_cfg.program.display());
            let values = td
                .run_exposure_pipeline(&solver, &checkpoint, &solver_cfg.work_dir)
                .context("Exposure pipeline failed")?;
            ("psapd", values)
        }
        None => {
            let checkpoint = Checkpoint::for_trace(out_dir, &job.trace.file, "Sinc");
            let values = if job.output.parallel {
                td.run_sinc_pipeline_parallel(&checkpoint)
            } else {
                td.run_sinc_pipeline(&checkpoint)
            }
            .context("Sinc pipeline failed")?;
            ("Sinc", values)
        }
    };

    let hotspots = if job.output.save_hotspots {
        let found = (0..td.num_snapshots())
            .map(|t| match td.hotspot_of(t) {
                Ok(h) => Some(h),
                Err(e) => {
                    log::error!("Hotspot of snapshot {} failed: {}", t, e);
                    None
                }
            })
            .collect();
        Some(found)
    } else {
        None
    };

    Ok(JobOutput {
        metric,
        values,
        input_snapshots: td.trace().snapshot_numbers_in_input_data().to_vec(),
        hotspots,
    })
}

/// Write the per-snapshot metric as CSV.
pub fn write_results_csv(output: &JobOutput, path: &Path, job: &JobConfig) -> Result<()> {
    use std::io::Write;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    writeln!(file, "# hybridizer exposure results")?;
    writeln!(file, "# Version: {}", env!("CARGO_PKG_VERSION"))?;
    writeln!(file, "# trace: {}", job.trace.file.display())?;
    writeln!(file, "# metric: {} (W/m^2)", output.metric)?;
    writeln!(
        file,
        "# receiver: {}, transmitter: {}",
        job.trace.time_domain.receiver_index, job.trace.time_domain.transmitter_index
    )?;
    writeln!(file, "#")?;
    writeln!(file, "snapshot,input_snapshot,{}", output.metric)?;
    for (t, (value, input)) in output.values.iter().zip(&output.input_snapshots).enumerate() {
        writeln!(file, "{},{},{:.6e}", t, input, value)?;
    }

    println!("Results written to {}", path.display());
    Ok(())
}

/// Write located hotspots as CSV; failed snapshots are skipped.
pub fn write_hotspots_csv(output: &JobOutput, path: &Path) -> Result<()> {
    use std::io::Write;

    let Some(hotspots) = &output.hotspots else {
        return Ok(());
    };
    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    writeln!(file, "# hybridizer hotspots")?;
    writeln!(file, "#")?;
    writeln!(
        file,
        "snapshot,input_snapshot,x_m,y_m,z_m,value,dimensionality,shape,fwhm_x_m,fwhm_y_m,fwhm_z_m"
    )?;
    for (t, hotspot) in hotspots.iter().enumerate() {
        let Some(h) = hotspot else { continue };
        let fwhm = |axis: usize| match &h.axes[axis] {
            Some(peak) if peak.genuine => format!("{:.6e}", peak.fwhm),
            _ => String::new(),
        };
        writeln!(
            file,
            "{},{},{:.6e},{:.6e},{:.6e},{:.6e},{},{},{},{},{}",
            t,
            output.input_snapshots.get(t).copied().unwrap_or(t),
            h.location.x,
            h.location.y,
            h.location.z,
            h.value,
            h.dimensionality,
            h.shape().label(),
            fwhm(0),
            fwhm(1),
            fwhm(2)
        )?;
    }

    println!("Hotspots written to {}", path.display());
    Ok(())
}

/// Create a compute backend based on the user's preference string.
///
/// - `"cpu"`: Rayon thread pool.
/// - `"sequential"`: single-threaded reference backend.
/// - `"auto"` (default): the default backend of the enabled features.
pub fn create_backend(preference: &str) -> Result<Arc<dyn ComputeBackend>> {
    let backend: Arc<dyn ComputeBackend> = match preference {
        "cpu" => Arc::new(hybridizer_compute::CpuBackend::new()),
        "sequential" => Arc::new(hybridizer_compute::SequentialBackend),
        "auto" => hybridizer_compute::default_backend(),
        other => bail!(
            "Unknown backend '{}' (expected \"auto\", \"cpu\" or \"sequential\")",
            other
        ),
    };
    println!("Backend: {}", backend.device_info().name);
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{JobConfig, OutputConfig, SimulationConfig, TraceConfig};
    use hybridizer_core::{ChannelTrace, TimeDomainConfig};
    use ndarray::{Array3, Array5};
    use num_complex::Complex64;

    /// Two-cluster, four-snapshot trace with the receiver drifting along x.
    fn write_trace(path: &Path) {
        let (clusters, snapshots) = (2, 4);
        let channel = Array5::from_shape_fn((1, 1, clusters, 1, snapshots), |(_, _, c, _, t)| {
            Complex64::new(1.0 / (c + 1) as f64, 0.1 * t as f64)
        });
        let rx_positions =
            Array3::from_shape_fn((3, 1, snapshots), |(a, _, t)| if a == 0 { 0.01 * t as f64 } else { 0.0 });
        let lbs = Array5::from_shape_fn((3, 1, 1, clusters, snapshots), |(a, _, _, c, t)| match a {
            0 => 0.01 * t as f64 + (c + 1) as f64,
            1 => 0.0,
            _ => 2.0,
        });
        let trace = ChannelTrace {
            channel,
            rx_positions,
            lbs_position: lbs,
            num_sub_paths: vec![1; clusters],
            center_frequency: 28e9,
            scenario_list: None,
            snapshot_numbers_in_input_data: (0..snapshots).collect(),
        };
        trace.save(path).unwrap();
    }

    fn job(trace: &Path, out: &Path) -> JobConfig {
        JobConfig {
            simulation: SimulationConfig {
                backend: "sequential".into(),
                ..Default::default()
            },
            trace: TraceConfig {
                file: trace.to_path_buf(),
                subsample: None,
                truncate: Some(3),
                time_domain: TimeDomainConfig {
                    grid_half_size: [0.004, 0.004, 0.004],
                    cell_size: 0.001,
                    export_half_size: 0.002,
                    ..Default::default()
                },
            },
            solver: None,
            output: OutputConfig {
                directory: out.display().to_string(),
                parallel: false,
                save_hotspots: true,
            },
        }
    }

    #[test]
    fn test_unknown_backend_rejected() {
        assert!(create_backend("gpu").is_err());
        assert!(create_backend("sequential").is_ok());
    }

    #[test]
    fn test_sinc_job_writes_results() {
        let dir = tempfile::tempdir().unwrap();
        let trace = dir.path().join("street.json");
        write_trace(&trace);
        let job = job(&trace, dir.path());

        let output = run_job(&job, dir.path()).unwrap();
        assert_eq!(output.metric, "Sinc");
        assert_eq!(output.values.len(), 3);
        assert_eq!(output.failed(), 0);
        assert!(output.values.iter().all(|v| *v > 0.0));
        assert!(dir.path().join("street_Sinc.bin").exists());

        let csv = dir.path().join("results.csv");
        write_results_csv(&output, &csv, &job).unwrap();
        let text = std::fs::read_to_string(&csv).unwrap();
        let rows: Vec<&str> = text.lines().filter(|l| !l.starts_with('#')).collect();
        assert_eq!(rows[0], "snapshot,input_snapshot,Sinc");
        assert_eq!(rows.len(), 4);
        assert!(rows[3].starts_with("2,2,"));

        let hotspots = dir.path().join("hotspots.csv");
        write_hotspots_csv(&output, &hotspots).unwrap();
        let text = std::fs::read_to_string(&hotspots).unwrap();
        assert_eq!(text.lines().filter(|l| !l.starts_with('#')).count(), 4);
    }

    #[test]
    fn test_subsample_keeps_input_indices() {
        let dir = tempfile::tempdir().unwrap();
        let trace = dir.path().join("street.json");
        write_trace(&trace);
        let mut job = job(&trace, dir.path());
        job.trace.subsample = Some(2);
        job.trace.truncate = None;

        let td = prepare_simulation(&job).unwrap();
        assert_eq!(td.trace().snapshot_numbers_in_input_data(), &[0, 3][..]);
    }

    #[test]
    fn test_missing_trace_reported() {
        let dir = tempfile::tempdir().unwrap();
        let job = job(&dir.path().join("absent.json"), dir.path());
        let err = run_job(&job, dir.path()).err().unwrap();
        assert!(format!("{:#}", err).contains("absent.json"));
    }
}
