//! TOML configuration deserialisation for exposure jobs.

use std::path::PathBuf;

use serde::Deserialize;

use hybridizer_core::{SimulationParams, TimeDomainConfig};

/// Top-level job configuration.
#[derive(Debug, Deserialize)]
pub struct JobConfig {
    #[serde(default)]
    pub simulation: SimulationConfig,
    pub trace: TraceConfig,
    /// External full-wave solver. Without one the job computes peak Sinc.
    #[serde(default)]
    pub solver: Option<SolverConfig>,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Simulation parameters from TOML.
#[derive(Debug, Deserialize)]
pub struct SimulationConfig {
    /// Compute backend: "auto", "cpu", or "sequential". Default: "auto".
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(flatten)]
    pub params: SimulationParams,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            params: SimulationParams::default(),
        }
    }
}

fn default_backend() -> String {
    "auto".into()
}

/// Channel trace and per-snapshot settings.
#[derive(Debug, Deserialize)]
pub struct TraceConfig {
    /// Path to the channel trace (JSON).
    pub file: PathBuf,
    /// Keep this many evenly spaced snapshots.
    #[serde(default)]
    pub subsample: Option<usize>,
    /// Keep only the first snapshots.
    #[serde(default)]
    pub truncate: Option<usize>,
    #[serde(flatten)]
    pub time_domain: TimeDomainConfig,
}

/// External solver invocation.
#[derive(Debug, Deserialize)]
pub struct SolverConfig {
    pub program: PathBuf,
    /// Arguments; `{project}`, `{boundary}`, `{output}` and `{snapshot}`
    /// are substituted. Empty means the solver's default argument list.
    #[serde(default)]
    pub args: Vec<String>,
    pub project: PathBuf,
    /// Directory for boundary files and solver results (default: "./work").
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("./work")
}

/// Output configuration.
#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    /// Output directory (default: "./output").
    #[serde(default = "default_output_dir")]
    pub directory: String,
    /// Evaluate Sinc across the thread pool (solver-free jobs only).
    #[serde(default)]
    pub parallel: bool,
    /// Also locate and save the hotspot of every snapshot (default: false).
    #[serde(default)]
    pub save_hotspots: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
            parallel: false,
            save_hotspots: false,
        }
    }
}

fn default_output_dir() -> String {
    "./output".into()
}

/// Load and parse a TOML job configuration file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<JobConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: JobConfig = toml::from_str(&content)?;
    Ok(config)
}
