//! Collaborator contract for the external full-wave solver.
//!
//! The solver receives a boundary-field file plus a pre-existing project
//! file, runs to completion, and reports the peak spatial-average power
//! density and its location.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::error::{HybridError, Result};

/// Fixed output of a solver run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverResult {
    /// Peak spatial-average power density (W/m²).
    pub peak_spatial_average_power_density: f64,
    /// Location of the peak (m).
    pub peak_location: [f64; 3],
}

/// A full-wave solver driven by boundary-field exports.
pub trait FullWaveSolver: Send + Sync {
    fn name(&self) -> &str;

    /// Solve for one snapshot given its exported boundary field.
    fn solve(&self, boundary: &Path, snapshot: usize) -> Result<SolverResult>;
}

/// Runs the solver as a child process.
///
/// Arguments may contain the placeholders `{project}`, `{boundary}`,
/// `{output}` and `{snapshot}`. The process must write a JSON
/// [`SolverResult`] to the `{output}` path.
#[derive(Debug, Clone)]
pub struct ExternalProcessSolver {
    program: PathBuf,
    args: Vec<String>,
    project: PathBuf,
    work_dir: PathBuf,
}

impl ExternalProcessSolver {
    pub fn new(
        program: impl Into<PathBuf>,
        args: Vec<String>,
        project: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        let args = if args.is_empty() {
            ["--project", "{project}", "--boundary", "{boundary}", "--output", "{output}"]
                .iter()
                .map(|s| s.to_string())
                .collect()
        } else {
            args
        };
        Self {
            program: program.into(),
            args,
            project: project.into(),
            work_dir: work_dir.into(),
        }
    }

    fn output_path(&self, snapshot: usize) -> PathBuf {
        self.work_dir.join(format!("solver_result_{}.json", snapshot))
    }
}

impl FullWaveSolver for ExternalProcessSolver {
    fn name(&self) -> &str {
        "external"
    }

    fn solve(&self, boundary: &Path, snapshot: usize) -> Result<SolverResult> {
        std::fs::create_dir_all(&self.work_dir)?;
        let output = self.output_path(snapshot);
        let _ = std::fs::remove_file(&output);

        let args: Vec<String> = self
            .args
            .iter()
            .map(|a| {
                a.replace("{project}", &self.project.to_string_lossy())
                    .replace("{boundary}", &boundary.to_string_lossy())
                    .replace("{output}", &output.to_string_lossy())
                    .replace("{snapshot}", &snapshot.to_string())
            })
            .collect();
        log::debug!("Running {} {:?}", self.program.display(), args);

        let status = Command::new(&self.program)
            .args(&args)
            .current_dir(&self.work_dir)
            .status()
            .map_err(|e| {
                HybridError::Solver(format!("failed to start {}: {}", self.program.display(), e))
            })?;
        if !status.success() {
            return Err(HybridError::Solver(format!(
                "{} exited with {} on snapshot {}",
                self.program.display(),
                status,
                snapshot
            )));
        }

        let content = std::fs::read_to_string(&output).map_err(|e| {
            HybridError::Solver(format!("no result at {}: {}", output.display(), e))
        })?;
        let result: SolverResult = serde_json::from_str(&content)
            .map_err(|e| HybridError::format(output.display().to_string(), e.to_string()))?;
        Ok(result)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_reads_result_written_by_process() {
        let dir = tempfile::tempdir().unwrap();
        let solver = ExternalProcessSolver::new(
            "sh",
            vec![
                "-c".into(),
                "printf '{\"peak_spatial_average_power_density\": 12.5, \"peak_location\": [0.0, 0.1, 0.2]}' > \"$0\"".into(),
                "{output}".into(),
            ],
            "model.proj",
            dir.path(),
        );
        let result = solver.solve(Path::new("field.hbf"), 4).unwrap();
        assert_eq!(result.peak_spatial_average_power_density, 12.5);
        assert_eq!(result.peak_location, [0.0, 0.1, 0.2]);
    }

    #[test]
    fn test_failing_process_is_solver_error() {
        let dir = tempfile::tempdir().unwrap();
        let solver = ExternalProcessSolver::new("sh", vec!["-c".into(), "exit 3".into()], "p", dir.path());
        assert!(matches!(
            solver.solve(Path::new("f"), 0),
            Err(HybridError::Solver(_))
        ));
    }
}
