//! hybridizer command-line interface.
//!
//! Run exposure studies over channel traces from TOML job files:
//! ```sh
//! hybridizer run job.toml
//! hybridizer validate job.toml
//! hybridizer patterns
//! ```

mod config;
mod runner;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use hybridizer_patterns::{PatternRegistry, RadiationPattern};

#[derive(Parser)]
#[command(name = "hybridizer")]
#[command(about = "hybridizer: ray-traced channel to near-field exposure pipeline")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an exposure job from a TOML configuration file.
    Run {
        /// Path to the job configuration file.
        config: PathBuf,
        /// Output directory (overrides config file setting).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate a configuration file and its channel trace without running.
    Validate {
        /// Path to the job configuration file.
        config: PathBuf,
    },
    /// List the built-in radiation patterns.
    Patterns,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, output } => {
            println!("hybridizer exposure pipeline");
            println!("============================");
            let job = config::load_config(&config)?;
            println!("Configuration: {}", config.display());

            let out_dir = output.unwrap_or_else(|| PathBuf::from(&job.output.directory));
            let result = runner::run_job(&job, &out_dir)?;

            let csv_path = out_dir.join(format!("{}.csv", result.metric));
            runner::write_results_csv(&result, &csv_path, &job)?;
            if result.hotspots.is_some() {
                runner::write_hotspots_csv(&result, &out_dir.join("hotspots.csv"))?;
            }

            let failed = result.failed();
            if failed > 0 {
                println!("{} of {} snapshots failed; rerun to retry them.", failed, result.values.len());
            }
            println!("Run complete.");
            Ok(())
        }
        Commands::Validate { config } => {
            let job = config::load_config(&config)?;
            let td = runner::prepare_simulation(&job)?;
            println!("Configuration is valid: {}", config.display());
            println!(
                "Trace: {} snapshots, {} clusters",
                td.num_snapshots(),
                td.trace().num_clusters()
            );
            Ok(())
        }
        Commands::Patterns => {
            let registry = PatternRegistry::with_builtins();
            let wavelength = hybridizer_core::types::wavelength(28e9);
            println!("Built-in radiation patterns:");
            println!();
            for name in registry.names() {
                let pattern = registry.get(name)?;
                let size = match pattern.size(wavelength) {
                    Some(d) => format!("{:.2} mm at 28 GHz", d * 1e3),
                    None => "point source".into(),
                };
                println!("    {:<12} {:?}, {}", name, pattern.kind(), size);
            }
            println!();
            println!("Measured patterns are loaded from table or far-field files.");
            Ok(())
        }
    }
}
