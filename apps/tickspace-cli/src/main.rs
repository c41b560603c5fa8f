mod settings;
mod simulate;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use settings::Settings;
use simulate::SimulationParams;

#[derive(Parser)]
#[command(name = "tickspace-cli", about = "CLI tool for tickspace regionizer operations")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Comma-separated debug categories to enable (lifecycle, scheduler, structure, all)
    #[arg(long, value_name = "CATEGORIES")]
    debug: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print crate versions and default settings
    Info,
    /// Validate a YAML or JSON settings file
    CheckConfig {
        /// Path to a .yaml, .yml or .json file
        path: PathBuf,
    },
    /// Run a deterministic load/unload simulation against the regionizer
    Simulate {
        /// RNG seed for the chunk walk
        #[arg(short, long, default_value = "42")]
        seed: u64,
        /// Number of load/unload steps
        #[arg(long, default_value = "2000")]
        steps: usize,
        /// Maximum simultaneously loaded chunks
        #[arg(long, default_value = "400")]
        chunks: usize,
        /// Scheduler round every N steps
        #[arg(long, default_value = "10")]
        round_every: usize,
        /// Optional settings file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    if let Some(list) = &cli.debug {
        let categories = tickspace_tools::debug::parse_list(list)?;
        tickspace_tools::debug::set_enabled(categories);
        tracing::debug!(enabled = ?tickspace_tools::debug::enabled(), "debug categories");
    }

    match cli.command {
        Commands::Info => {
            println!("tickspace-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("common: {}", tickspace_common::crate_info());
            println!("region: {}", tickspace_region::crate_info());
            println!("sched: {}", tickspace_sched::crate_info());
            println!("tools: {}", tickspace_tools::crate_info());
            println!("defaults:\n{}", serde_yaml::to_string(&Settings::default())?);
        }
        Commands::CheckConfig { path } => {
            let settings = Settings::load(&path)?;
            settings.validate()?;
            println!("{}: OK", path.display());
            print!("{}", serde_yaml::to_string(&settings)?);
        }
        Commands::Simulate {
            seed,
            steps,
            chunks,
            round_every,
            config,
            json,
        } => {
            let settings = match config {
                Some(path) => Settings::load(&path)?,
                None => Settings::default(),
            };
            settings.validate()?;
            let params = SimulationParams {
                seed,
                steps,
                max_chunks: chunks,
                round_every,
                ..SimulationParams::default()
            };
            let report = simulate::run(&params, &settings)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{report}");
            }
            if !report.violations.is_empty() {
                anyhow::bail!("{} invariant violation(s)", report.violations.len());
            }
        }
    }

    Ok(())
}
