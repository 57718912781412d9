//! Tandem operator CLI
//!
//! Drives a synthetic actor workload against a configured scheduler and
//! inspects scheduler configuration files.

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tandem")]
#[command(about = "Cooperative actor scheduler toolkit", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Runner assignment policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    /// Uniformly random runner per submission
    Random,
    /// Runners in index order
    RoundRobin,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a synthetic workload and print the runner metrics
    Run {
        /// Scheduler config file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Number of runner threads (overrides the config; 0 = CPU count)
        #[arg(short, long)]
        runners: Option<usize>,
        /// Number of actors to submit
        #[arg(short, long, default_value_t = 100)]
        actors: usize,
        /// Yields per actor before it finishes
        #[arg(short, long, default_value_t = 10)]
        yields: u64,
        /// Length of one blocking call per actor, in milliseconds (0 = none)
        #[arg(short, long, default_value_t = 0)]
        blocking_ms: u64,
        /// Shutdown grace period in milliseconds (overrides the config)
        #[arg(long)]
        grace_ms: Option<u64>,
        /// Runner assignment strategy
        #[arg(short, long, value_enum, default_value_t = StrategyArg::Random)]
        strategy: StrategyArg,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Scheduler config file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn init_logging() {
    let filter = std::env::var("TANDEM_LOG")
        .ok()
        .map(EnvFilter::new)
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("warn,tandem_runtime=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging();

    match cli.command {
        Commands::Run {
            config,
            runners,
            actors,
            yields,
            blocking_ms,
            grace_ms,
            strategy,
            json,
        } => commands::run::execute(commands::run::RunArgs {
            config,
            runners,
            actors,
            yields,
            blocking_ms,
            grace_ms,
            strategy,
            json,
        }),

        Commands::Config { config } => commands::config::execute(config.as_deref()),
    }
}
