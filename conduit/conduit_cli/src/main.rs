use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod commands;

/// Conduit Command Line Interface
///
/// Inspects routing configurations and replays session request scenarios
/// against a broker.
#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    /// Log level, overridden by RUST_LOG
    #[clap(long, global = true, default_value = "warn")]
    log_level: String,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a session request against the routing rules
    Resolve {
        /// Path to the configuration file
        #[clap(long)]
        config: PathBuf,

        /// Requested service
        #[clap(long)]
        service: String,

        /// Label of the requester
        #[clap(long, default_value = "")]
        label: String,
    },

    /// Replay a script of session requests and print the resulting state
    Replay {
        /// Path to the configuration file
        #[clap(long)]
        config: PathBuf,

        /// Path to the request script
        #[clap(long)]
        script: PathBuf,
    },

    /// Load and validate a configuration file
    Validate {
        /// Path to the configuration file
        #[clap(long)]
        config: PathBuf,
    },
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match cli.command {
        Commands::Resolve {
            config,
            service,
            label,
        } => commands::resolve::run(&config, &service, &label),
        Commands::Replay { config, script } => commands::replay::run(&config, &script),
        Commands::Validate { config } => commands::validate::run(&config),
    }
}
