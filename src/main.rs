//! turnloop - bounded tool-calling analysis sessions over interchangeable LLM backends
//!
//! Thin binary entry point that delegates to the CLI handlers.

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use turnloop_config::{LoggingConfig, LoopConfig, load_dotenv};

mod cli;
mod gateway;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env (missing file is fine) before TURNLOOP_CONFIG_PATH and API keys are read
    load_dotenv();

    let args = Cli::parse();

    let workspace = match &args.workspace {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("Failed to resolve the current directory")?,
    };
    let (config, source) = LoopConfig::load(args.config.as_deref(), &workspace)?;

    initialize_tracing(&config.logging);

    if let Some(path) = &source {
        tracing::debug!(path = %path.display(), "loaded configuration");
    }

    match &args.command {
        Commands::Run(run) => cli::handle_run_command(&config, run).await,
        Commands::Backends => cli::handle_backends_command(&config),
        Commands::CheckConfig => cli::handle_check_config_command(&config, source.as_deref()),
    }
}

/// `RUST_LOG` takes precedence over `[logging]`.
fn initialize_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.filter_directive()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
