use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "turnloop",
    version,
    about = "Run bounded tool-calling analysis sessions against LLM backends"
)]
pub struct Cli {
    /// Configuration file (defaults to TURNLOOP_CONFIG_PATH, then ./turnloop.toml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory searched for turnloop.toml
    #[arg(long, global = true, value_name = "DIR")]
    pub workspace: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run one session and print the analysis and instruction
    Run(RunArgs),
    /// List the built-in backends and whether their API keys are set
    Backends,
    /// Load and validate the configuration, then summarise it
    CheckConfig,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Backend id, e.g. deepseek, gemini, openrouter
    #[arg(long, short)]
    pub backend: String,

    /// The question to analyse. Read from stdin when omitted.
    #[arg(long, short)]
    pub query: Option<String>,

    /// Files attached to the query as context chunks
    #[arg(long = "context", value_name = "FILE")]
    pub context: Vec<PathBuf>,

    /// Override session.max_iterations
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Print the full session result as JSON
    #[arg(long)]
    pub json: bool,
}
