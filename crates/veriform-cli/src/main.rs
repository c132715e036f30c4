//! Veriform CLI
//!
//! Unified command-line interface for:
//! - Running the extraction pipeline over a directory of source documents
//! - Rendering a stored run's final fields for review

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod run;
mod show;

#[derive(Parser)]
#[command(
    name = "veriform",
    about = "Evidence-constrained field extraction from source documents",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a full pipeline run over a documents directory
    Run(run::RunArgs),
    /// Show the final fields of a stored run
    Show(show::ShowArgs),
}

/// Base directory for run storage, overridable per invocation.
#[derive(clap::Args)]
struct StorageArgs {
    /// Base directory for run storage
    #[arg(long, default_value = "runs")]
    runs_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run::execute(args).await,
        Commands::Show(args) => show::execute(args),
    }
}
