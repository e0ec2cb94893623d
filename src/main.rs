// src/main.rs
//! Process entry point: CLI parsing, logging init, and the stdio serve loop.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use nts_fs::config::Config;
use nts_fs::session::SessionManager;

#[derive(Debug, Parser)]
#[command(name = "nts-fs", about = "Transactional filesystem mediation layer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the NDJSON router loop over stdio against a project root.
    Serve {
        #[arg(long)]
        project_root: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { project_root } => serve(project_root),
    }
}

fn serve(project_root: PathBuf) -> anyhow::Result<()> {
    let config = Config::load(&project_root)?;
    let manager = Arc::new(SessionManager::new(project_root, config)?);
    nts_fs::router::serve(manager)?;
    Ok(())
}
