//! segload entry point.

mod app;
mod config;
mod sink;

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "segload", version, about = "Segmented, resumable uploads into a directory")]
struct Args {
    /// Configuration file (defaults to the per-user location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Destination directory
    dest: PathBuf,

    /// Files to upload
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting segload");

    let config = config::Config::load(args.config.as_deref())?;
    tracing::info!(
        chunk_size = config.chunk_size,
        mode = ?config.upload_mode,
        resume = config.resume,
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    let jobs = rt.block_on(app::run(config, args.dest, args.files))?;

    tracing::info!(files = jobs.len(), "all uploads finished");
    Ok(())
}
