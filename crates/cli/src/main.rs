//! Timelapse CLI
//!
//! Command-line front end for the timelapse index and video pipeline.

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod commands;

use commands::encode::EncodeCommand;
use commands::handlers::{IngestCommand, PurgeCommand};
use commands::windows::WindowsCommand;

#[derive(Parser)]
#[command(
    name = "timelapse",
    version,
    about = "Maintain camera image indexes and timelapse videos in S3",
    after_help = "EXAMPLES:\n  \
                  # Fold new frames of two cameras into their videos\n  \
                  timelapse encode cam1 cam2\n\n  \
                  # Index an upload and publish window files\n  \
                  timelapse ingest full/cam1/20161023T130005367Z.jpg\n\n  \
                  # Remove the derived copies of a deleted upload\n  \
                  timelapse purge full/cam1/20161023T130005367Z.jpg\n\n  \
                  # Show the current windows of a camera\n  \
                  timelapse windows cam1\n\n\
                  Set RUST_LOG to override the log filter."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Add new frames to each collection's video
    Encode(EncodeCommand),

    /// Index uploaded images and publish window files
    Ingest(IngestCommand),

    /// Delete derived copies of removed uploads
    Purge(PurgeCommand),

    /// Print a collection's windows as JSON
    Windows(WindowsCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    match cli.command {
        Commands::Encode(cmd) => cmd.execute().await,
        Commands::Ingest(cmd) => cmd.execute().await,
        Commands::Purge(cmd) => cmd.execute().await,
        Commands::Windows(cmd) => cmd.execute().await,
    }
}
