// SPDX-License-Identifier: GPL-3.0-only

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use trackcam::Config;

mod cli;

#[derive(Parser)]
#[command(name = "trackcam")]
#[command(about = "Video recorder with subject tracking")]
#[command(version = trackcam::constants::app_info::version())]
struct Cli {
    /// Configuration file (default: ~/.config/trackcam/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
pub struct RecordArgs {
    /// Countdown before recording starts, in seconds
    #[arg(long, default_value = "0")]
    pub delay: u64,

    /// Recording duration in seconds (0 records until Ctrl+C)
    #[arg(short, long, default_value = "10")]
    pub duration: u64,

    /// Capture at the slow-motion rate and stretch playback
    #[arg(short, long)]
    pub slow_motion: bool,

    /// Track QR markers while recording
    #[arg(short, long)]
    pub track: bool,

    /// Capture device: "default", a PipeWire node, or a /dev/video* path
    #[arg(long, default_value = "default")]
    pub device: String,

    /// Use synthetic video and audio instead of a camera
    #[arg(long)]
    pub test_source: bool,

    /// Record without audio
    #[arg(long)]
    pub no_audio: bool,

    /// Directory for the finished recording
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a video
    Record(RecordArgs),

    /// Extract the subject trajectory from a recorded file
    Extract {
        /// Video file to analyze
        input: PathBuf,

        /// Frames skipped between detections
        #[arg(long)]
        stride: Option<usize>,

        /// Write the trajectory as JSON here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Re-smooth a stored detection log
    Smooth {
        /// `*.detections.json` written next to a recording
        log: PathBuf,

        /// Write the trajectory as JSON here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=trackcam=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    let config = match cli.config {
        Some(path) => Config::load(&path)?,
        None => Config::load_or_default(),
    };

    match cli.command {
        Commands::Record(args) => cli::record(args, config),
        Commands::Extract {
            input,
            stride,
            output,
        } => cli::extract(input, stride, output, config),
        Commands::Smooth { log, output } => cli::smooth(log, output, config),
    }
}
