//! Command-line arguments.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Debug, Parser)]
#[command(
    name = "podwatch",
    version,
    about = "Watch YouTube channels and republish them as podcast feeds"
)]
pub struct Args {
    /// Path to the JSON config file.
    #[arg(long, default_value = "config.json")]
    pub config: PathBuf,

    /// Directory to keep episodes and feed metadata in.
    #[arg(long, default_value = "data")]
    pub data: PathBuf,

    /// On startup, delete files in the data directory that no configured
    /// podcast still needs.
    #[arg(long)]
    pub dataclean: bool,

    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Pretty,
    /// One JSON object per line.
    Json,
    /// Structured records sent to the systemd journal.
    Journald,
}
