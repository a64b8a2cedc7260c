//! Invocation of the external downloader.
//!
//! The watcher only needs "fetch item X in format F to path P, or tell me
//! why not".  That seam is the [`Fetcher`] trait; [`CommandFetcher`] fulfils
//! it by running a `youtube-dl` compatible command.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

use crate::config::MediaFormat;

/// Socket timeout, in seconds, handed to the downloader.
const SOCKET_TIMEOUT_SECS: &str = "30";

#[derive(Debug, Error)]
pub enum DownloadError {
    /// The command could not be started at all.
    #[error("running {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    /// The command ran and failed.
    #[error("{status}: {stderr}")]
    Failed { status: String, stderr: String },
}

/// Something that can materialise an item's media at a path.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the item `id` in `format`, writing to `output`.
    ///
    /// On success the file at `output` exists and is complete.
    async fn fetch(&self, id: &str, format: &MediaFormat, output: &Path) -> Result<(), DownloadError>;

    /// The command line `fetch` would run, for logging.
    fn describe(&self, id: &str, format: &MediaFormat, output: &Path) -> String;
}

/// Runs `<program> -f <selector> -o <output> --socket-timeout 30 -- <id>`.
#[derive(Debug, Clone)]
pub struct CommandFetcher {
    program: String,
}

impl CommandFetcher {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn args(id: &str, format: &MediaFormat, output: &Path) -> Vec<String> {
        vec![
            "-f".to_string(),
            format.selector.clone(),
            "-o".to_string(),
            output.display().to_string(),
            "--socket-timeout".to_string(),
            SOCKET_TIMEOUT_SECS.to_string(),
            "--".to_string(),
            id.to_string(),
        ]
    }
}

#[async_trait]
impl Fetcher for CommandFetcher {
    async fn fetch(&self, id: &str, format: &MediaFormat, output: &Path) -> Result<(), DownloadError> {
        let result = Command::new(&self.program)
            .args(Self::args(id, format, output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| DownloadError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if result.status.success() {
            Ok(())
        } else {
            Err(DownloadError::Failed {
                status: result.status.to_string(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            })
        }
    }

    fn describe(&self, id: &str, format: &MediaFormat, output: &Path) -> String {
        let mut line = vec![self.program.clone()];
        line.extend(Self::args(id, format, output));
        line.join(" ")
    }
}
