//! Startup removal of data files the current config no longer needs.
//!
//! Every watcher sends a [`CleaningWhitelist`] during its first processing
//! pass and then waits.  The [`CleanupCoordinator`] collects exactly one
//! whitelist per watcher, deletes every file in the data subdirectories that
//! no whitelist mentions, and only then releases the watchers.  A watcher
//! therefore never serves or downloads around a file that is about to go.
//!
//! If a watcher dies before sending its whitelist the coordinator waits
//! forever; cleanup is a one-shot, opt-in startup feature.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CleanError {
    #[error("scanning {path}: {source}")]
    Scan {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("removing {path}: {source}")]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("only {received} of {expected} watchers sent a whitelist")]
    Incomplete { expected: usize, received: usize },
}

/// Paths one watcher still needs, plus the signal that releases it.
#[derive(Debug)]
pub struct CleaningWhitelist {
    pub paths: HashSet<PathBuf>,
    finished: oneshot::Sender<()>,
}

/// The watcher side of the barrier.
#[derive(Debug, Clone)]
pub struct CleanupHandle {
    tx: mpsc::Sender<CleaningWhitelist>,
}

impl CleanupHandle {
    /// Send `paths` to the coordinator and wait until cleaning has finished.
    ///
    /// Returns once the coordinator releases this watcher, or has gone away.
    pub async fn submit(&self, paths: HashSet<PathBuf>) {
        let (finished, done) = oneshot::channel();
        if self.tx.send(CleaningWhitelist { paths, finished }).await.is_err() {
            return;
        }
        // A dropped sender releases us just the same.
        let _ = done.await;
    }
}

/// Collects one whitelist per watcher, then prunes `dirs`.
pub struct CleanupCoordinator {
    participants: usize,
    dirs: Vec<PathBuf>,
    rx: mpsc::Receiver<CleaningWhitelist>,
}

impl CleanupCoordinator {
    /// A coordinator expecting `participants` whitelists, and the handle to
    /// give each of them.
    pub fn new(participants: usize, dirs: Vec<PathBuf>) -> (Self, CleanupHandle) {
        let (tx, rx) = mpsc::channel(participants.max(1));
        let coordinator = Self {
            participants,
            dirs,
            rx,
        };
        (coordinator, CleanupHandle { tx })
    }

    /// Run the barrier to completion and return how many files were removed.
    ///
    /// Watchers are released whether or not the scan succeeded.
    pub async fn run(mut self) -> Result<usize, CleanError> {
        let mut keepers = HashSet::new();
        let mut waiting = Vec::with_capacity(self.participants);

        while waiting.len() < self.participants {
            let Some(whitelist) = self.rx.recv().await else {
                return Err(CleanError::Incomplete {
                    expected: self.participants,
                    received: waiting.len(),
                });
            };
            keepers.extend(whitelist.paths);
            waiting.push(whitelist.finished);
        }

        let result = remove_unlisted(&self.dirs, &keepers).await;

        for finished in waiting {
            let _ = finished.send(());
        }
        result
    }
}

async fn remove_unlisted(dirs: &[PathBuf], keepers: &HashSet<PathBuf>) -> Result<usize, CleanError> {
    let mut removed = 0;
    for dir in dirs {
        removed += clean_dir(dir, keepers).await?;
    }
    Ok(removed)
}

async fn clean_dir(dir: &Path, keepers: &HashSet<PathBuf>) -> Result<usize, CleanError> {
    let scan_err = |source| CleanError::Scan {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = tokio::fs::read_dir(dir).await.map_err(scan_err)?;
    let mut removed = 0;

    while let Some(entry) = entries.next_entry().await.map_err(scan_err)? {
        let path = entry.path();
        if keepers.contains(&path) {
            continue;
        }
        let file_type = entry.file_type().await.map_err(scan_err)?;
        if file_type.is_dir() {
            warn!(path = %path.display(), "not removing unexpected directory");
            continue;
        }
        tokio::fs::remove_file(&path)
            .await
            .map_err(|source| CleanError::Remove {
                path: path.clone(),
                source,
            })?;
        debug!(path = %path.display(), "removed");
        removed += 1;
    }
    Ok(removed)
}
