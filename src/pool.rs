//! Starting one watcher per configured podcast.
//!
//! Watchers share nothing mutable except the [`PublishClock`] inside
//! [`WatcherDeps`] and, when cleaning was requested, the cleanup barrier.
//!
//! [`PublishClock`]: crate::health::PublishClock

use std::path::PathBuf;

use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::clean::CleanupCoordinator;
use crate::config::Podcast;
use crate::watcher::{SourceWatcher, WatcherDeps};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no podcast could be started")]
    NoWatchers,
}

/// Watchers that bootstrapped successfully and are ready to run.
pub struct WatcherPool {
    watchers: Vec<SourceWatcher>,
}

/// A running pool.
pub struct LaunchedPool {
    /// One task per watcher; they never finish on their own.
    pub tasks: JoinSet<()>,
    /// Present when cleaning was requested; must be run for the watchers to
    /// get past their first cycle.
    pub cleanup: Option<CleanupCoordinator>,
}

impl WatcherPool {
    /// Bootstrap a watcher for each podcast.
    ///
    /// A podcast whose bootstrap fails is logged and left out; the others
    /// still start.  Fails only when none could be started.
    pub async fn bootstrap(podcasts: &[Podcast], deps: &WatcherDeps) -> Result<Self, PoolError> {
        let mut watchers = Vec::with_capacity(podcasts.len());
        for podcast in podcasts {
            match SourceWatcher::bootstrap(podcast.clone(), deps.clone()).await {
                Ok(watcher) => watchers.push(watcher),
                Err(err) => error!(podcast = %podcast, "{err}"),
            }
        }
        if watchers.is_empty() {
            return Err(PoolError::NoWatchers);
        }
        Ok(Self { watchers })
    }

    pub fn len(&self) -> usize {
        self.watchers.len()
    }

    /// Spawn every watcher.  With `clean_dirs`, each watcher joins a cleanup
    /// barrier over those directories.
    pub fn launch(self, clean_dirs: Option<Vec<PathBuf>>) -> LaunchedPool {
        let (cleanup, handle) = match clean_dirs {
            Some(dirs) => {
                let (coordinator, handle) = CleanupCoordinator::new(self.watchers.len(), dirs);
                (Some(coordinator), Some(handle))
            }
            None => (None, None),
        };

        let mut tasks = JoinSet::new();
        for watcher in self.watchers {
            let watcher = match &handle {
                Some(handle) => watcher.with_cleanup(handle.clone()),
                None => watcher,
            };
            info!(podcast = %watcher.podcast(), "starting watcher");
            tasks.spawn(watcher.watch());
        }
        LaunchedPool { tasks, cleanup }
    }
}
