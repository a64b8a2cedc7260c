//! Per-channel watch loop.
//!
//! Each configured podcast gets one [`SourceWatcher`], running as its own
//! tokio task until the process exits.  A watcher cycles through four
//! phases:
//!
//! ```text
//!            ┌──────────────────────────────────────────┐
//!            ▼                                          │
//!       ┌──────────┐  due   ┌─────────┐  ok  ┌────────────┐
//!  ───► │ Sleeping │ ─────► │ Polling │ ───► │ Processing │
//!       └──────────┘        └─────────┘      └────────────┘
//!            ▲                   │ err
//!            │              ┌─────────┐
//!            └───────────── │ Backoff │
//!                           └─────────┘
//! ```
//!
//! * The watermark (`last_checked`) only advances after a successful poll,
//!   and is set to the instant captured *before* the query was issued.
//! * Items whose download fails are quarantined and retried every cycle
//!   until they succeed.  Downloads are skipped when the output file already
//!   exists, so retries and restarts never fetch twice.
//! * The feed is rewritten only when something changed, plus once on the
//!   first cycle so that it exists before any item does.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::artwork;
use crate::clean::CleanupHandle;
use crate::config::{Config, DataLayout, MediaFormat, Podcast};
use crate::download::{DownloadError, Fetcher};
use crate::feed::{self, FeedContext, FeedError};
use crate::health::PublishClock;
use crate::source::{ApiError, ChannelApi, ChannelInfo, MediaItem, SearchQuery};

/// How long to leave the remote API alone after a failed poll.
pub const API_RESPITE: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Error)]
pub enum WatchError {
    /// Querying for new items failed; the watermark did not move.
    #[error("getting latest videos failed: {0}")]
    Poll(#[source] ApiError),

    /// One item could not be downloaded; it is quarantined.
    #[error("{id} download failed: {source}")]
    Download { id: String, source: DownloadError },

    /// The feed could not be written; the previous one stays on disk.
    #[error("writing feed failed: {0}")]
    Publish(#[from] FeedError),

    /// The watcher could not establish its channel's identity.
    #[error("bootstrap failed: {0}")]
    Bootstrap(#[from] BootstrapError),
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("looking up channel: {0}")]
    Channel(#[source] ApiError),

    #[error("fetching channel image: {0}")]
    Artwork(#[source] ApiError),

    #[error("custom image path and automatic image path clash (both are {0})")]
    ArtClash(PathBuf),

    #[error("custom image {path}: {source}")]
    CustomImage {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("decoding channel image: {0}")]
    Image(#[source] image::ImageError),

    #[error("converting channel image: {0}")]
    ImageTask(#[source] tokio::task::JoinError),

    #[error("writing channel image: {0}")]
    WriteArt(#[source] std::io::Error),
}

/// Which part of the cycle a watcher is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchPhase {
    Sleeping,
    Polling,
    Processing,
    Backoff,
}

/// An item whose download has failed and not yet succeeded.
#[derive(Debug, Clone)]
pub struct QuarantinedItem {
    pub item: MediaItem,
    /// Failed attempts so far.  Informational; nothing is ever evicted.
    pub failures: u32,
}

/// Mutable state owned by one watcher.
#[derive(Debug)]
pub struct WatchState {
    pub phase: WatchPhase,
    /// Lower bound for the next poll; `None` until the first success.
    pub last_checked: Option<DateTime<Utc>>,
    /// True until the first successful processing pass completes.
    pub initial_check: bool,
    /// Pending respite before the next poll.
    pub backoff: Duration,
    /// Every item discovered so far, in discovery order.  Never shrinks.
    pub known_items: Vec<MediaItem>,
    known_ids: HashSet<String>,
    pub quarantine: BTreeMap<String, QuarantinedItem>,
    /// The last feed write failed; the next cycle writes it regardless.
    pub publish_pending: bool,
}

impl WatchState {
    fn new() -> Self {
        Self {
            phase: WatchPhase::Sleeping,
            last_checked: None,
            initial_check: true,
            backoff: Duration::ZERO,
            known_items: Vec::new(),
            known_ids: HashSet::new(),
            quarantine: BTreeMap::new(),
            publish_pending: false,
        }
    }
}

/// What one successful cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleReport {
    pub new_items: usize,
    pub resolved: usize,
    pub quarantined: usize,
    pub published: bool,
}

/// Collaborators shared by every watcher.
#[derive(Clone)]
pub struct WatcherDeps {
    pub api: Arc<dyn ChannelApi>,
    pub fetcher: Arc<dyn Fetcher>,
    pub config: Arc<Config>,
    pub layout: DataLayout,
    pub clock: Arc<PublishClock>,
}

pub struct SourceWatcher {
    deps: WatcherDeps,
    podcast: Podcast,
    channel: ChannelInfo,
    format: MediaFormat,
    check_interval: Duration,
    cleanup: Option<CleanupHandle>,
    state: WatchState,
}

impl SourceWatcher {
    /// Establish the channel's identity and install its artwork.
    ///
    /// Doubles as an up-front check that the remote API works at all.
    pub async fn bootstrap(podcast: Podcast, deps: WatcherDeps) -> Result<Self, WatchError> {
        let channel = deps
            .api
            .channel_info(&podcast.yt_channel)
            .await
            .map_err(BootstrapError::Channel)?;
        debug!(podcast = %podcast, channel = %channel.id, "resolved channel");

        let watcher = Self::new(podcast, channel, deps);
        watcher.install_artwork().await?;
        Ok(watcher)
    }

    pub(crate) fn new(podcast: Podcast, channel: ChannelInfo, deps: WatcherDeps) -> Self {
        let format = deps.config.format_for(&podcast);
        let check_interval = deps.config.check_interval;
        Self {
            deps,
            podcast,
            channel,
            format,
            check_interval,
            cleanup: None,
            state: WatchState::new(),
        }
    }

    /// Take part in the startup cleanup barrier.
    pub fn with_cleanup(mut self, handle: CleanupHandle) -> Self {
        self.cleanup = Some(handle);
        self
    }

    pub fn podcast(&self) -> &Podcast {
        &self.podcast
    }

    #[cfg(test)]
    pub fn state(&self) -> &WatchState {
        &self.state
    }

    /// Write the podcast's artwork as a JPEG of podcast-directory size,
    /// from the custom image if one is configured, else the channel avatar.
    async fn install_artwork(&self) -> Result<(), BootstrapError> {
        let art_path = self.deps.layout.art_path(&self.podcast.short_name);
        let original = match &self.podcast.custom_image {
            Some(custom) => {
                if *custom == art_path {
                    return Err(BootstrapError::ArtClash(art_path));
                }
                info!(podcast = %self.podcast, "Using custom image from path {}", custom.display());
                tokio::fs::read(custom)
                    .await
                    .map_err(|source| BootstrapError::CustomImage {
                        path: custom.clone(),
                        source,
                    })?
            }
            None => self
                .deps
                .api
                .artwork(&self.channel.thumbnail_url)
                .await
                .map_err(BootstrapError::Artwork)?,
        };

        let jpeg = tokio::task::spawn_blocking(move || artwork::to_podcast_jpeg(&original))
            .await
            .map_err(BootstrapError::ImageTask)?
            .map_err(BootstrapError::Image)?;
        tokio::fs::write(&art_path, jpeg)
            .await
            .map_err(BootstrapError::WriteArt)
    }

    /// Run forever.
    pub async fn watch(mut self) {
        loop {
            self.sleep_until_due().await;
            // Failures are logged by the cycle itself.
            if let Ok(report) = self.run_cycle().await {
                debug!(
                    podcast = %self.podcast,
                    phase = ?self.state.phase,
                    new_items = report.new_items,
                    resolved = report.resolved,
                    quarantined = report.quarantined,
                    published = report.published,
                    "cycle finished"
                );
            }
        }
    }

    /// How long to sleep before the next poll, as of `now`.
    pub fn time_until_due(&self, now: DateTime<Utc>) -> Duration {
        let remaining = match self.state.last_checked {
            Some(checked) => {
                let elapsed = now.signed_duration_since(checked).to_std().unwrap_or_default();
                self.check_interval.saturating_sub(elapsed)
            }
            None => Duration::ZERO,
        };
        remaining.max(self.state.backoff)
    }

    async fn sleep_until_due(&mut self) {
        self.state.phase = WatchPhase::Sleeping;
        let wait = self.time_until_due(Utc::now());
        if !self.state.backoff.is_zero() {
            info!(podcast = %self.podcast, "Giving YouTube API {:?} respite", self.state.backoff);
            self.state.backoff = Duration::ZERO;
        }
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }

    /// One poll → process → publish pass.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, WatchError> {
        self.state.phase = WatchPhase::Polling;
        if self.state.initial_check && self.podcast.epoch.is_some() {
            info!(podcast = %self.podcast, "Epoch is configured as {}", self.podcast.epoch_str);
        }

        match self.poll().await {
            Ok(latest) => Ok(self.process(latest).await),
            Err(err) => {
                self.state.phase = WatchPhase::Backoff;
                self.state.backoff = API_RESPITE;
                let err = WatchError::Poll(err);
                warn!(podcast = %self.podcast, "{err}");

                if self.state.initial_check {
                    // Better that the feed exist with no items than 404.
                    if let Err(err) = self.write_feed().await {
                        error!(podcast = %self.podcast, "{err}");
                    }
                }
                Err(err)
            }
        }
    }

    /// Query for everything published after the watermark (or the epoch, on
    /// the first cycle), following every page.
    async fn poll(&mut self) -> Result<Vec<MediaItem>, ApiError> {
        let published_after = if self.state.initial_check {
            self.podcast.epoch
        } else {
            self.state.last_checked
        };
        let filter = &self.podcast.title_filter;
        let query = SearchQuery {
            channel_id: &self.channel.id,
            published_after,
            search_term: filter.literal(),
        };

        // Captured before the query so nothing published during the
        // round-trip falls between two polls.
        let snapshot = Utc::now();
        let mut latest = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self
                .deps
                .api
                .search_page(&query, page_token.as_deref())
                .await?;
            // Server-side matching is fuzzy; the filter has the last word.
            latest.extend(page.items.into_iter().filter(|item| filter.is_match(&item.title)));
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        self.state.last_checked = Some(snapshot);
        self.state.backoff = Duration::ZERO;
        Ok(latest)
    }

    async fn process(&mut self, latest: Vec<MediaItem>) -> CycleReport {
        self.state.phase = WatchPhase::Processing;
        let first_cycle = self.state.initial_check;

        let known_ids = &mut self.state.known_ids;
        let new_items: Vec<MediaItem> = latest
            .into_iter()
            .filter(|item| known_ids.insert(item.id.clone()))
            .collect();
        self.state.known_items.extend(new_items.iter().cloned());
        if !new_items.is_empty() {
            info!(
                podcast = %self.podcast,
                "{} vids of interest published (makes {} in total)",
                new_items.len(),
                self.state.known_items.len()
            );
        }

        if first_cycle {
            if let Some(handle) = self.cleanup.take() {
                handle.submit(self.whitelist()).await;
            }
        }

        let mut new_problems = false;
        for item in &new_items {
            if let Err(err) = self.download(item, true).await {
                warn!(podcast = %self.podcast, "{err}");
                self.state.quarantine.insert(
                    item.id.clone(),
                    QuarantinedItem {
                        item: item.clone(),
                        failures: 1,
                    },
                );
                new_problems = true;
            }
        }
        if new_problems {
            info!(
                podcast = %self.podcast,
                "There are now {} problem vids",
                self.state.quarantine.len()
            );
        }

        let resolved = self.retry_quarantined().await;

        let changed = !new_items.is_empty() || resolved > 0;
        let published = if changed || first_cycle || self.state.publish_pending {
            match self.write_feed().await {
                Ok(()) => {
                    self.deps.clock.touch();
                    self.state.publish_pending = false;
                    true
                }
                Err(err) => {
                    error!(podcast = %self.podcast, "{err}");
                    self.state.publish_pending = true;
                    false
                }
            }
        } else {
            false
        };

        if first_cycle {
            let feed_path = self.deps.layout.feed_path(&self.podcast.short_name);
            let url = self.deps.config.url_for(self.deps.layout.relative(&feed_path));
            info!(podcast = %self.podcast, "URL for feed is configured as {url}");
        }
        self.state.initial_check = false;

        CycleReport {
            new_items: new_items.len(),
            resolved,
            quarantined: self.state.quarantine.len(),
            published,
        }
    }

    /// Retry every quarantined item once; returns how many succeeded.
    async fn retry_quarantined(&mut self) -> usize {
        let pending: Vec<MediaItem> = self
            .state
            .quarantine
            .values()
            .map(|q| q.item.clone())
            .collect();

        let mut resolved = 0;
        for item in pending {
            match self.download(&item, false).await {
                Ok(()) => {
                    self.state.quarantine.remove(&item.id);
                    resolved += 1;
                    info!(podcast = %self.podcast, "Resolved problem vid {}", item.id);
                }
                Err(err) => {
                    if let Some(entry) = self.state.quarantine.get_mut(&item.id) {
                        entry.failures += 1;
                        debug!(
                            podcast = %self.podcast,
                            failures = entry.failures,
                            "still failing: {err}"
                        );
                    }
                }
            }
        }
        resolved
    }

    /// Make sure `item` is on disk.  A no-op when its file already exists.
    async fn download(&self, item: &MediaItem, first_try: bool) -> Result<(), WatchError> {
        let path = item.episode_path(&self.deps.layout, &self.format.extension);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(());
        }
        if first_try {
            info!(
                podcast = %self.podcast,
                "Download intent: {}",
                self.deps.fetcher.describe(&item.id, &self.format, &path)
            );
        }
        self.deps
            .fetcher
            .fetch(&item.id, &self.format, &path)
            .await
            .map_err(|source| WatchError::Download {
                id: item.id.clone(),
                source,
            })
    }

    async fn write_feed(&self) -> Result<(), WatchError> {
        let ctx = FeedContext {
            config: &self.deps.config,
            layout: &self.deps.layout,
            podcast: &self.podcast,
            channel: &self.channel,
            format: &self.format,
        };
        feed::write_feed(&ctx, &self.state.known_items).await?;
        Ok(())
    }

    /// Every on-disk path this watcher currently needs.
    fn whitelist(&self) -> HashSet<PathBuf> {
        let layout = &self.deps.layout;
        let mut paths: HashSet<PathBuf> = self
            .state
            .known_items
            .iter()
            .map(|item| item.episode_path(layout, &self.format.extension))
            .collect();
        paths.insert(layout.art_path(&self.podcast.short_name));
        paths.insert(layout.feed_path(&self.podcast.short_name));
        paths
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
