//! podwatch: a daemon that turns YouTube channels into podcast feeds.
//!
//! ## Architecture overview
//!
//! ```text
//!                 ┌───────────────┐  search/channels  ┌──────────────┐
//!            ┌──► │ SourceWatcher │ ────────────────► │  source/     │
//!            │    │   (task 1)    │ ──┐               │ (YouTube API)│
//! ┌──────┐   │    └───────────────┘   │ fetch         └──────────────┘
//! │ pool │ ──┤          ...           ├─────────────► download (yt-dlp)
//! └──────┘   │    ┌───────────────┐   │ write_feed
//!            └──► │ SourceWatcher │ ──┴─────────────► feed ──► data/meta/*.xml
//!                 │   (task N)    │
//!                 └───────┬───────┘
//!                         │ whitelist (first cycle, --dataclean only)
//!                         ▼
//!                 ┌───────────────┐
//!                 │     clean     │  deletes unlisted files, then releases
//!                 └───────────────┘
//!
//! ┌──────────┐  /health  ┌──────────┐  get_version()  ┌──────────────┐
//! │  server  │ ────────► │  health  │ ──────────────► │ VersionCache │
//! │  (axum)  │           └──────────┘                 └──────────────┘
//! └──────────┘ ──► data/ep, data/meta (static files, hit counted)
//! ```
//!
//! * **`source/`**: the `ChannelApi` trait and the YouTube Data API client.
//! * **`watcher`**: per-channel poll, download, publish loop.
//! * **`pool`**: starts one watcher per configured podcast.
//! * **`clean`**: the startup cleanup barrier.
//! * **`download`**: runs the external downloader.
//! * **`artwork`**: turns channel images into podcast-sized JPEGs.
//! * **`feed`**: renders and atomically writes RSS feeds.
//! * **`health`**: health concerns, publish clock, cached version probe.
//! * **`server`**: HTTP file serving and health endpoints.
//! * **`config`**, **`cli`**, **`logging`**: the usual.
//! * **`main`**: wires everything together.

mod artwork;
mod clean;
mod cli;
mod config;
mod download;
mod feed;
mod health;
mod logging;
mod pool;
mod server;
mod source;
mod watcher;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use cli::Args;
use config::{Config, DataLayout};
use download::CommandFetcher;
use health::{CommandVersionProbe, Health, PublishClock, VersionCache, VERSION_TTL};
use pool::WatcherPool;
use server::HitCounter;
use source::YouTubeApi;
use watcher::WatcherDeps;

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// `SIGUSR1` marks the feeds as freshly written, silencing `feeds_stale`.
#[cfg(unix)]
fn spawn_tickle_handler(clock: Arc<PublishClock>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut usr1 = signal(SignalKind::user_defined1()).context("installing SIGUSR1 handler")?;
    tokio::spawn(async move {
        while usr1.recv().await.is_some() {
            info!("Received SIGUSR1; resetting feeds_stale clock");
            clock.touch();
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn spawn_tickle_handler(_clock: Arc<PublishClock>) -> Result<()> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.log_format)?;

    if let Err(err) = run(args).await {
        error!("{err:#}");
        return Err(err);
    }
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    // -- config and data directory -------------------------------------------
    let config = Arc::new(Config::load(&args.config)?);
    let layout = DataLayout::new(&args.data);
    layout
        .create()
        .await
        .with_context(|| format!("creating data directory {}", args.data.display()))?;

    // -- downloader ----------------------------------------------------------
    let probe = Arc::new(CommandVersionProbe::new(config.downloader_name.clone()));
    let versions = Arc::new(VersionCache::new(probe, VERSION_TTL));
    let version = versions
        .get_version()
        .await
        .context("checking downloader version")?;
    info!("Using {} version {version}", config.downloader_name);

    // -- watchers ------------------------------------------------------------
    let clock = Arc::new(PublishClock::new());
    let deps = WatcherDeps {
        api: Arc::new(YouTubeApi::new(reqwest::Client::new(), config.api_key.clone())),
        fetcher: Arc::new(CommandFetcher::new(config.downloader_name.clone())),
        config: config.clone(),
        layout: layout.clone(),
        clock: clock.clone(),
    };
    let pool = WatcherPool::bootstrap(&config.podcasts, &deps).await?;
    info!("Watching {} of {} podcasts", pool.len(), config.podcasts.len());

    let clean_dirs = args
        .dataclean
        .then(|| vec![layout.episodes_dir(), layout.metadata_dir()]);
    let mut launched = pool.launch(clean_dirs);

    // Nothing is served until cleaning is over.
    if let Some(coordinator) = launched.cleanup.take() {
        let removed = coordinator.run().await?;
        info!("Clean removed {removed} files");
    }

    // -- health and HTTP -----------------------------------------------------
    spawn_tickle_handler(clock.clone())?;
    let health = Arc::new(Health::new(layout.root(), versions, clock));
    let hits = Arc::new(HitCounter::default());
    hits.clone().spawn_logger(server::HIT_LOG_PERIOD);

    let router = server::router(layout.root(), config.serve_directory_listings, health, hits);
    let listener = server::bind(&config.serve_host, config.serve_port)
        .await
        .context("binding HTTP listener")?;

    tokio::select! {
        served = server::serve(listener, router) => served.context("HTTP server stopped")?,
        Some(joined) = launched.tasks.join_next() => {
            joined.context("watcher task failed")?;
        }
    }
    Ok(())
}
