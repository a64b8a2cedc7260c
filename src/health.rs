//! Health reporting for an automated monitoring system.
//!
//! Three concerns are tracked; each is either `OK` or `CONCERN`:
//!
//! | name          | concern when                                     |
//! |---------------|--------------------------------------------------|
//! | `disk_low`    | less than 1 GiB free on the data filesystem      |
//! | `ytdl_old`    | the downloader's release is older than 60 days   |
//! | `feeds_stale` | no feed has been written for 10 days             |
//!
//! The downloader probe forks a process that takes seconds to run, so its
//! answer is memoised by [`VersionCache`].  The "last feed written" instant
//! is a [`PublishClock`] shared with every watcher.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

/// How long a probed version stays fresh.
pub const VERSION_TTL: Duration = Duration::from_secs(5 * 60);

const DISK_LOW_BYTES: u64 = 1024 * 1024 * 1024;
const DOWNLOADER_OLD_DAYS: i64 = 60;
const FEEDS_STALE_DAYS: i64 = 10;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("running {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} --version exited {status}")]
    Failed { program: String, status: String },
}

#[derive(Debug, Error)]
pub enum HealthError {
    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error("unrecognised downloader version {0:?}")]
    VersionFormat(String),

    #[error("checking free space: {0}")]
    Statvfs(#[from] nix::Error),
}

// ---------------------------------------------------------------------------
// Publish clock
// ---------------------------------------------------------------------------

/// When any feed was last written successfully.
///
/// Stored as Unix milliseconds in an atomic so watchers can update it
/// without locking.  Starts at the Unix epoch, meaning "never".
#[derive(Debug, Default)]
pub struct PublishClock {
    millis: AtomicI64,
}

impl PublishClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::Relaxed)).unwrap_or_default()
    }

    pub fn set(&self, when: DateTime<Utc>) {
        self.millis.store(when.timestamp_millis(), Ordering::Relaxed);
    }

    pub fn touch(&self) {
        self.set(Utc::now());
    }
}

// ---------------------------------------------------------------------------
// Version cache
// ---------------------------------------------------------------------------

/// An expensive way of learning the downloader's version.
#[async_trait]
pub trait VersionProbe: Send + Sync {
    async fn probe(&self) -> Result<String, ProbeError>;
}

/// Runs `<program> --version` and trims the output.
#[derive(Debug, Clone)]
pub struct CommandVersionProbe {
    program: String,
}

impl CommandVersionProbe {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl VersionProbe for CommandVersionProbe {
    async fn probe(&self) -> Result<String, ProbeError> {
        let output = Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| ProbeError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(ProbeError::Failed {
                program: self.program.clone(),
                status: output.status.to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

struct CacheEntry {
    value: String,
    captured_at: Instant,
}

/// TTL-memoised [`VersionProbe`].
///
/// The lock is held across the probe itself, so concurrent callers during a
/// refresh wait for it instead of probing again.  A failed probe leaves the
/// previous entry (and its age) untouched, so the next call retries.
pub struct VersionCache {
    probe: Arc<dyn VersionProbe>,
    ttl: Duration,
    entry: Mutex<Option<CacheEntry>>,
}

impl VersionCache {
    pub fn new(probe: Arc<dyn VersionProbe>, ttl: Duration) -> Self {
        Self {
            probe,
            ttl,
            entry: Mutex::new(None),
        }
    }

    pub async fn get_version(&self) -> Result<String, ProbeError> {
        let mut entry = self.entry.lock().await;
        if let Some(cached) = entry.as_ref() {
            if cached.captured_at.elapsed() < self.ttl {
                return Ok(cached.value.clone());
            }
        }

        let value = self.probe.probe().await?;
        *entry = Some(CacheEntry {
            value: value.clone(),
            captured_at: Instant::now(),
        });
        Ok(value)
    }
}

/// Release date encoded in a `YYYY.MM.DD[.extra]` version string.
pub fn parse_release_date(version: &str) -> Option<NaiveDate> {
    let mut parts = version.trim().split('.').map(str::parse::<u32>);
    let year = parts.next()?.ok()?;
    let month = parts.next()?.ok()?;
    let day = parts.next()?.ok()?;
    NaiveDate::from_ymd_opt(i32::try_from(year).ok()?, month, day)
}

// ---------------------------------------------------------------------------
// Concerns
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concern {
    DiskLow,
    DownloaderOld,
    FeedsStale,
}

impl Concern {
    pub const ALL: [Concern; 3] = [Concern::DiskLow, Concern::DownloaderOld, Concern::FeedsStale];

    pub fn name(self) -> &'static str {
        match self {
            Concern::DiskLow => "disk_low",
            Concern::DownloaderOld => "ytdl_old",
            Concern::FeedsStale => "feeds_stale",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Concern,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Ok => "OK",
            Status::Concern => "CONCERN",
        })
    }
}

/// Evaluates health concerns.
pub struct Health {
    data_root: PathBuf,
    versions: Arc<VersionCache>,
    clock: Arc<PublishClock>,
}

impl Health {
    pub fn new(data_root: impl Into<PathBuf>, versions: Arc<VersionCache>, clock: Arc<PublishClock>) -> Self {
        Self {
            data_root: data_root.into(),
            versions,
            clock,
        }
    }

    /// `true` means cause for concern.
    pub async fn check(&self, concern: Concern) -> Result<bool, HealthError> {
        match concern {
            Concern::DiskLow => {
                let stat = nix::sys::statvfs::statvfs(&self.data_root)?;
                #[allow(clippy::unnecessary_cast)]
                let available = stat.blocks_available() as u64 * stat.fragment_size() as u64;
                Ok(available < DISK_LOW_BYTES)
            }
            Concern::DownloaderOld => {
                let version = self.versions.get_version().await?;
                let released = parse_release_date(&version)
                    .ok_or_else(|| HealthError::VersionFormat(version.clone()))?;
                let age = Utc::now().date_naive().signed_duration_since(released);
                Ok(age > chrono::Duration::days(DOWNLOADER_OLD_DAYS))
            }
            Concern::FeedsStale => {
                let since = Utc::now().signed_duration_since(self.clock.get());
                Ok(since > chrono::Duration::days(FEEDS_STALE_DAYS))
            }
        }
    }

    /// Errors count as cause for concern; they are logged, not returned.
    pub async fn status(&self, concern: Concern) -> Status {
        match self.check(concern).await {
            Ok(false) => Status::Ok,
            Ok(true) => Status::Concern,
            Err(err) => {
                warn!(concern = concern.name(), "health check failed: {err}");
                Status::Concern
            }
        }
    }

    /// One `name\tSTATUS` line per concern.
    pub async fn report(&self) -> String {
        let mut out = String::new();
        for concern in Concern::ALL {
            let status = self.status(concern).await;
            out.push_str(&format!("{}\t{status}\n", concern.name()));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Counts invocations; fails while `fail` is set.  Each probe takes
    /// `delay` to finish.
    struct CountingProbe {
        calls: AtomicUsize,
        fail: std::sync::atomic::AtomicBool,
        delay: Duration,
    }

    impl CountingProbe {
        fn new() -> Arc<Self> {
            Self::slow(Duration::ZERO)
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: std::sync::atomic::AtomicBool::new(false),
                delay,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl VersionProbe for CountingProbe {
        async fn probe(&self) -> Result<String, ProbeError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(ProbeError::Failed {
                    program: "probe".to_string(),
                    status: "exit status: 1".to_string(),
                });
            }
            Ok(format!("2024.01.0{n}"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn probes_at_most_once_within_ttl() {
        let probe = CountingProbe::new();
        let cache = VersionCache::new(probe.clone(), VERSION_TTL);

        assert_eq!(cache.get_version().await.unwrap(), "2024.01.01");
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(cache.get_version().await.unwrap(), "2024.01.01");
        assert_eq!(probe.calls(), 1);

        tokio::time::advance(VERSION_TTL).await;
        assert_eq!(cache.get_version().await.unwrap(), "2024.01.02");
        assert_eq!(probe.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_keeps_previous_entry() {
        let probe = CountingProbe::new();
        let cache = VersionCache::new(probe.clone(), VERSION_TTL);
        cache.get_version().await.unwrap();

        tokio::time::advance(VERSION_TTL).await;
        probe.fail.store(true, Ordering::SeqCst);
        assert!(cache.get_version().await.is_err());

        // The stale entry survives, so once the probe recovers the next call
        // probes again rather than serving a poisoned value.
        probe.fail.store(false, Ordering::SeqCst);
        assert_eq!(cache.get_version().await.unwrap(), "2024.01.03");
        assert_eq!(probe.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_probe() {
        let probe = CountingProbe::slow(Duration::from_secs(3));
        let cache = Arc::new(VersionCache::new(probe.clone(), VERSION_TTL));

        let first = tokio::spawn({
            let cache = cache.clone();
            async move { cache.get_version().await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(probe.calls(), 1, "first refresh in flight");

        let second = tokio::spawn({
            let cache = cache.clone();
            async move { cache.get_version().await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!second.is_finished(), "second caller waits for the refresh");
        assert_eq!(probe.calls(), 1, "second caller did not probe on its own");

        let (a, b) = (first.await.unwrap().unwrap(), second.await.unwrap().unwrap());
        assert_eq!(a, "2024.01.01");
        assert_eq!(b, a);
        assert_eq!(probe.calls(), 1);
    }

    #[test]
    fn parses_release_dates() {
        assert_eq!(parse_release_date("2024.08.06"), NaiveDate::from_ymd_opt(2024, 8, 6));
        assert_eq!(parse_release_date("2024.8.6.232920\n"), NaiveDate::from_ymd_opt(2024, 8, 6));
        assert_eq!(parse_release_date("v1.2"), None);
    }

    #[test]
    fn concern_names_round_trip() {
        for concern in Concern::ALL {
            assert_eq!(Concern::from_name(concern.name()), Some(concern));
        }
        assert_eq!(Concern::from_name("nope"), None);
    }

    #[tokio::test]
    async fn feeds_stale_follows_publish_clock() {
        let clock = Arc::new(PublishClock::new());
        let cache = Arc::new(VersionCache::new(CountingProbe::new(), VERSION_TTL));
        let health = Health::new(".", cache, clock.clone());

        assert_eq!(health.status(Concern::FeedsStale).await, Status::Concern, "never published");
        clock.touch();
        assert_eq!(health.status(Concern::FeedsStale).await, Status::Ok);
    }

    #[tokio::test]
    async fn old_downloader_is_a_concern() {
        // The counting probe reports a January 2024 release.
        let cache = Arc::new(VersionCache::new(CountingProbe::new(), VERSION_TTL));
        let health = Health::new(".", cache, Arc::new(PublishClock::new()));
        assert_eq!(health.status(Concern::DownloaderOld).await, Status::Concern);
    }

    #[tokio::test]
    async fn report_lists_every_concern() {
        let cache = Arc::new(VersionCache::new(CountingProbe::new(), VERSION_TTL));
        let clock = Arc::new(PublishClock::new());
        clock.touch();
        let health = Health::new(".", cache, clock);

        let report = health.report().await;
        let lines: Vec<_> = report.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines.contains(&"feeds_stale\tOK"));
        assert!(lines.contains(&"ytdl_old\tCONCERN"));
    }
}
