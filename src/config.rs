//! Configuration file loading and validation.
//!
//! The config is a JSON document.  It is decoded into [`RawConfig`] with
//! serde and then validated into [`Config`], where every podcast has its
//! epoch parsed and its title filter compiled.  Nothing downstream ever sees
//! an unvalidated value.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

/// Subdirectory of the data root holding downloaded episodes.
pub const EPISODES_SUBDIR: &str = "ep";
/// Subdirectory of the data root holding feeds and artwork.
pub const METADATA_SUBDIR: &str = "meta";

const DEFAULT_DOWNLOADER: &str = "yt-dlp";
const EPOCH_FORMAT: &str = "%Y-%m-%d";

/// Format selector and extension used for video podcasts (720p, else 360p).
const VIDEO_FMT_SELECTOR: &str = "22/18";
const VIDEO_EXTENSION: &str = "mp4";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("decoding: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("missing {0}")]
    Missing(&'static str),

    #[error("check interval must be >= 1 minute")]
    CheckInterval,

    #[error("no podcasts are defined")]
    NoPodcasts,

    #[error("podcast with empty short_name")]
    EmptyShortName,

    #[error("multiple podcasts using short_name {0:?}")]
    DuplicateShortName(String),

    #[error("{short_name}: bad epoch {value:?}: {source}")]
    Epoch {
        short_name: String,
        value: String,
        source: chrono::ParseError,
    },

    #[error("{short_name}: bad title filter: {source}")]
    TitleFilter {
        short_name: String,
        source: regex::Error,
    },
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    yt_data_api_key: String,
    #[serde(default)]
    podcasts: Vec<RawPodcast>,
    #[serde(default)]
    serve_host: String,
    #[serde(default)]
    serve_port: u16,
    #[serde(default)]
    check_interval_minutes: u64,
    #[serde(default)]
    ytdl_fmt_selector: String,
    #[serde(default)]
    ytdl_write_ext: String,
    downloader_name: Option<String>,
    #[serde(default)]
    serve_directory_listings: bool,
}

#[derive(Debug, Deserialize)]
struct RawPodcast {
    yt_channel: String,
    name: String,
    short_name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    title_filter: String,
    #[serde(default)]
    epoch: String,
    #[serde(default)]
    vidya: bool,
    #[serde(default)]
    custom_image: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Validated config
// ---------------------------------------------------------------------------

/// The validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub podcasts: Vec<Podcast>,
    pub serve_host: String,
    pub serve_port: u16,
    pub check_interval: Duration,
    /// Format selector and extension for audio podcasts.
    pub audio_format: MediaFormat,
    /// Name of the `youtube-dl` compatible command on `PATH`.
    pub downloader_name: String,
    /// Answer directory requests with an index of their entries.
    pub serve_directory_listings: bool,
}

impl Config {
    /// Read and validate the config file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let buf = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&buf)
    }

    /// Decode and validate a config document.
    pub fn from_json(buf: &[u8]) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_slice(buf)?;

        if raw.yt_data_api_key.is_empty() {
            return Err(ConfigError::Missing("YouTube Data API key"));
        }
        if raw.check_interval_minutes < 1 {
            return Err(ConfigError::CheckInterval);
        }
        if raw.ytdl_fmt_selector.is_empty() {
            return Err(ConfigError::Missing("downloader format selector"));
        }
        // Normalise e.g. ".m4a" and "m4a".
        let extension = raw.ytdl_write_ext.trim_start_matches('.').to_string();
        if extension.is_empty() {
            return Err(ConfigError::Missing("downloader file type extension"));
        }
        if raw.serve_host.is_empty() {
            return Err(ConfigError::Missing("host to webserve on"));
        }
        if raw.serve_port == 0 {
            return Err(ConfigError::Missing("fixed port to webserve on"));
        }
        if raw.podcasts.is_empty() {
            return Err(ConfigError::NoPodcasts);
        }

        let mut short_names = HashSet::new();
        let podcasts = raw
            .podcasts
            .into_iter()
            .map(|p| {
                if p.short_name.is_empty() {
                    return Err(ConfigError::EmptyShortName);
                }
                if !short_names.insert(p.short_name.clone()) {
                    return Err(ConfigError::DuplicateShortName(p.short_name));
                }
                Podcast::validate(p)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            api_key: raw.yt_data_api_key,
            podcasts,
            serve_host: raw.serve_host,
            serve_port: raw.serve_port,
            check_interval: Duration::from_secs(raw.check_interval_minutes * 60),
            audio_format: MediaFormat {
                selector: raw.ytdl_fmt_selector,
                extension,
            },
            downloader_name: raw
                .downloader_name
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| DEFAULT_DOWNLOADER.to_string()),
            serve_directory_listings: raw.serve_directory_listings,
        })
    }

    /// Public URL under which the file at `relative` (relative to the data
    /// root) is served.
    pub fn url_for(&self, relative: &Path) -> String {
        let path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        format!("http://{}:{}/{path}", self.serve_host, self.serve_port)
    }

    /// The media format a podcast downloads in.
    pub fn format_for(&self, podcast: &Podcast) -> MediaFormat {
        if podcast.vidya {
            MediaFormat {
                selector: VIDEO_FMT_SELECTOR.to_string(),
                extension: VIDEO_EXTENSION.to_string(),
            }
        } else {
            self.audio_format.clone()
        }
    }
}

/// Downloader format selector plus the extension of the file it writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFormat {
    pub selector: String,
    pub extension: String,
}

/// One configured podcast (a watched channel).
#[derive(Debug, Clone)]
pub struct Podcast {
    /// Channel id or legacy username, as configured.
    pub yt_channel: String,
    pub name: String,
    /// Primary key; names the feed and artwork files.
    pub short_name: String,
    pub description: String,
    pub title_filter: TitleFilter,
    /// Lower bound for the initial query, if configured.
    pub epoch: Option<DateTime<Utc>>,
    /// The epoch as written in the config, for display.
    pub epoch_str: String,
    /// Publish video rather than audio.
    pub vidya: bool,
    pub custom_image: Option<PathBuf>,
}

impl Podcast {
    fn validate(raw: RawPodcast) -> Result<Self, ConfigError> {
        let epoch = if raw.epoch.is_empty() {
            None
        } else {
            let date = NaiveDate::parse_from_str(&raw.epoch, EPOCH_FORMAT).map_err(|source| {
                ConfigError::Epoch {
                    short_name: raw.short_name.clone(),
                    value: raw.epoch.clone(),
                    source,
                }
            })?;
            date.and_hms_opt(0, 0, 0).map(|t| t.and_utc())
        };

        let title_filter =
            TitleFilter::new(&raw.title_filter).map_err(|source| ConfigError::TitleFilter {
                short_name: raw.short_name.clone(),
                source,
            })?;

        Ok(Self {
            yt_channel: raw.yt_channel,
            name: raw.name,
            short_name: raw.short_name,
            description: raw.description,
            title_filter,
            epoch,
            epoch_str: raw.epoch,
            vidya: raw.vidya,
            custom_image: raw.custom_image,
        })
    }
}

impl fmt::Display for Podcast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_name)
    }
}

/// Case-insensitive title filter.
///
/// An empty filter matches everything.  A filter with no regex
/// metacharacters is a *plain literal* and may also be sent to the remote
/// API as a search term.
#[derive(Debug, Clone)]
pub struct TitleFilter {
    source: String,
    pattern: Regex,
}

impl TitleFilter {
    pub fn new(filter: &str) -> Result<Self, regex::Error> {
        let pattern = Regex::new(&format!("(?i:{filter})"))?;
        Ok(Self {
            source: filter.to_string(),
            pattern,
        })
    }

    pub fn is_match(&self, title: &str) -> bool {
        self.pattern.is_match(title)
    }

    /// The filter text as configured.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// The filter text if it is a non-empty plain literal.
    pub fn literal(&self) -> Option<&str> {
        let plain = !self.source.is_empty() && regex::escape(&self.source) == self.source;
        plain.then_some(self.source.as_str())
    }
}

/// Where things live under the data root.
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn episodes_dir(&self) -> PathBuf {
        self.root.join(EPISODES_SUBDIR)
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.root.join(METADATA_SUBDIR)
    }

    pub fn episode_path(&self, id: &str, extension: &str) -> PathBuf {
        self.episodes_dir().join(format!("{id}.{extension}"))
    }

    pub fn feed_path(&self, short_name: &str) -> PathBuf {
        self.metadata_dir().join(format!("{short_name}.xml"))
    }

    pub fn art_path(&self, short_name: &str) -> PathBuf {
        self.metadata_dir().join(format!("{short_name}.jpg"))
    }

    /// `path` relative to the data root, which is also its URL path.
    pub fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.root).unwrap_or(path)
    }

    /// Create the data root and its subdirectories if needed.
    pub async fn create(&self) -> std::io::Result<()> {
        for dir in [self.episodes_dir(), self.metadata_dir()] {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
