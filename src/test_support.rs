//! In-memory collaborators shared by the unit tests.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

use crate::config::{Config, MediaFormat};
use crate::download::{DownloadError, Fetcher};
use crate::source::{ApiError, ChannelApi, ChannelInfo, MediaItem, SearchPage, SearchQuery};

const PAGE_SIZE: usize = 2;

/// In-memory channel that serves its items in pages.
#[derive(Default)]
pub(crate) struct FakeApi {
    items: Mutex<Vec<MediaItem>>,
    pub(crate) failing: AtomicBool,
    unknown_channels: Mutex<HashSet<String>>,
    queried_after: Mutex<Vec<Option<DateTime<Utc>>>>,
}

impl FakeApi {
    pub(crate) fn publish(&self, item: MediaItem) {
        self.items.lock().unwrap().push(item);
    }

    /// Make channel lookups for `channel` fail.
    pub(crate) fn forget_channel(&self, channel: &str) {
        self.unknown_channels.lock().unwrap().insert(channel.to_string());
    }

    /// Lower bound of every successful search, in order.
    pub(crate) fn lower_bounds(&self) -> Vec<Option<DateTime<Utc>>> {
        self.queried_after.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelApi for FakeApi {
    async fn channel_info(&self, channel_name: &str) -> Result<ChannelInfo, ApiError> {
        if self.unknown_channels.lock().unwrap().contains(channel_name) {
            return Err(ApiError::ChannelNotFound(channel_name.to_string()));
        }
        Ok(channel())
    }

    async fn search_page(
        &self,
        query: &SearchQuery<'_>,
        page_token: Option<&str>,
    ) -> Result<SearchPage, ApiError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ApiError::Status {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        if page_token.is_none() {
            self.queried_after.lock().unwrap().push(query.published_after);
        }
        let matching: Vec<MediaItem> = self
            .items
            .lock()
            .unwrap()
            .iter()
            .filter(|i| query.published_after.map_or(true, |after| i.published > after))
            .cloned()
            .collect();
        let start: usize = page_token.map_or(0, |t| t.parse().unwrap());
        let end = (start + PAGE_SIZE).min(matching.len());
        Ok(SearchPage {
            items: matching[start..end].to_vec(),
            next_page_token: (end < matching.len()).then(|| end.to_string()),
        })
    }

    /// A tiny PNG avatar, as a channel with a low-resolution image has.
    async fn artwork(&self, _url: &str) -> Result<Vec<u8>, ApiError> {
        Ok(crate::artwork::tests::png(2, 2))
    }
}

/// Writes a small file per fetch, unless the id is marked broken.
#[derive(Default)]
pub(crate) struct FakeFetcher {
    broken: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl FakeFetcher {
    pub(crate) fn set_broken(&self, id: &str, broken: bool) {
        let mut set = self.broken.lock().unwrap();
        if broken {
            set.insert(id.to_string());
        } else {
            set.remove(id);
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, id: &str, _format: &MediaFormat, output: &Path) -> Result<(), DownloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.broken.lock().unwrap().contains(id) {
            return Err(DownloadError::Failed {
                status: "exit status: 1".to_string(),
                stderr: "ERROR: video unavailable".to_string(),
            });
        }
        tokio::fs::write(output, id.as_bytes())
            .await
            .map_err(|source| DownloadError::Spawn {
                program: "fake".to_string(),
                source,
            })
    }

    fn describe(&self, id: &str, _format: &MediaFormat, output: &Path) -> String {
        format!("fake {id} {}", output.display())
    }
}

pub(crate) fn channel() -> ChannelInfo {
    ChannelInfo {
        id: "UCabcdefghijklmnopqrstuv".to_string(),
        title: "The Channel".to_string(),
        thumbnail_url: "https://img.example/a.jpg".to_string(),
    }
}

/// Config with one podcast, `pod`.
pub(crate) fn config(title_filter: &str, epoch: &str) -> Config {
    Config::from_json(
        json!({
            "yt_data_api_key": "k",
            "serve_host": "localhost",
            "serve_port": 8080,
            "check_interval_minutes": 30,
            "ytdl_fmt_selector": "bestaudio",
            "ytdl_write_ext": "m4a",
            "podcasts": [{
                "yt_channel": "UCabcdefghijklmnopqrstuv",
                "name": "Pod",
                "short_name": "pod",
                "title_filter": title_filter,
                "epoch": epoch
            }]
        })
        .to_string()
        .as_bytes(),
    )
    .unwrap()
}

/// Config with one podcast per short name; each watches the channel of the
/// same name.
pub(crate) fn multi_config(short_names: &[&str]) -> Config {
    let podcasts: Vec<_> = short_names
        .iter()
        .map(|name| json!({ "yt_channel": name, "name": name, "short_name": name }))
        .collect();
    Config::from_json(
        json!({
            "yt_data_api_key": "k",
            "serve_host": "localhost",
            "serve_port": 8080,
            "check_interval_minutes": 30,
            "ytdl_fmt_selector": "bestaudio",
            "ytdl_write_ext": "m4a",
            "podcasts": podcasts
        })
        .to_string()
        .as_bytes(),
    )
    .unwrap()
}
