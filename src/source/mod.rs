//! Remote channel abstraction layer.
//!
//! This module defines the [`ChannelApi`] trait and the common
//! [`MediaItem`] type.  The concrete implementation for the YouTube Data API
//! lives in [`youtube`].
//!
//! The trait is page-level.  Paging, client-side title filtering and
//! watermark handling belong to the watcher.

mod media_item;
mod youtube;

pub use media_item::MediaItem;
pub use youtube::YouTubeApi;

#[cfg(test)]
pub(crate) use media_item::tests::make_item;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors produced while talking to the remote channel API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Transport-level failure (DNS, TLS, timeouts, body decoding).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status.
    #[error("API returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The response contained something other than what was asked for.
    #[error("unexpected {kind:?} in response items")]
    UnexpectedKind { kind: String },

    /// A video search result carried no video id.
    #[error("video search result without a videoId")]
    MissingVideoId,

    /// No channel matched the configured id or username.
    #[error("not a channel id or username: {0}")]
    ChannelNotFound(String),

    /// A channel lookup returned more than one channel.
    #[error("expected exactly 1 channel in response items, got {0}")]
    AmbiguousChannel(usize),

    /// A timestamp in the response could not be parsed.
    #[error("bad publish timestamp {value:?}: {source}")]
    BadTimestamp {
        value: String,
        source: chrono::ParseError,
    },

    /// Channel artwork was served with a content type we cannot use.
    #[error("channel image: unexpected type: {0}")]
    UnsupportedArtwork(String),
}

/// Identity of a channel, fetched once when a watcher is bootstrapped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    /// Canonical channel id (`UC...`), even when the config used a username.
    pub id: String,
    /// Display name of the channel.
    pub title: String,
    /// URL of the channel's high-resolution avatar image.
    pub thumbnail_url: String,
}

/// Parameters of one search request.
#[derive(Debug, Clone, Copy)]
pub struct SearchQuery<'a> {
    /// Canonical channel id to search within.
    pub channel_id: &'a str,
    /// Only items published strictly after this instant.  `None` means since
    /// the beginning.
    pub published_after: Option<DateTime<Utc>>,
    /// Advisory server-side search term.  The remote matching is fuzzy, so
    /// results are always re-filtered by the caller.
    pub search_term: Option<&'a str>,
}

/// One page of search results.
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub items: Vec<MediaItem>,
    /// Token for the following page; `None` on the last page.
    pub next_page_token: Option<String>,
}

/// Trait for the remote API a watcher polls.
///
/// All calls may fail intermittently; callers decide how to retry.
/// Implementations must be [`Send`] + [`Sync`] because one client is shared
/// by every watcher task.
#[async_trait]
pub trait ChannelApi: Send + Sync {
    /// Look up a channel by id (`UC...`) or legacy username.
    async fn channel_info(&self, channel: &str) -> Result<ChannelInfo, ApiError>;

    /// Fetch a single page of videos matching `query`.
    async fn search_page(
        &self,
        query: &SearchQuery<'_>,
        page_token: Option<&str>,
    ) -> Result<SearchPage, ApiError>;

    /// Download channel artwork.  Only JPEG and PNG are accepted.
    async fn artwork(&self, url: &str) -> Result<Vec<u8>, ApiError>;
}
