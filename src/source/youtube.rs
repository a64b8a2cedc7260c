//! YouTube Data API v3 implementation of [`ChannelApi`].
//!
//! Only the two endpoints the watcher needs are used: `search.list` (new
//! videos on a channel, newest first) and `channels.list` (channel identity
//! and avatar).  Responses are decoded into small private serde structs and
//! then converted by pure functions so that tests can exercise the
//! conversion without the network.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;

use super::{ApiError, ChannelApi, ChannelInfo, MediaItem, SearchPage, SearchQuery};

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";

/// Largest page size the search endpoint allows.
const MAX_RESULTS: &str = "50";

static CHANNEL_ID_FORMAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("^UC[[:alnum:]_-]{22}$").expect("channel id pattern is valid")
});

/// Whether `channel` looks like a canonical channel id rather than a legacy
/// username.
pub fn is_channel_id(channel: &str) -> bool {
    CHANNEL_ID_FORMAT.is_match(channel)
}

/// A YouTube Data API client.
///
/// Cheap to share: wrap it in an [`Arc`](std::sync::Arc) and hand it to
/// every watcher.
pub struct YouTubeApi {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl YouTubeApi {
    /// Create a client that authenticates with `api_key`.
    pub fn new(client: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Point the client at a different API root.
    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let url = format!("{}/{endpoint}", self.base_url);
        let response = self
            .client
            .get(url)
            .query(params)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }

    /// Convert a decoded `search.list` response into a [`SearchPage`].
    ///
    /// Pure function (no I/O).  Fails if the response contains anything other
    /// than videos, or a timestamp that isn't RFC 3339.
    fn parse_search_page(response: SearchResponse) -> Result<SearchPage, ApiError> {
        let items = response
            .items
            .into_iter()
            .map(|item| {
                if item.id.kind != "youtube#video" {
                    return Err(ApiError::UnexpectedKind { kind: item.id.kind });
                }
                let id = item
                    .id
                    .video_id
                    .filter(|id| !id.is_empty())
                    .ok_or(ApiError::MissingVideoId)?;
                let published = DateTime::parse_from_rfc3339(&item.snippet.published_at)
                    .map_err(|source| ApiError::BadTimestamp {
                        value: item.snippet.published_at.clone(),
                        source,
                    })?
                    .with_timezone(&Utc);

                Ok(MediaItem {
                    id,
                    published,
                    title: item.snippet.title,
                    description: item.snippet.description,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SearchPage {
            items,
            next_page_token: response.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    /// Convert a decoded `channels.list` response into a [`ChannelInfo`].
    fn parse_channel(channel: &str, response: ChannelsResponse) -> Result<ChannelInfo, ApiError> {
        let mut items = response.items;
        match items.len() {
            0 => return Err(ApiError::ChannelNotFound(channel.to_string())),
            1 => {}
            n => return Err(ApiError::AmbiguousChannel(n)),
        }
        let item = items.remove(0);
        if item.kind != "youtube#channel" {
            return Err(ApiError::UnexpectedKind { kind: item.kind });
        }
        Ok(ChannelInfo {
            id: item.id,
            title: item.snippet.title,
            thumbnail_url: item.snippet.thumbnails.high.url,
        })
    }
}

#[async_trait]
impl ChannelApi for YouTubeApi {
    async fn channel_info(&self, channel: &str) -> Result<ChannelInfo, ApiError> {
        // The configured channel may be either an id or a username.
        let selector = if is_channel_id(channel) { "id" } else { "forUsername" };
        let response: ChannelsResponse = self
            .get_json(
                "channels",
                &[("part", "id,snippet"), ("maxResults", "1"), (selector, channel)],
            )
            .await?;
        Self::parse_channel(channel, response)
    }

    async fn search_page(
        &self,
        query: &SearchQuery<'_>,
        page_token: Option<&str>,
    ) -> Result<SearchPage, ApiError> {
        let published_after = query
            .published_after
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true));

        let mut params = vec![
            ("part", "id,snippet"),
            ("channelId", query.channel_id),
            ("type", "video"),
            ("order", "date"),
            ("maxResults", MAX_RESULTS),
        ];
        if let Some(after) = published_after.as_deref() {
            params.push(("publishedAfter", after));
        }
        if let Some(term) = query.search_term {
            params.push(("q", term));
        }
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }

        let response: SearchResponse = self.get_json("search", &params).await?;
        Self::parse_search_page(response)
    }

    async fn artwork(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        match content_type.as_str() {
            "image/jpeg" | "image/png" => Ok(response.bytes().await?.to_vec()),
            _ => Err(ApiError::UnsupportedArtwork(content_type)),
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: ResourceId,
    snippet: VideoSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceId {
    kind: String,
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoSnippet {
    published_at: String,
    title: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChannelsResponse {
    #[serde(default)]
    items: Vec<ChannelItem>,
}

#[derive(Debug, Deserialize)]
struct ChannelItem {
    kind: String,
    id: String,
    snippet: ChannelSnippet,
}

#[derive(Debug, Deserialize)]
struct ChannelSnippet {
    title: String,
    thumbnails: Thumbnails,
}

#[derive(Debug, Deserialize)]
struct Thumbnails {
    high: Thumbnail,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use httpmock::prelude::*;
    use serde_json::json;

    const CHANNEL_ID: &str = "UCabcdefghijklmnopqrstuv";

    fn search_json() -> serde_json::Value {
        json!({
            "nextPageToken": "page-2",
            "items": [
                {
                    "id": { "kind": "youtube#video", "videoId": "vid-1" },
                    "snippet": {
                        "publishedAt": "2024-01-02T12:00:00Z",
                        "title": "First Video",
                        "description": "First description"
                    }
                },
                {
                    "id": { "kind": "youtube#video", "videoId": "vid-2" },
                    "snippet": {
                        "publishedAt": "2024-01-01T00:00:00Z",
                        "title": "Second Video"
                    }
                }
            ]
        })
    }

    fn api(server: &MockServer) -> YouTubeApi {
        YouTubeApi::new(reqwest::Client::new(), "secret").with_base_url(server.base_url())
    }

    #[test]
    fn parse_search_page_extracts_items() {
        let response: SearchResponse = serde_json::from_value(search_json()).unwrap();
        let page = YouTubeApi::parse_search_page(response).unwrap();

        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].id, "vid-1");
        assert_eq!(page.items[0].title, "First Video");
        assert_eq!(page.items[0].description, "First description");
        assert_eq!(
            page.items[0].published,
            Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap()
        );
        assert_eq!(page.items[1].description, "", "missing description defaults to empty");
        assert_eq!(page.next_page_token.as_deref(), Some("page-2"));
    }

    #[test]
    fn empty_page_token_means_last_page() {
        let response: SearchResponse =
            serde_json::from_value(json!({ "nextPageToken": "", "items": [] })).unwrap();
        let page = YouTubeApi::parse_search_page(response).unwrap();
        assert!(page.items.is_empty());
        assert!(page.next_page_token.is_none());
    }

    #[test]
    fn non_video_items_are_rejected() {
        let response: SearchResponse = serde_json::from_value(json!({
            "items": [{
                "id": { "kind": "youtube#playlist" },
                "snippet": { "publishedAt": "2024-01-01T00:00:00Z", "title": "P" }
            }]
        }))
        .unwrap();
        let err = YouTubeApi::parse_search_page(response).unwrap_err();
        assert!(matches!(err, ApiError::UnexpectedKind { .. }));
    }

    #[test]
    fn video_without_id_is_rejected() {
        let response: SearchResponse = serde_json::from_value(json!({
            "items": [{
                "id": { "kind": "youtube#video" },
                "snippet": { "publishedAt": "2024-01-01T00:00:00Z", "title": "No id" }
            }]
        }))
        .unwrap();
        let err = YouTubeApi::parse_search_page(response).unwrap_err();
        assert!(matches!(err, ApiError::MissingVideoId));
    }

    #[test]
    fn bad_timestamp_is_rejected() {
        let response: SearchResponse = serde_json::from_value(json!({
            "items": [{
                "id": { "kind": "youtube#video", "videoId": "v" },
                "snippet": { "publishedAt": "yesterday", "title": "T" }
            }]
        }))
        .unwrap();
        let err = YouTubeApi::parse_search_page(response).unwrap_err();
        assert!(matches!(err, ApiError::BadTimestamp { .. }));
    }

    #[test]
    fn recognises_channel_ids() {
        assert!(is_channel_id(CHANNEL_ID));
        assert!(!is_channel_id("somebodysusername"));
        assert!(!is_channel_id("UCtooshort"));
    }

    #[test]
    fn channel_lookup_requires_exactly_one_channel() {
        let none: ChannelsResponse = serde_json::from_value(json!({ "items": [] })).unwrap();
        assert!(matches!(
            YouTubeApi::parse_channel("x", none),
            Err(ApiError::ChannelNotFound(_))
        ));

        let channel = json!({
            "kind": "youtube#channel",
            "id": CHANNEL_ID,
            "snippet": { "title": "T", "thumbnails": { "high": { "url": "u" } } }
        });
        let two: ChannelsResponse =
            serde_json::from_value(json!({ "items": [channel.clone(), channel] })).unwrap();
        assert!(matches!(
            YouTubeApi::parse_channel("x", two),
            Err(ApiError::AmbiguousChannel(2))
        ));
    }

    #[tokio::test]
    async fn search_page_sends_expected_query() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/search")
                    .query_param("channelId", CHANNEL_ID)
                    .query_param("publishedAfter", "2024-01-01T00:00:00Z")
                    .query_param("q", "podcast")
                    .query_param("pageToken", "page-2")
                    .query_param("key", "secret");
                then.status(200).json_body(json!({ "items": [] }));
            })
            .await;

        let query = SearchQuery {
            channel_id: CHANNEL_ID,
            published_after: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            search_term: Some("podcast"),
        };
        let page = api(&server).search_page(&query, Some("page-2")).await.unwrap();

        mock.assert_async().await;
        assert!(page.items.is_empty());
        assert!(page.next_page_token.is_none());
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/search");
                then.status(403).body("quotaExceeded");
            })
            .await;

        let query = SearchQuery {
            channel_id: CHANNEL_ID,
            published_after: None,
            search_term: None,
        };
        let err = api(&server).search_page(&query, None).await.unwrap_err();
        match err {
            ApiError::Status { status, body } => {
                assert_eq!(status, 403);
                assert_eq!(body, "quotaExceeded");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn channel_info_uses_username_lookup() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/channels")
                    .query_param("forUsername", "someuser");
                then.status(200).json_body(json!({
                    "items": [{
                        "kind": "youtube#channel",
                        "id": CHANNEL_ID,
                        "snippet": {
                            "title": "Some Channel",
                            "thumbnails": { "high": { "url": "https://img.example/a.jpg" } }
                        }
                    }]
                }));
            })
            .await;

        let info = api(&server).channel_info("someuser").await.unwrap();

        mock.assert_async().await;
        assert_eq!(info.id, CHANNEL_ID);
        assert_eq!(info.title, "Some Channel");
        assert_eq!(info.thumbnail_url, "https://img.example/a.jpg");
    }

    #[tokio::test]
    async fn artwork_rejects_unexpected_content_type() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/avatar");
                then.status(200).header("content-type", "image/gif").body("GIF89a");
            })
            .await;

        let err = api(&server).artwork(&server.url("/avatar")).await.unwrap_err();
        assert!(matches!(err, ApiError::UnsupportedArtwork(t) if t == "image/gif"));
    }
}
