//! Podcast feed construction.
//!
//! Builds an RSS 2.0 channel (with iTunes extensions) from a podcast's known
//! items using the [`rss`] crate, and persists it by writing a sibling temp
//! file and renaming it over the feed path, so a failed write leaves the
//! previous feed intact.

use std::fmt::Write as _;
use std::path::Path;

use rss::extension::itunes::{ITunesChannelExtensionBuilder, ITunesItemExtensionBuilder};
use rss::{Channel, ChannelBuilder, EnclosureBuilder, GuidBuilder, Item, ItemBuilder};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{Config, DataLayout, MediaFormat, Podcast};
use crate::source::{ChannelInfo, MediaItem};

const GENERATOR: &str = concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("serialising feed: {0}")]
    Rss(#[from] rss::Error),

    #[error("writing feed: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything about a podcast the feed needs besides its items.
#[derive(Debug, Clone, Copy)]
pub struct FeedContext<'a> {
    pub config: &'a Config,
    pub layout: &'a DataLayout,
    pub podcast: &'a Podcast,
    pub channel: &'a ChannelInfo,
    pub format: &'a MediaFormat,
}

impl FeedContext<'_> {
    fn url_for(&self, path: &Path) -> String {
        self.config.url_for(self.layout.relative(path))
    }

    /// The blurb podcast clients show for the feed.  Falls back to one
    /// derived from the rest of the config when none was provided.
    pub fn description(&self) -> String {
        if !self.podcast.description.is_empty() {
            return self.podcast.description.clone();
        }
        let mut desc = format!(
            "Generated based on the videos of YouTube channel {}",
            self.channel.title
        );
        if self.podcast.epoch.is_some() {
            let _ = write!(desc, " published from {} onwards", self.podcast.epoch_str);
        }
        let filter = self.podcast.title_filter.as_str();
        if !filter.is_empty() {
            let _ = write!(desc, " with titles matching \"{filter}\"");
        }
        desc
    }

    fn enclosure_type(&self) -> String {
        let kind = if self.podcast.vidya { "video" } else { "audio" };
        format!("{kind}/{}", self.format.extension)
    }
}

/// Build the channel document.  Pure: `episodes` pairs each item with the
/// size in bytes of its downloaded file.
pub fn build_channel(ctx: &FeedContext<'_>, mut episodes: Vec<(MediaItem, u64)>) -> Channel {
    // Newest to oldest.
    episodes.sort_by(|a, b| a.0.cmp(&b.0));

    let items: Vec<Item> = episodes
        .into_iter()
        .map(|(item, size)| build_item(ctx, &item, size))
        .collect();

    let description = ctx.description();
    let itunes = ITunesChannelExtensionBuilder::default()
        .author(Some(ctx.channel.title.clone()))
        .summary(Some(description.clone()))
        .image(Some(ctx.url_for(&ctx.layout.art_path(&ctx.podcast.short_name))))
        .build();

    ChannelBuilder::default()
        .title(ctx.podcast.name.clone())
        .link(format!("https://www.youtube.com/channel/{}", ctx.channel.id))
        .description(description)
        .language(Some("en".to_string()))
        .copyright(Some(ctx.channel.title.clone()))
        .generator(Some(GENERATOR.to_string()))
        .itunes_ext(Some(itunes))
        .items(items)
        .build()
}

fn build_item(ctx: &FeedContext<'_>, item: &MediaItem, size: u64) -> Item {
    let url = ctx.url_for(&item.episode_path(ctx.layout, &ctx.format.extension));
    let summary = format!(
        r#"{} // <a href="{}">Link to original YouTube video</a>"#,
        item.description,
        item.watch_url()
    );

    ItemBuilder::default()
        .title(Some(item.title.clone()))
        .guid(Some(GuidBuilder::default().value(url.clone()).permalink(false).build()))
        .pub_date(Some(item.published.to_rfc2822()))
        .enclosure(Some(
            EnclosureBuilder::default()
                .url(url)
                .length(size.to_string())
                .mime_type(ctx.enclosure_type())
                .build(),
        ))
        .itunes_ext(Some(ITunesItemExtensionBuilder::default().summary(Some(summary)).build()))
        .build()
}

/// Build the feed for `items` and write it to the podcast's feed path.
///
/// Items whose media is not on disk yet (e.g. quarantined) are left out.
pub async fn write_feed(ctx: &FeedContext<'_>, items: &[MediaItem]) -> Result<(), FeedError> {
    let mut episodes = Vec::with_capacity(items.len());
    for item in items {
        let path = item.episode_path(ctx.layout, &ctx.format.extension);
        match tokio::fs::metadata(&path).await {
            Ok(meta) => episodes.push((item.clone(), meta.len())),
            Err(err) => warn!(podcast = %ctx.podcast, path = %path.display(), "skipping episode: {err}"),
        }
    }

    let channel = build_channel(ctx, episodes);
    let mut xml = channel.write_to(Vec::new())?;
    xml.push(b'\n');

    let feed_path = ctx.layout.feed_path(&ctx.podcast.short_name);
    let tmp_path = feed_path.with_extension("xml.tmp");
    info!(podcast = %ctx.podcast, "Writing out feed");
    tokio::fs::write(&tmp_path, &xml).await?;
    tokio::fs::rename(&tmp_path, &feed_path).await?;
    Ok(())
}
