//! The item record shared by the watcher, the feed builder and the cleanup
//! pass.
//!
//! `MediaItem` is one video discovered on a channel.  The YouTube client
//! converts API search results into `MediaItem`s so that the rest of the
//! application stays agnostic of the remote API's shape.

use std::cmp::Ordering;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::config::DataLayout;

/// A single discovered video, normalised from the remote API.
///
/// Immutable once discovered.  Two items are the same item iff their `id`s
/// are equal; the remaining fields are carried along for the feed.
///
/// ## Sorting
///
/// `MediaItem` implements [`Ord`] for **reverse-chronological** ordering:
/// newer items sort before older ones, which is the order episodes appear in
/// the published feed.  Items published at the same instant are ordered by
/// id, so only an item compares equal to itself.
#[derive(Debug, Clone)]
pub struct MediaItem {
    /// Remote identifier (the YouTube video id).  Also names the file on disk.
    pub id: String,

    /// When the remote source says the item was published.
    pub published: DateTime<Utc>,

    /// Human-readable title; the title filter is matched against this.
    pub title: String,

    /// Longer description text, used for the episode summary.
    pub description: String,
}

impl MediaItem {
    /// Where the downloaded media for this item lives, given the file
    /// extension the downloader writes.
    pub fn episode_path(&self, layout: &DataLayout, extension: &str) -> PathBuf {
        layout.episode_path(&self.id, extension)
    }

    /// Link to the item on the remote site.
    pub fn watch_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.id)
    }
}

// ---------------------------------------------------------------------------
// Ordering: reverse chronological (newest first)
// ---------------------------------------------------------------------------

impl PartialEq for MediaItem {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MediaItem {}

impl Ord for MediaItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // `other` first so that a newer `published` sorts earlier.
        other
            .published
            .cmp(&self.published)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for MediaItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    /// Shorthand constructor for tests.
    pub fn make_item(id: &str, title: &str, published: DateTime<Utc>) -> MediaItem {
        MediaItem {
            id: id.to_string(),
            published,
            title: title.to_string(),
            description: format!("about {title}"),
        }
    }

    #[test]
    fn sort_reverse_chronological() {
        let old = make_item("1", "Old", Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let mid = make_item("2", "Mid", Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap());
        let new = make_item("3", "New", Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());

        let mut items = vec![old, new, mid];
        items.sort();

        assert_eq!(items[0].id, "3", "newest first");
        assert_eq!(items[1].id, "2");
        assert_eq!(items[2].id, "1", "oldest last");
    }

    #[test]
    fn same_date_is_ordered_by_id() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let a = make_item("a", "A", ts);
        let b = make_item("b", "B", ts);
        assert_eq!(a.cmp(&b), Ordering::Less);
        assert_ne!(a, b);
    }

    #[test]
    fn identity_is_the_id() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let original = make_item("same", "Original title", ts);
        let retitled = make_item("same", "Edited title", ts);
        assert_eq!(original, retitled);
        assert_eq!(original.cmp(&retitled), Ordering::Equal);
        assert_ne!(original, make_item("other", "Original title", ts));
    }

    #[test]
    fn episode_path_is_named_after_id() {
        let layout = DataLayout::new("/srv/pod");
        let item = make_item("dQw4w9WgXcQ", "T", Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(
            item.episode_path(&layout, "m4a"),
            PathBuf::from("/srv/pod/ep/dQw4w9WgXcQ.m4a")
        );
        assert_eq!(item.watch_url(), "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
    }
}
