use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// One unit of feed content: a video plus the metadata shown over it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: String,
    #[serde(flatten)]
    pub playable: PlayableRef,
    #[serde(flatten)]
    pub meta: DisplayMeta,
}

impl Entry {
    pub fn new(id: impl Into<String>, src: impl Into<String>, username: &str, description: &str) -> Self {
        Self {
            id: id.into(),
            playable: PlayableRef {
                src: Some(src.into()),
                ..PlayableRef::default()
            },
            meta: DisplayMeta {
                username: username.to_string(),
                description: description.to_string(),
            },
        }
    }
}

/// Opaque reference to the media; turned into a URL by `resolve::playable_url`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayableRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mux_playback_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloudinary_public_id: Option<String>,
}

impl PlayableRef {
    pub fn is_empty(&self) -> bool {
        [&self.src, &self.mux_playback_id, &self.cloudinary_public_id]
            .iter()
            .all(|value| value.as_deref().map_or(true, |s| s.trim().is_empty()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayMeta {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub description: String,
}

/// Pagination continuation token. Never parsed; only handed back to the source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cursor(String);

impl Cursor {
    /// Wraps a raw token. Empty tokens mean "no more pages" and yield `None`.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        if raw.is_empty() {
            None
        } else {
            Some(Self(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One resolved page from a `FeedSource`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedPage {
    pub entries: Vec<Entry>,
    pub next_cursor: Option<Cursor>,
}

/// Wire shape of a page response. `videos` stays optional so a missing
/// array can be reported as a malformed payload instead of a parse failure.
/// Items are decoded one at a time so a single bad item only drops itself.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PageResponse {
    #[serde(default)]
    pub videos: Option<Vec<Value>>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

impl PageResponse {
    pub(crate) fn into_page(self) -> Option<FeedPage> {
        let items = self.videos?;
        let total = items.len();
        let entries: Vec<Entry> = items
            .into_iter()
            .filter_map(|item| serde_json::from_value::<Entry>(item).ok())
            .filter(|entry| !entry.id.trim().is_empty() && !entry.playable.is_empty())
            .collect();
        if entries.len() != total {
            debug!(
                target: "feed.page",
                kept = entries.len(),
                dropped = total - entries.len(),
                "page_items_skipped"
            );
        }
        Some(FeedPage {
            entries,
            next_cursor: self.next_cursor.and_then(Cursor::new),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_wire_entry() {
        let raw = r#"{
            "id": "a1",
            "muxPlaybackId": "abc",
            "username": "@someone",
            "description": "clip"
        }"#;
        let entry: Entry = serde_json::from_str(raw).unwrap();
        assert_eq!(entry.id, "a1");
        assert_eq!(entry.playable.mux_playback_id.as_deref(), Some("abc"));
        assert_eq!(entry.playable.src, None);
        assert_eq!(entry.meta.username, "@someone");
    }

    #[test]
    fn empty_cursor_means_no_more_pages() {
        assert!(Cursor::new("").is_none());
        assert_eq!(Cursor::new("abc").unwrap().as_str(), "abc");
    }

    #[test]
    fn page_without_videos_array_is_rejected() {
        let resp: PageResponse = serde_json::from_str(r#"{"nextCursor":"2"}"#).unwrap();
        assert!(resp.into_page().is_none());

        let resp: PageResponse =
            serde_json::from_str(r#"{"videos":[],"nextCursor":null}"#).unwrap();
        let page = resp.into_page().unwrap();
        assert!(page.entries.is_empty());
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn incomplete_items_do_not_reject_the_page() {
        let raw = r#"{
            "videos": [
                {"id": "a", "src": "https://cdn.test/a.mp4", "username": "@a", "description": "full"},
                {"id": "b", "src": "https://cdn.test/b.mp4", "username": "@b"},
                {"id": "c"},
                {"id": "", "src": "https://cdn.test/blank.mp4"},
                {"src": 42}
            ],
            "nextCursor": "p2"
        }"#;
        let resp: PageResponse = serde_json::from_str(raw).unwrap();
        let page = resp.into_page().unwrap();
        let ids: Vec<_> = page.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(page.entries[1].meta.username, "@b");
        assert_eq!(page.entries[1].meta.description, "");
        assert_eq!(page.next_cursor.unwrap().as_str(), "p2");
    }

    #[test]
    fn playable_ref_emptiness_ignores_whitespace() {
        let empty = PlayableRef {
            src: Some("  ".into()),
            ..PlayableRef::default()
        };
        assert!(empty.is_empty());
        let filled = PlayableRef {
            cloudinary_public_id: Some("clip".into()),
            ..PlayableRef::default()
        };
        assert!(!filled.is_empty());
    }
}
