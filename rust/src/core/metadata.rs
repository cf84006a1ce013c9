//! NIP-28 channel metadata.
//!
//! Kind 40 (creation) carries one channel's fields. Kind 41 is replaceable per author, so a single
//! record carries the most recently edited channel at the top level plus every other channel the
//! author has described in a `channels` array.

use nostr_sdk::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::tags::first_event_tag_id;

/// `#r` tag prefix used to reference a channel from kind 41 records and shared notes.
pub const CHANNEL_URL_PREFIX: &str = "https://garnet.nostrian.net/channels/";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub youtube: Option<String>,
}

impl ChannelFields {
    /// Only non-empty strings survive; anything else is treated as absent.
    fn from_object(object: &Map<String, Value>) -> Self {
        let field = |key: &str| {
            object
                .get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Self {
            name: field("name"),
            about: field("about"),
            picture: field("picture"),
            youtube: field("youtube"),
        }
    }

    /// Drops empty strings so an edit form can hand over raw input.
    pub fn normalized(self) -> Self {
        let keep = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        Self {
            name: keep(self.name),
            about: keep(self.about),
            picture: keep(self.picture),
            youtube: keep(self.youtube),
        }
    }

    /// A channel needs a name, and a picture (if any) must be an http(s) URL.
    pub fn is_publishable(&self) -> bool {
        let named = self.name.as_deref().is_some_and(|n| !n.is_empty());
        let picture_ok = self
            .picture
            .as_deref()
            .map_or(true, |p| p.starts_with("http://") || p.starts_with("https://"));
        named && picture_ok
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelMetadata {
    /// The channel id: the id of its kind 40 event.
    pub id: String,
    pub creator: String,
    pub created_at: u64,
    #[serde(flatten)]
    pub fields: ChannelFields,
}

impl ChannelMetadata {
    pub fn name(&self) -> Option<&str> {
        self.fields.name.as_deref()
    }
}

/// `b` supersedes `a`: same channel, same creator, strictly later.
///
/// This is the only rule used when metadata records compete. Scoping it to the creator is what
/// rejects updates forged by other authors.
pub fn is_newer_channel_metadata(a: &ChannelMetadata, b: &ChannelMetadata) -> bool {
    a.id == b.id && a.creator == b.creator && a.created_at < b.created_at
}

fn parse_content_object(content: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(content) {
        Ok(Value::Object(object)) => Some(object),
        _ => None,
    }
}

/// Extract channel metadata records from a kind 40 or 41 event.
///
/// Never fails: malformed content or other kinds yield an empty list.
pub fn parse_channel_metadata(event: &Event) -> Vec<ChannelMetadata> {
    if event.kind != Kind::ChannelCreation && event.kind != Kind::ChannelMetadata {
        return Vec::new();
    }
    let Some(object) = parse_content_object(&event.content) else {
        tracing::debug!(event_id = %event.id.to_hex(), kind = event.kind.as_u16(), "ignoring channel event with non-object content");
        return Vec::new();
    };

    let creator = event.pubkey.to_hex();
    let created_at = event.created_at.as_secs();
    let record = |id: String, object: &Map<String, Value>| ChannelMetadata {
        id,
        creator: creator.clone(),
        created_at,
        fields: ChannelFields::from_object(object),
    };

    if event.kind == Kind::ChannelCreation {
        return vec![record(event.id.to_hex(), &object)];
    }

    // A top-level `id` is only honoured when there is no `e` tag to disambiguate.
    let top_id = first_event_tag_id(&event.tags).or_else(|| {
        object
            .get("id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    });

    let mut records = Vec::new();
    if let Some(id) = top_id {
        records.push(record(id, &object));
    }

    if let Some(Value::Array(channels)) = object.get("channels") {
        for entry in channels {
            let Some(entry) = entry.as_object() else {
                continue;
            };
            let Some(id) = entry
                .get("id")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
            else {
                continue;
            };
            if records.iter().any(|r: &ChannelMetadata| r.id == id) {
                continue;
            }
            records.push(record(id.to_string(), entry));
        }
    }
    records
}

/// Content for a kind 40 event.
pub fn build_channel_content(fields: &ChannelFields) -> String {
    serde_json::to_string(fields).unwrap_or_else(|_| "{}".to_string())
}

#[derive(Serialize)]
struct BundledEntry<'a> {
    id: &'a str,
    #[serde(flatten)]
    fields: &'a ChannelFields,
}

#[derive(Serialize)]
struct BundledContent<'a> {
    #[serde(flatten)]
    edited: &'a ChannelFields,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    channels: Vec<BundledEntry<'a>>,
}

/// Content for a kind 41 event editing `edited_id`.
///
/// `previous` is whatever the author's latest kind 41 described; every channel in it other than
/// the edited one is carried over so the replacement keeps describing all of them.
pub fn build_bundled_metadata_content(
    edited_id: &str,
    fields: &ChannelFields,
    previous: &[ChannelMetadata],
) -> String {
    let mut channels: Vec<BundledEntry<'_>> = Vec::new();
    for meta in previous {
        if meta.id == edited_id || channels.iter().any(|c| c.id == meta.id) {
            continue;
        }
        channels.push(BundledEntry {
            id: &meta.id,
            fields: &meta.fields,
        });
    }
    let content = BundledContent {
        edited: fields,
        channels,
    };
    serde_json::to_string(&content).unwrap_or_else(|_| "{}".to_string())
}

/// Ids referenced by a bundled kind 41 built for `edited_id`, edited channel first.
pub fn bundled_channel_ids(edited_id: &str, previous: &[ChannelMetadata]) -> Vec<String> {
    let mut ids = vec![edited_id.to_string()];
    for meta in previous {
        if !ids.contains(&meta.id) {
            ids.push(meta.id.clone());
        }
    }
    ids
}
