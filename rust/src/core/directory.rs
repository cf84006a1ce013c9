//! Channel directory: every channel seen by a discovery subscription.

use std::collections::HashMap;

use nostr_sdk::prelude::*;
use serde::Serialize;

use super::metadata::{is_newer_channel_metadata, parse_channel_metadata, ChannelMetadata};
use super::tags::normalize_pubkey;
use crate::mux::ReceivedEvent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Channel {
    pub metadata: ChannelMetadata,
    /// Relay that delivered the creation record.
    pub relay_url: String,
    pub created_at: u64,
}

impl Channel {
    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    /// Adopts the newest record in `candidates` that supersedes the current metadata.
    fn adopt_newest(&mut self, candidates: impl IntoIterator<Item = ChannelMetadata>) {
        for candidate in candidates {
            if is_newer_channel_metadata(&self.metadata, &candidate) {
                self.metadata = candidate;
            }
        }
    }
}

pub(crate) fn channel_from_creation(
    creation: ChannelMetadata,
    relay_url: &str,
    buffered: impl IntoIterator<Item = ChannelMetadata>,
) -> Channel {
    let mut channel = Channel {
        created_at: creation.created_at,
        metadata: creation,
        relay_url: relay_url.to_string(),
    };
    channel.adopt_newest(buffered);
    channel
}

#[derive(Debug)]
pub enum ChannelsAction {
    ReceivedEvent(ReceivedEvent),
    /// The discovery window closed: drop updates still waiting for their creation record.
    Unsub,
    /// A new discovery window is starting.
    Reload,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelsState {
    pub list: HashMap<String, Channel>,
    /// Metadata updates whose creation record has not arrived yet.
    pub temporary: HashMap<String, Vec<ChannelMetadata>>,
}

impl ChannelsState {
    /// Apply one transition. Returns whether `list` changed.
    pub fn reduce(&mut self, action: ChannelsAction) -> bool {
        match action {
            ChannelsAction::ReceivedEvent(received) => self.receive(received),
            ChannelsAction::Unsub | ChannelsAction::Reload => {
                self.temporary.clear();
                false
            }
        }
    }

    fn receive(&mut self, received: ReceivedEvent) -> bool {
        let event = &received.event;
        let metadata = parse_channel_metadata(event);
        if metadata.is_empty() {
            return false;
        }

        if event.kind == Kind::ChannelCreation {
            let Some(creation) = metadata.into_iter().next() else {
                return false;
            };
            if self.list.contains_key(&creation.id) {
                return false;
            }
            let buffered = self.temporary.remove(&creation.id).unwrap_or_default();
            let channel = channel_from_creation(creation, &received.relay_url, buffered);
            self.list.insert(channel.metadata.id.clone(), channel);
            return true;
        }

        let mut changed = false;
        for meta in metadata {
            match self.list.get_mut(&meta.id) {
                Some(channel) => {
                    if is_newer_channel_metadata(&channel.metadata, &meta) {
                        channel.metadata = meta;
                        changed = true;
                    }
                }
                None => {
                    let pending = self.temporary.entry(meta.id.clone()).or_default();
                    if !pending.contains(&meta) {
                        pending.push(meta);
                    }
                }
            }
        }
        changed
    }

    /// Newest channels first.
    pub fn sorted(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self.list.values().cloned().collect();
        channels.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.metadata.id.cmp(&b.metadata.id))
        });
        channels
    }

    pub fn get(&self, id: &str) -> Option<&Channel> {
        self.list.get(id)
    }
}

/// Sidebar discovery: recent creations and metadata updates.
pub fn sidebar_filters(now: Timestamp, limit: usize) -> Vec<Filter> {
    vec![
        Filter::new()
            .kind(Kind::ChannelCreation)
            .until(now)
            .limit(limit),
        Filter::new()
            .kind(Kind::ChannelMetadata)
            .until(now)
            .limit(limit),
    ]
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelSearch {
    pub channel_id: Option<String>,
    /// Owner as hex or `npub`.
    pub owner: Option<String>,
}

/// Filters for the channel browser.
///
/// Returns nothing when the channel id cannot be an event id, since no event could match. An
/// owner that does not decode is ignored rather than rejected.
pub fn search_filters(search: &ChannelSearch, now: Timestamp, limit: usize) -> Vec<Filter> {
    let mut creation = Filter::new().kind(Kind::ChannelCreation);
    let mut update = Filter::new().kind(Kind::ChannelMetadata);

    let channel_id = search
        .channel_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    if let Some(id) = channel_id {
        let Ok(event_id) = EventId::from_hex(id) else {
            return Vec::new();
        };
        creation = creation.id(event_id);
        update = update.custom_tags(SingleLetterTag::lowercase(Alphabet::E), vec![id.to_string()]);
    }

    let owner = search
        .owner
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(normalize_pubkey)
        .and_then(|hex| PublicKey::from_hex(&hex).ok());
    if let Some(owner) = owner {
        creation = creation.author(owner);
        update = update.author(owner);
    }

    if channel_id.is_some() {
        update = update.until(now).limit(limit);
    } else {
        creation = creation.until(now).limit(limit);
        update = update.until(now).limit(limit);
    }
    vec![creation, update]
}

/// Discovery is time-boxed, so a resumed subscription needs nothing; a fresh one starts over.
pub fn directory_recovery_filters(original: &[Filter], is_new_subscription: bool) -> Vec<Filter> {
    if is_new_subscription {
        original.to_vec()
    } else {
        Vec::new()
    }
}
