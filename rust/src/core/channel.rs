//! The open channel: its metadata plus its message timeline.

use std::collections::HashMap;

use nostr_sdk::prelude::*;
use serde::Serialize;

use super::directory::{channel_from_creation, Channel};
use super::metadata::{
    is_newer_channel_metadata, parse_channel_metadata, ChannelMetadata, CHANNEL_URL_PREFIX,
};
use super::tags::is_hex_id;
use crate::mux::ReceivedEvent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelMessage {
    pub id: String,
    pub pubkey: String,
    pub content: String,
    pub created_at: u64,
}

impl ChannelMessage {
    pub fn from_event(event: &Event) -> Self {
        Self {
            id: event.id.to_hex(),
            pubkey: event.pubkey.to_hex(),
            content: event.content.clone(),
            created_at: event.created_at.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChannelStatus {
    AwaitingData,
    Loaded,
    NotFound,
}

#[derive(Debug)]
pub enum ChannelAction {
    /// Creation and metadata records.
    ReceivedEvent(ReceivedEvent),
    Messages(Vec<Event>),
    ChangeChannel(String),
    InitialLoaded,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelState {
    pub channel_id: String,
    pub initial_loaded: bool,
    pub not_found: bool,
    pub channel: Option<Channel>,
    /// Metadata for this channel seen before its creation record.
    pub temporary: Vec<ChannelMetadata>,
    pub messages: HashMap<String, ChannelMessage>,
    /// `messages` ascending by `created_at`.
    pub sorted_messages: Vec<ChannelMessage>,
}

impl ChannelState {
    pub fn new(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            initial_loaded: false,
            not_found: false,
            channel: None,
            temporary: Vec::new(),
            messages: HashMap::new(),
            sorted_messages: Vec::new(),
        }
    }

    pub fn status(&self) -> ChannelStatus {
        if self.not_found {
            ChannelStatus::NotFound
        } else if self.initial_loaded {
            ChannelStatus::Loaded
        } else {
            ChannelStatus::AwaitingData
        }
    }

    pub fn reduce(&mut self, action: ChannelAction) -> bool {
        match action {
            ChannelAction::ReceivedEvent(received) => self.receive_metadata(received),
            ChannelAction::Messages(events) => self.receive_messages(&events),
            ChannelAction::ChangeChannel(id) => {
                *self = Self::new(id);
                true
            }
            ChannelAction::InitialLoaded => {
                let changed = !self.initial_loaded;
                self.initial_loaded = true;
                changed
            }
            ChannelAction::NotFound => {
                let changed = !self.not_found;
                self.not_found = true;
                changed
            }
        }
    }

    fn receive_metadata(&mut self, received: ReceivedEvent) -> bool {
        let event = &received.event;
        if event.kind == Kind::ChannelCreation {
            if self.channel.is_some() || event.id.to_hex() != self.channel_id {
                return false;
            }
            let Some(creation) = parse_channel_metadata(event).into_iter().next() else {
                return false;
            };
            let buffered = std::mem::take(&mut self.temporary);
            self.channel = Some(channel_from_creation(
                creation,
                &received.relay_url,
                buffered,
            ));
            return true;
        }

        let mut changed = false;
        for meta in parse_channel_metadata(event) {
            if meta.id != self.channel_id {
                continue;
            }
            match self.channel.as_mut() {
                Some(channel) => {
                    if is_newer_channel_metadata(&channel.metadata, &meta) {
                        channel.metadata = meta;
                        changed = true;
                    }
                }
                None => {
                    if !self.temporary.contains(&meta) {
                        self.temporary.push(meta);
                    }
                }
            }
        }
        changed
    }

    fn receive_messages(&mut self, events: &[Event]) -> bool {
        let mut changed = false;
        for event in events {
            if event.kind != Kind::ChannelMessage {
                continue;
            }
            let id = event.id.to_hex();
            if self.messages.contains_key(&id) {
                continue;
            }
            self.messages.insert(id, ChannelMessage::from_event(event));
            changed = true;
        }
        if changed {
            let mut sorted: Vec<ChannelMessage> = self.messages.values().cloned().collect();
            sorted.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
            self.sorted_messages = sorted;
        }
        changed
    }

    /// Apply a delivered batch: kind 42 events as one message batch, everything else as
    /// metadata. Returns whether anything changed and the newest message timestamp.
    pub fn receive_batch(&mut self, batch: Vec<ReceivedEvent>) -> (bool, Option<u64>) {
        let (messages, others): (Vec<ReceivedEvent>, Vec<ReceivedEvent>) = batch
            .into_iter()
            .partition(|r| r.event.kind == Kind::ChannelMessage);

        let mut changed = false;
        for received in others {
            changed |= self.reduce(ChannelAction::ReceivedEvent(received));
        }
        let newest = messages.iter().map(|r| r.event.created_at.as_secs()).max();
        let events: Vec<Event> = messages.into_iter().map(|r| r.event).collect();
        changed |= self.reduce(ChannelAction::Messages(events));
        (changed, newest)
    }
}

fn e_tag(channel_id: &str) -> (SingleLetterTag, Vec<String>) {
    (
        SingleLetterTag::lowercase(Alphabet::E),
        vec![channel_id.to_string()],
    )
}

/// Everything needed to render `channel_id`: creation, both metadata indexes, recent backlog
/// and live messages. Empty when the id cannot name a channel.
pub fn full_filters(channel_id: &str, now: Timestamp, backlog: usize) -> Vec<Filter> {
    if !is_hex_id(channel_id) {
        return Vec::new();
    }
    let Ok(event_id) = EventId::from_hex(channel_id) else {
        return Vec::new();
    };
    let (e, ids) = e_tag(channel_id);
    vec![
        Filter::new().id(event_id).kind(Kind::ChannelCreation),
        Filter::new().kind(Kind::ChannelMetadata).custom_tags(
            SingleLetterTag::lowercase(Alphabet::R),
            vec![format!("{CHANNEL_URL_PREFIX}{channel_id}")],
        ),
        Filter::new()
            .kind(Kind::ChannelMetadata)
            .custom_tags(e, ids.clone()),
        Filter::new()
            .kind(Kind::ChannelMessage)
            .custom_tags(e, ids.clone())
            .until(now)
            .limit(backlog),
        Filter::new()
            .kind(Kind::ChannelMessage)
            .custom_tags(e, ids)
            .since(now),
    ]
}

/// Gap fill after a relay resumes: metadata edits and messages from now on.
pub fn resumed_filters(channel_id: &str, now: Timestamp) -> Vec<Filter> {
    let (e, ids) = e_tag(channel_id);
    vec![Filter::new()
        .kinds([Kind::ChannelMetadata, Kind::ChannelMessage])
        .custom_tags(e, ids)
        .since(now)]
}

pub fn channel_recovery_filters(
    channel_id: &str,
    is_new_subscription: bool,
    now: Timestamp,
    backlog: usize,
) -> Vec<Filter> {
    if is_new_subscription {
        full_filters(channel_id, now, backlog)
    } else {
        resumed_filters(channel_id, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed(keys: &Keys, kind: Kind, content: &str, tags: Vec<Vec<&str>>, at: u64) -> Event {
        let tags: Vec<Tag> = tags.into_iter().map(|t| Tag::parse(t).unwrap()).collect();
        EventBuilder::new(kind, content)
            .tags(tags)
            .custom_created_at(Timestamp::from_secs(at))
            .sign_with_keys(keys)
            .expect("sign")
    }

    fn received(event: Event) -> ReceivedEvent {
        ReceivedEvent::new("wss://relay", event)
    }

    #[test]
    fn status_follows_eose_and_not_found() {
        let mut state = ChannelState::new("ab".repeat(32));
        assert_eq!(state.status(), ChannelStatus::AwaitingData);
        assert!(state.reduce(ChannelAction::InitialLoaded));
        assert!(!state.reduce(ChannelAction::InitialLoaded));
        assert_eq!(state.status(), ChannelStatus::Loaded);
        assert!(state.channel.is_none());

        let mut missing = ChannelState::new("not-hex");
        missing.reduce(ChannelAction::NotFound);
        assert_eq!(missing.status(), ChannelStatus::NotFound);
    }

    #[test]
    fn metadata_before_creation_is_adopted() {
        let keys = Keys::generate();
        let creation = signed(&keys, Kind::ChannelCreation, r#"{"name":"orig"}"#, vec![], 1);
        let id = creation.id.to_hex();
        let edit = signed(
            &keys,
            Kind::ChannelMetadata,
            r#"{"name":"edited","channels":[{"id":"other","name":"x"}]}"#,
            vec![vec!["e", &id]],
            5,
        );

        let mut state = ChannelState::new(id.clone());
        let (changed, newest) = state.receive_batch(vec![received(edit)]);
        assert!(!changed);
        assert_eq!(newest, None);
        assert_eq!(state.temporary.len(), 1);

        let (changed, _) = state.receive_batch(vec![received(creation)]);
        assert!(changed);
        let channel = state.channel.as_ref().unwrap();
        assert_eq!(channel.metadata.name(), Some("edited"));
        assert_eq!(channel.created_at, 1);
        assert!(state.temporary.is_empty());
    }

    #[test]
    fn foreign_creation_record_is_ignored() {
        let keys = Keys::generate();
        let stray = signed(&keys, Kind::ChannelCreation, r#"{"name":"stray"}"#, vec![], 1);
        let mut state = ChannelState::new("ab".repeat(32));
        assert!(!state.reduce(ChannelAction::ReceivedEvent(received(stray))));
        assert!(state.channel.is_none());
    }

    #[test]
    fn messages_dedup_and_sort_ascending() {
        let keys = Keys::generate();
        let id = "ab".repeat(32);
        let root = vec!["e", id.as_str(), "wss://relay", "root"];
        let late = signed(&keys, Kind::ChannelMessage, "late", vec![root.clone()], 30);
        let early = signed(&keys, Kind::ChannelMessage, "early", vec![root.clone()], 10);
        let mid = signed(&keys, Kind::ChannelMessage, "mid", vec![root], 20);

        let mut state = ChannelState::new(id);
        let (_, newest) = state.receive_batch(vec![received(late.clone()), received(early)]);
        assert_eq!(newest, Some(30));
        state.receive_batch(vec![received(mid), received(late.clone()), received(late)]);

        let contents: Vec<_> = state.sorted_messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["early", "mid", "late"]);
        assert_eq!(state.messages.len(), 3);
    }

    #[test]
    fn change_channel_resets() {
        let mut state = ChannelState::new("ab".repeat(32));
        state.reduce(ChannelAction::InitialLoaded);
        state.reduce(ChannelAction::ChangeChannel("cd".repeat(32)));
        assert_eq!(state, ChannelState::new("cd".repeat(32)));
    }

    #[test]
    fn filters_cover_creation_metadata_and_messages() {
        let id = "ab".repeat(32);
        let now = Timestamp::from_secs(1_000);
        let filters = full_filters(&id, now, 100);
        assert_eq!(filters.len(), 5);
        assert_eq!(filters[3].limit, Some(100));
        assert_eq!(filters[3].until, Some(now));
        assert_eq!(filters[4].since, Some(now));
        assert!(full_filters("not-hex", now, 100).is_empty());

        assert_eq!(channel_recovery_filters(&id, true, now, 100), filters);
        let resumed = channel_recovery_filters(&id, false, now, 100);
        assert_eq!(resumed, resumed_filters(&id, now));
        assert_eq!(resumed.len(), 1);
        assert_eq!(resumed[0].since, Some(now));
    }
}
