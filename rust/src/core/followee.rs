//! Timeline built from the signed-in user's follow list.

use std::collections::HashMap;

use nostr_sdk::prelude::*;
use serde::Serialize;

use super::tags::{followed_pubkeys, root_channel_id};

pub const NOTE_CAP: usize = 100;
pub const MESSAGE_CAP: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimpleNote {
    pub id: String,
    pub pubkey: String,
    pub content: String,
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineMessage {
    pub id: String,
    pub pubkey: String,
    pub content: String,
    pub created_at: u64,
    pub is_note: bool,
    pub channel_id: String,
}

#[derive(Debug)]
pub enum FolloweeAction {
    AddSimpleNotes(Vec<Event>),
    AddMessages(Vec<Event>),
    SignedOut,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolloweeState {
    pub notes: HashMap<String, SimpleNote>,
    pub messages: HashMap<String, TimelineMessage>,
    /// Newest first, capped at [`NOTE_CAP`].
    pub sorted_notes: Vec<SimpleNote>,
    /// Newest first, capped at [`MESSAGE_CAP`].
    pub sorted_messages: Vec<TimelineMessage>,
}

fn newest_first<T: Clone>(
    map: &HashMap<String, T>,
    key: impl Fn(&T) -> (u64, &str),
    cap: usize,
) -> Vec<T> {
    let mut items: Vec<&T> = map.values().collect();
    items.sort_by(|a, b| {
        let (at_a, id_a) = key(a);
        let (at_b, id_b) = key(b);
        at_b.cmp(&at_a).then_with(|| id_a.cmp(id_b))
    });
    items.into_iter().take(cap).cloned().collect()
}

impl FolloweeState {
    pub fn reduce(&mut self, action: FolloweeAction) -> bool {
        match action {
            FolloweeAction::AddSimpleNotes(events) => self.add_notes(&events),
            FolloweeAction::AddMessages(events) => self.add_messages(&events),
            FolloweeAction::SignedOut => {
                let changed = *self != Self::default();
                *self = Self::default();
                changed
            }
        }
    }

    fn add_notes(&mut self, events: &[Event]) -> bool {
        let mut changed = false;
        for event in events.iter().filter(|e| e.kind == Kind::TextNote) {
            let id = event.id.to_hex();
            if self.notes.contains_key(&id) {
                continue;
            }
            self.notes.insert(
                id.clone(),
                SimpleNote {
                    id,
                    pubkey: event.pubkey.to_hex(),
                    content: event.content.clone(),
                    created_at: event.created_at.as_secs(),
                },
            );
            changed = true;
        }
        if changed {
            self.sorted_notes =
                newest_first(&self.notes, |n| (n.created_at, n.id.as_str()), NOTE_CAP);
        }
        changed
    }

    fn add_messages(&mut self, events: &[Event]) -> bool {
        let mut changed = false;
        for event in events.iter().filter(|e| e.kind == Kind::ChannelMessage) {
            let Some(channel_id) = root_channel_id(&event.tags) else {
                tracing::debug!(event_id = %event.id.to_hex(), "timeline message without root tag");
                continue;
            };
            let id = event.id.to_hex();
            if self.messages.contains_key(&id) {
                continue;
            }
            self.messages.insert(
                id.clone(),
                TimelineMessage {
                    id,
                    pubkey: event.pubkey.to_hex(),
                    content: event.content.clone(),
                    created_at: event.created_at.as_secs(),
                    is_note: false,
                    channel_id,
                },
            );
            changed = true;
        }
        if changed {
            self.sorted_messages =
                newest_first(&self.messages, |m| (m.created_at, m.id.as_str()), MESSAGE_CAP);
        }
        changed
    }

    /// Split a mixed batch by kind and apply both halves.
    pub fn receive_batch(&mut self, events: Vec<Event>) -> bool {
        let (messages, notes): (Vec<Event>, Vec<Event>) = events
            .into_iter()
            .partition(|e| e.kind == Kind::ChannelMessage);
        let notes_changed = self.reduce(FolloweeAction::AddSimpleNotes(notes));
        let messages_changed = self.reduce(FolloweeAction::AddMessages(messages));
        notes_changed || messages_changed
    }
}

/// Who the timeline follows.
///
/// Until the first contact list arrives the cached follows are used as-is; afterwards the
/// newest contact list wins and the viewer is always included.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FollowList {
    pub self_pubkey: Option<String>,
    pub loaded: bool,
    pub contacts_created_at: u64,
    pub follows: Vec<String>,
}

impl FollowList {
    pub fn new(self_pubkey: impl Into<String>, cached: Vec<String>) -> Self {
        Self {
            self_pubkey: Some(self_pubkey.into()),
            loaded: false,
            contacts_created_at: 0,
            follows: cached,
        }
    }

    /// Apply a contact list event. Returns whether the follow set changed.
    pub fn receive_contacts(&mut self, event: &Event) -> bool {
        let Some(self_pubkey) = self.self_pubkey.as_deref() else {
            return false;
        };
        if event.kind != Kind::ContactList || event.pubkey.to_hex() != self_pubkey {
            return false;
        }
        let created_at = event.created_at.as_secs();
        if self.loaded && created_at <= self.contacts_created_at {
            return false;
        }
        let follows = followed_pubkeys(&event.tags);
        let before = self.authors();
        self.loaded = true;
        self.contacts_created_at = created_at;
        self.follows = follows;
        before != self.authors()
    }

    pub fn authors(&self) -> Vec<String> {
        let mut authors = self.follows.clone();
        if self.loaded {
            if let Some(me) = &self.self_pubkey {
                if !authors.contains(me) {
                    authors.push(me.clone());
                }
            }
        } else if let Some(me) = &self.self_pubkey {
            authors.retain(|a| a != me);
        }
        authors.sort();
        authors.dedup();
        authors
    }
}

pub fn timeline_filters(authors: &[PublicKey], now: Timestamp, backlog: usize) -> Vec<Filter> {
    if authors.is_empty() {
        return Vec::new();
    }
    let authors = authors.iter().copied();
    vec![
        Filter::new()
            .kind(Kind::TextNote)
            .authors(authors.clone())
            .until(now)
            .limit(backlog),
        Filter::new()
            .kind(Kind::ChannelMessage)
            .authors(authors.clone())
            .until(now)
            .limit(backlog),
        Filter::new()
            .kinds([Kind::TextNote, Kind::ChannelMessage])
            .authors(authors)
            .since(now),
    ]
}

/// The timeline keeps its backlog, so recovery only asks for what follows.
pub fn timeline_recovery_filters(authors: &[PublicKey], now: Timestamp) -> Vec<Filter> {
    if authors.is_empty() {
        return Vec::new();
    }
    vec![Filter::new()
        .kinds([Kind::TextNote, Kind::ChannelMessage])
        .authors(authors.iter().copied())
        .since(now)]
}

/// The viewer's contact lists, newest first.
pub fn contacts_filters(self_pubkey: PublicKey) -> Vec<Filter> {
    vec![Filter::new()
        .kind(Kind::ContactList)
        .author(self_pubkey)
        .limit(1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHANNEL: &str = "3bf0c63fcb93463407af97a5e5ee64fa883d107ef9e558472c4eb9aaaefa459d";

    fn signed(keys: &Keys, kind: Kind, content: &str, tags: Vec<Vec<&str>>, at: u64) -> Event {
        let tags: Vec<Tag> = tags.into_iter().map(|t| Tag::parse(t).unwrap()).collect();
        EventBuilder::new(kind, content)
            .tags(tags)
            .custom_created_at(Timestamp::from_secs(at))
            .sign_with_keys(keys)
            .expect("sign")
    }

    #[test]
    fn messages_need_root_tag() {
        let keys = Keys::generate();
        let good = signed(
            &keys,
            Kind::ChannelMessage,
            "hi",
            vec![vec!["e", CHANNEL, "wss://r", "root"]],
            5,
        );
        let reply = signed(
            &keys,
            Kind::ChannelMessage,
            "reply",
            vec![vec!["e", CHANNEL, "wss://r", "reply"]],
            6,
        );
        let bare = signed(&keys, Kind::ChannelMessage, "bare", vec![vec!["e", CHANNEL]], 7);

        let mut state = FolloweeState::default();
        assert!(state.receive_batch(vec![good.clone(), reply, bare]));
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.sorted_messages[0].channel_id, CHANNEL);
        assert!(!state.sorted_messages[0].is_note);
        assert!(!state.receive_batch(vec![good]));
    }

    #[test]
    fn projections_are_descending_and_capped() {
        let keys = Keys::generate();
        let notes: Vec<Event> = (0..(NOTE_CAP as u64 + 20))
            .map(|i| signed(&keys, Kind::TextNote, &format!("n{i}"), vec![], i + 1))
            .collect();
        let mut state = FolloweeState::default();
        state.reduce(FolloweeAction::AddSimpleNotes(notes));

        assert_eq!(state.notes.len(), NOTE_CAP + 20);
        assert_eq!(state.sorted_notes.len(), NOTE_CAP);
        assert_eq!(state.sorted_notes[0].created_at, NOTE_CAP as u64 + 20);
        assert!(state
            .sorted_notes
            .windows(2)
            .all(|w| w[0].created_at >= w[1].created_at));
    }

    #[test]
    fn sign_out_resets() {
        let keys = Keys::generate();
        let mut state = FolloweeState::default();
        state.reduce(FolloweeAction::AddSimpleNotes(vec![signed(
            &keys,
            Kind::TextNote,
            "n",
            vec![],
            1,
        )]));
        assert!(state.reduce(FolloweeAction::SignedOut));
        assert_eq!(state, FolloweeState::default());
        assert!(!state.reduce(FolloweeAction::SignedOut));
    }

    #[test]
    fn follow_list_includes_self_only_after_load() {
        let me = Keys::generate();
        let me_hex = me.public_key().to_hex();
        let friend = Keys::generate().public_key().to_hex();

        let mut list = FollowList::new(me_hex.clone(), vec![friend.clone(), me_hex.clone()]);
        assert_eq!(list.authors(), vec![friend.clone()]);

        let contacts = signed(&me, Kind::ContactList, "", vec![vec!["p", &friend]], 10);
        list.receive_contacts(&contacts);
        let mut expected = vec![friend.clone(), me_hex.clone()];
        expected.sort();
        assert_eq!(list.authors(), expected);

        let older = signed(&me, Kind::ContactList, "", vec![], 5);
        assert!(!list.receive_contacts(&older));
        assert_eq!(list.follows, vec![friend]);

        let stranger = signed(&Keys::generate(), Kind::ContactList, "", vec![], 50);
        assert!(!list.receive_contacts(&stranger));
    }

    #[test]
    fn filters_require_authors() {
        let now = Timestamp::from_secs(100);
        assert!(timeline_filters(&[], now, 50).is_empty());
        let author = Keys::generate().public_key();
        let filters = timeline_filters(&[author], now, 50);
        assert_eq!(filters.len(), 3);
        assert_eq!(filters[0].limit, Some(50));
        assert_eq!(filters[2].since, Some(now));

        let recovery = timeline_recovery_filters(&[author], now);
        assert_eq!(recovery, vec![filters[2].clone()]);
    }
}
