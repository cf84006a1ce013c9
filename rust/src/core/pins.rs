//! Unread tracking for pinned channels.

use std::collections::HashMap;

use nostr_sdk::prelude::*;

use super::config_store::PinnedChannel;
use super::tags::root_channel_id;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PinTracker {
    /// Newest message timestamp seen per pinned channel.
    pub last_message_seen: HashMap<String, u64>,
}

impl PinTracker {
    /// Forget channels that are no longer pinned.
    pub fn set_pins(&mut self, pins: &[PinnedChannel]) -> bool {
        let before = self.last_message_seen.len();
        self.last_message_seen
            .retain(|id, _| pins.iter().any(|p| &p.id == id));
        before != self.last_message_seen.len()
    }

    pub fn receive(&mut self, pins: &[PinnedChannel], events: &[Event]) -> bool {
        let mut changed = false;
        for event in events.iter().filter(|e| e.kind == Kind::ChannelMessage) {
            let Some(channel_id) = root_channel_id(&event.tags) else {
                continue;
            };
            if !pins.iter().any(|p| p.id == channel_id) {
                continue;
            }
            let at = event.created_at.as_secs();
            let seen = self.last_message_seen.entry(channel_id).or_insert(0);
            if at > *seen {
                *seen = at;
                changed = true;
            }
        }
        changed
    }

    pub fn seen(&self, channel_id: &str) -> Option<u64> {
        self.last_message_seen.get(channel_id).copied()
    }
}

/// A pinned channel has unread messages when something newer than its read mark arrived,
/// unless it is the channel currently on screen.
pub fn is_unread(pin: &PinnedChannel, tracked: Option<u64>, foreground: Option<&str>) -> bool {
    if foreground == Some(pin.id.as_str()) {
        return false;
    }
    tracked.is_some_and(|seen| seen > pin.last_read)
}

fn pinned_ids(pins: &[PinnedChannel]) -> Vec<String> {
    pins.iter().map(|p| p.id.clone()).collect()
}

/// Live messages for every pin, plus the single newest message since each pin's read mark.
pub fn pin_filters(pins: &[PinnedChannel], now: Timestamp) -> Vec<Filter> {
    if pins.is_empty() {
        return Vec::new();
    }
    let e = SingleLetterTag::lowercase(Alphabet::E);
    let mut filters = vec![Filter::new()
        .kind(Kind::ChannelMessage)
        .custom_tags(e, pinned_ids(pins))
        .since(now)];
    for pin in pins {
        filters.push(
            Filter::new()
                .kind(Kind::ChannelMessage)
                .custom_tags(e, vec![pin.id.clone()])
                .since(Timestamp::from_secs(pin.last_read))
                .limit(1),
        );
    }
    filters
}

pub fn pin_recovery_filters(pins: &[PinnedChannel], now: Timestamp) -> Vec<Filter> {
    if pins.is_empty() {
        return Vec::new();
    }
    vec![Filter::new()
        .kind(Kind::ChannelMessage)
        .custom_tags(SingleLetterTag::lowercase(Alphabet::E), pinned_ids(pins))
        .since(now)]
}
