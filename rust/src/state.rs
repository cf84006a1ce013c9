use std::collections::HashMap;

use serde::Serialize;

use crate::core::channel::{ChannelMessage, ChannelStatus};
use crate::core::config_store::Lang;
use crate::core::directory::Channel;
use crate::core::followee::{SimpleNote, TimelineMessage};
use crate::core::profile::ProfileLookup;

/// Snapshot handed to the UI after every accepted transition.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AppState {
    pub rev: u64,
    pub auth: AuthState,
    pub lang: Lang,
    pub enable_ambient_timeline: bool,
    pub relays: Vec<RelayView>,
    /// Sidebar directory, newest first.
    pub channels: DirectoryView,
    /// Channel browser results while a search is open.
    pub search: Option<SearchView>,
    pub pinned: Vec<PinnedChannelView>,
    pub current_channel: Option<ChannelViewState>,
    pub timeline: TimelineView,
    pub profiles: HashMap<String, ProfileLookup>,
    pub busy: BusyState,
    pub toast: Option<String>,
}

impl AppState {
    pub fn empty() -> Self {
        Self {
            rev: 0,
            auth: AuthState::SignedOut,
            lang: Lang::default(),
            enable_ambient_timeline: false,
            relays: vec![],
            channels: DirectoryView::default(),
            search: None,
            pinned: vec![],
            current_channel: None,
            timeline: TimelineView::default(),
            profiles: HashMap::new(),
            busy: BusyState::idle(),
            toast: None,
        }
    }

    pub fn pubkey(&self) -> Option<&str> {
        match &self.auth {
            AuthState::SignedIn { pubkey, .. } => Some(pubkey),
            AuthState::SignedOut => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum AuthState {
    SignedOut,
    SignedIn { pubkey: String, npub: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RelayView {
    pub url: String,
    pub read: bool,
    pub write: bool,
    pub healthy: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DirectoryView {
    pub channels: Vec<Channel>,
    /// The discovery window is still open.
    pub loading: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SearchView {
    pub channel_id: Option<String>,
    pub owner: Option<String>,
    pub results: DirectoryView,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PinnedChannelView {
    pub id: String,
    /// From the sidebar directory once the channel has been seen.
    pub name: Option<String>,
    pub last_read: u64,
    pub unread: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChannelViewState {
    pub channel_id: String,
    pub status: ChannelStatus,
    pub channel: Option<Channel>,
    /// Oldest first.
    pub messages: Vec<ChannelMessage>,
    pub pinned: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TimelineView {
    pub notes: Vec<SimpleNote>,
    pub messages: Vec<TimelineMessage>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BusyState {
    pub signing_in: bool,
    pub publishing: bool,
}

impl BusyState {
    pub fn idle() -> Self {
        Self::default()
    }
}
