pub mod channel;
pub mod config;
pub mod config_store;
pub mod directory;
pub mod followee;
pub mod metadata;
pub mod pins;
pub mod profile;
pub(crate) mod publish;
pub(crate) mod session;
pub mod settings_db;
pub mod tags;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use flume::Sender;
use nostr_sdk::prelude::*;

use crate::actions::AppAction;
use crate::mux::{
    health_quorum, PublishMessage, PublishOptions, PublishSink, ReceivedEvent, RecoverFn,
    RelayMux, SubscribeRequest, SubscriptionMessage, SubscriptionSink,
};
use crate::signer::{user_visible_signer_error, Signer, SignerError};
use crate::state::{
    AppState, AuthState, ChannelViewState, DirectoryView, PinnedChannelView, RelayView,
    SearchView, TimelineView,
};
use crate::updates::{AppUpdate, CoreMsg, InternalEvent};

use channel::{ChannelAction, ChannelState};
use config_store::{ConfigStore, MemoryStore, SettingsStore};
use directory::{Channel, ChannelSearch, ChannelsAction, ChannelsState};
use followee::{FollowList, FolloweeAction, FolloweeState};
use metadata::{
    build_bundled_metadata_content, build_channel_content, bundled_channel_ids,
    parse_channel_metadata, ChannelFields, ChannelMetadata, CHANNEL_URL_PREFIX,
};
use pins::PinTracker;
use profile::{MuxProfileSource, ProfileRequest, ProfileResolver, ProfileSource};
use session::{SearchSession, SubKey, Subscriptions};
use tags::{hex_pubkeys, is_hex_id};

/// Collaborators injected into the actor.
#[derive(Clone)]
pub struct Services {
    pub mux: Arc<dyn RelayMux>,
    pub signer: Arc<dyn Signer>,
    /// Defaults to kind 0 lookups over `mux`.
    pub profile_source: Option<Arc<dyn ProfileSource>>,
}

impl Services {
    pub fn new(mux: Arc<dyn RelayMux>, signer: Arc<dyn Signer>) -> Self {
        Self {
            mux,
            signer,
            profile_source: None,
        }
    }
}

/// Opens the on-disk settings database, falling back to memory so the app still starts.
pub(crate) fn open_settings_store(data_dir: &str) -> Box<dyn SettingsStore> {
    match settings_db::SettingsDb::open(data_dir) {
        Ok(db) => Box::new(db),
        Err(e) => {
            tracing::warn!(err = %format!("{e:#}"), "failed to open settings db; using memory");
            Box::new(MemoryStore::default())
        }
    }
}

pub struct AppCore {
    pub state: AppState,
    last_emitted: AppState,
    rev: u64,

    update_sender: Sender<AppUpdate>,
    core_sender: Sender<CoreMsg>,
    shared_state: Arc<RwLock<AppState>>,

    config: config::AppConfig,
    runtime: tokio::runtime::Runtime,

    mux: Arc<dyn RelayMux>,
    signer: Arc<dyn Signer>,
    profile_source: Arc<dyn ProfileSource>,
    store: ConfigStore,

    subs: Subscriptions,
    sidebar: ChannelsState,
    sidebar_loading: bool,
    search: Option<SearchSession>,
    channel: Option<ChannelState>,
    followee: FolloweeState,
    follow_list: FollowList,
    followee_authors: Vec<String>,
    pins: PinTracker,
    // Pinned ids the pin subscription was built for.
    pin_ids: Option<Vec<String>>,
    // Newest kind 41 authored by the signed-in user; the base for bundled edits.
    own_metadata: Option<Event>,
    profiles: ProfileResolver,

    publishes: HashMap<u64, publish::PendingPublish>,
    next_publish_id: u64,
}

impl AppCore {
    pub fn new(
        update_sender: Sender<AppUpdate>,
        core_sender: Sender<CoreMsg>,
        data_dir: String,
        shared_state: Arc<RwLock<AppState>>,
        services: Services,
    ) -> Self {
        let store = open_settings_store(&data_dir);
        Self::with_store(update_sender, core_sender, data_dir, shared_state, services, store)
    }

    pub fn with_store(
        update_sender: Sender<AppUpdate>,
        core_sender: Sender<CoreMsg>,
        data_dir: String,
        shared_state: Arc<RwLock<AppState>>,
        services: Services,
        store: Box<dyn SettingsStore>,
    ) -> Self {
        let config = config::load_app_config(&data_dir);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .enable_io()
            .build()
            .expect("tokio runtime");

        let store = ConfigStore::open(store);
        let warm = store.store().load_profiles();
        let profile_source = services.profile_source.unwrap_or_else(|| {
            Arc::new(MuxProfileSource::new(
                services.mux.clone(),
                config.profile_fetch_timeout(),
            ))
        });

        let mut this = Self {
            state: AppState::empty(),
            last_emitted: AppState::empty(),
            rev: 0,
            update_sender,
            core_sender,
            shared_state,
            config,
            runtime,
            mux: services.mux,
            signer: services.signer,
            profile_source,
            store,
            subs: Subscriptions::default(),
            sidebar: ChannelsState::default(),
            sidebar_loading: false,
            search: None,
            channel: None,
            followee: FolloweeState::default(),
            follow_list: FollowList::default(),
            followee_authors: Vec::new(),
            pins: PinTracker::default(),
            pin_ids: None,
            own_metadata: None,
            profiles: ProfileResolver::with_cache(warm),
            publishes: HashMap::new(),
            next_publish_id: 0,
        };

        // Ensure GarnetApp.state() has an immediately-available snapshot.
        this.sync_state();
        let snapshot = this.state.clone();
        this.commit_state_snapshot(&snapshot);
        this.last_emitted = snapshot;
        this
    }

    fn next_rev(&mut self) -> u64 {
        self.rev += 1;
        self.state.rev = self.rev;
        self.rev
    }

    fn commit_state_snapshot(&self, snapshot: &AppState) {
        match self.shared_state.write() {
            Ok(mut g) => *g = snapshot.clone(),
            Err(poison) => *poison.into_inner() = snapshot.clone(),
        }
    }

    fn emit_state(&mut self) {
        self.next_rev();
        let snapshot = self.state.clone();
        self.commit_state_snapshot(&snapshot);
        self.last_emitted = snapshot.clone();
        let _ = self.update_sender.send(AppUpdate::FullState(snapshot));
    }

    /// Project reducer state into the UI snapshot.
    fn sync_state(&mut self) {
        let config = self.store.config();

        self.state.auth = match self.store.pubkey() {
            Some(pubkey) => AuthState::SignedIn {
                pubkey: pubkey.to_string(),
                npub: PublicKey::from_hex(pubkey)
                    .ok()
                    .and_then(|pk| pk.to_bech32().ok())
                    .unwrap_or_else(|| pubkey.to_string()),
            },
            None => AuthState::SignedOut,
        };
        self.state.lang = config.lang;
        self.state.enable_ambient_timeline = config.enable_ambient_timeline;

        // Configured relays first, health from the mux; then anything the mux adds on its own.
        let mut live = self.mux.relays();
        let mut relays: Vec<RelayView> = self
            .config
            .relays()
            .into_iter()
            .map(|r| {
                let healthy = live
                    .iter()
                    .position(|info| info.url == r.url)
                    .map(|i| live.remove(i).healthy)
                    .unwrap_or(false);
                RelayView {
                    url: r.url,
                    read: r.read,
                    write: r.write,
                    healthy,
                }
            })
            .collect();
        relays.extend(live.into_iter().map(|r| RelayView {
            url: r.url,
            read: r.readable,
            write: r.writable,
            healthy: r.healthy,
        }));
        self.state.relays = relays;

        self.state.channels = DirectoryView {
            channels: self.sidebar.sorted(),
            loading: self.sidebar_loading,
        };
        self.state.search = self.search.as_ref().map(|s| SearchView {
            channel_id: s.query.channel_id.clone(),
            owner: s.query.owner.clone(),
            results: DirectoryView {
                channels: s.state.sorted(),
                loading: s.loading,
            },
        });

        let foreground = self.channel.as_ref().map(|c| c.channel_id.as_str());
        self.state.pinned = config
            .pin_channels
            .iter()
            .map(|pin| {
                let name = self
                    .sidebar
                    .get(&pin.id)
                    .or_else(|| {
                        self.channel
                            .as_ref()
                            .filter(|c| c.channel_id == pin.id)
                            .and_then(|c| c.channel.as_ref())
                    })
                    .and_then(|c| c.metadata.name().map(str::to_string));
                PinnedChannelView {
                    id: pin.id.clone(),
                    name,
                    last_read: pin.last_read,
                    unread: pins::is_unread(pin, self.pins.seen(&pin.id), foreground),
                }
            })
            .collect();

        self.state.current_channel = self.channel.as_ref().map(|c| ChannelViewState {
            channel_id: c.channel_id.clone(),
            status: c.status(),
            channel: c.channel.clone(),
            messages: c.sorted_messages.clone(),
            pinned: config.is_pinned(&c.channel_id),
        });

        self.state.timeline = TimelineView {
            notes: self.followee.sorted_notes.clone(),
            messages: self.followee.sorted_messages.clone(),
        };
        self.state.profiles = self.profiles.snapshot();
    }

    fn emit_if_changed(&mut self) {
        self.sync_state();
        self.state.rev = self.last_emitted.rev;
        if self.state != self.last_emitted {
            self.emit_state();
        }
    }

    fn toast(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        tracing::info!(msg = %msg, "toast");
        self.state.toast = Some(msg);
    }

    pub fn handle_message(&mut self, msg: CoreMsg) {
        match msg {
            CoreMsg::Action(action) => {
                // Never log `?action` directly: it can carry message content.
                tracing::info!(action = action.tag(), "dispatch");
                self.handle_action(action);
            }
            CoreMsg::Internal(internal) => self.handle_internal(*internal),
        }
        self.emit_if_changed();
    }

    fn handle_internal(&mut self, internal: InternalEvent) {
        match internal {
            InternalEvent::ReadyToSubscribe { key, generation } => {
                self.handle_ready_to_subscribe(key, generation)
            }
            InternalEvent::Subscription {
                key,
                generation,
                message,
            } => self.handle_subscription_message(key, generation, message),
            InternalEvent::DiscoveryWindowClosed { key, generation } => {
                self.handle_discovery_window_closed(key, generation)
            }
            InternalEvent::PublicKeyResolved { pubkey } => self.handle_public_key(pubkey),
            InternalEvent::SignInFailed { error } => {
                tracing::warn!(%error, "sign in failed");
                self.state.busy.signing_in = false;
                self.toast(user_visible_signer_error(&error));
            }
            InternalEvent::EventSigned {
                publish_id,
                intent,
                event,
            } => self.handle_event_signed(publish_id, intent, event),
            InternalEvent::SignFailed { publish_id, error } => {
                self.handle_sign_failed(publish_id, error)
            }
            InternalEvent::PublishReady {
                publish_id,
                connected,
            } => self.handle_publish_ready(publish_id, connected),
            InternalEvent::PublishProgress {
                publish_id,
                message,
            } => self.handle_publish_progress(publish_id, message),
            InternalEvent::ProfileFetched {
                epoch,
                pubkey,
                metadata,
            } => {
                if let Some(profile) = self.profiles.complete(epoch, &pubkey, metadata) {
                    self.store.store_mut().save_profile(&profile);
                }
            }
        }
    }

    fn handle_action(&mut self, action: AppAction) {
        match action {
            // Session
            AppAction::SignIn => {
                self.state.busy.signing_in = true;
                let signer = self.signer.clone();
                let tx = self.core_sender.clone();
                self.runtime.spawn(async move {
                    let msg = match signer.get_public_key().await {
                        Ok(pubkey) => InternalEvent::PublicKeyResolved { pubkey },
                        Err(error) => InternalEvent::SignInFailed { error },
                    };
                    let _ = tx.send(CoreMsg::Internal(Box::new(msg)));
                });
            }
            AppAction::SignOut => {
                if self.store.sign_out() {
                    tracing::info!("sign_out");
                    self.stop_session_subscriptions();
                    self.profiles.clear();
                    self.store.store_mut().clear_caches();
                }
            }

            // Directory
            AppAction::RefreshChannelList => self.open_sidebar(),
            AppAction::SearchChannels { channel_id, owner } => {
                self.open_search(ChannelSearch { channel_id, owner })
            }
            AppAction::CloseChannelSearch => self.close_search(),

            // Channel view
            AppAction::OpenChannel { channel_id } => self.open_channel(&channel_id),
            AppAction::CloseChannel => self.close_channel(),

            // Pins
            AppAction::PinChannel { channel_id } => {
                if self.store.pubkey().is_none() {
                    self.toast("Sign in to pin channels");
                    return;
                }
                let last_read = self
                    .channel
                    .as_ref()
                    .filter(|c| c.channel_id == channel_id)
                    .and_then(|c| c.sorted_messages.last())
                    .map(|m| m.created_at)
                    .unwrap_or_else(|| Timestamp::now().as_secs());
                if self.store.pin(&channel_id, last_read) {
                    self.recompute_pins();
                }
            }
            AppAction::UnpinChannel { channel_id } => {
                if self.store.unpin(&channel_id) {
                    self.recompute_pins();
                }
            }
            AppAction::MarkRead {
                channel_id,
                timestamp,
            } => {
                self.store.mark_read(&channel_id, timestamp);
            }

            // Preferences
            AppAction::SetLanguage { lang } => {
                self.store.set_lang(lang);
            }
            AppAction::SetAmbientTimeline { enabled } => {
                self.store.set_enable_ambient_timeline(enabled);
            }

            // Publishing
            AppAction::CreateChannel {
                name,
                about,
                picture,
            } => {
                let intent = self.create_channel_intent(name, about, picture);
                self.start_publish(intent);
            }
            AppAction::UpdateChannel {
                channel_id,
                name,
                about,
                picture,
            } => {
                let intent = self.update_channel_intent(&channel_id, name, about, picture);
                self.start_publish(intent);
            }
            AppAction::SendMessage {
                channel_id,
                content,
                as_note,
            } => {
                let intent = self.send_message_intent(&channel_id, content, as_note);
                self.start_publish(intent);
            }

            // Profiles
            AppAction::ResolveProfile { identifier } => self.request_profile(&identifier),
            AppAction::ForgetProfiles => self.profiles.reset(),

            // UI
            AppAction::ClearToast => {
                self.state.toast = None;
            }

            // Lifecycle
            AppAction::Foregrounded => {
                if !self.subs.is_open(SubKey::AllChannels) {
                    self.open_sidebar();
                }
                if self.store.pubkey().is_some() && !self.subs.is_open(SubKey::Contacts) {
                    self.start_session_subscriptions();
                }
            }
        }
    }

    fn handle_public_key(&mut self, pubkey: PublicKey) {
        self.state.busy.signing_in = false;
        let hex = pubkey.to_hex();
        if !self.store.sign_in(&hex) {
            return;
        }
        tracing::info!(pubkey = %hex, "sign_in");
        self.stop_session_subscriptions();
        self.profiles.reset();
        self.start_session_subscriptions();
    }

    pub(super) fn request_profile(&mut self, identifier: &str) {
        let ProfileRequest::Fetch(hex) = self.profiles.request(identifier) else {
            return;
        };
        let epoch = self.profiles.epoch();
        let Ok(pubkey) = PublicKey::from_hex(&hex) else {
            self.profiles.complete(epoch, &hex, None);
            return;
        };
        let source = self.profile_source.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let metadata = source.fetch(pubkey).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::ProfileFetched {
                epoch,
                pubkey: hex,
                metadata,
            })));
        });
    }
}
