//! Subscription lifecycle and session side effects.

use super::*;

/// One subscription slot per view. The id doubles as the relay-side subscription id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubKey {
    AllChannels,
    SearchChannels,
    Channel,
    Followee,
    PinChannelMessage,
    Contacts,
    OwnChannelMetadata,
}

impl SubKey {
    pub fn id(self) -> &'static str {
        match self {
            SubKey::AllChannels => "all_channels",
            SubKey::SearchChannels => "search_channels",
            SubKey::Channel => "channel",
            SubKey::Followee => "followee",
            SubKey::PinChannelMessage => "pin_channel_message",
            SubKey::Contacts => "contacts",
            SubKey::OwnChannelMetadata => "own_channel_metadata",
        }
    }
}

/// How a subscription is opened.
pub(super) struct SubscriptionPlan {
    pub health_wait: Duration,
    pub eose_timeout: Option<Duration>,
    pub flush_interval: Option<Duration>,
    /// Close the subscription after this long.
    pub window: Option<Duration>,
    pub recover: RecoverFn,
}

struct ActiveSubscription {
    generation: u64,
    filters: Vec<Filter>,
    plan: SubscriptionPlan,
    subscribed: bool,
    eose_seen: bool,
    timer: Option<tokio::task::JoinHandle<()>>,
}

#[derive(Default)]
pub(super) struct Subscriptions {
    next_generation: u64,
    active: HashMap<SubKey, ActiveSubscription>,
}

impl Subscriptions {
    pub fn is_open(&self, key: SubKey) -> bool {
        self.active.contains_key(&key)
    }

    fn current(&self, key: SubKey, generation: u64) -> bool {
        self.active
            .get(&key)
            .is_some_and(|s| s.generation == generation)
    }
}

/// A recovery callback that re-issues the original filters for a brand-new relay subscription
/// and nothing for a resumed one.
pub(super) fn reissue_when_new() -> RecoverFn {
    Arc::new(|original: &[Filter], is_new: bool| {
        directory::directory_recovery_filters(original, is_new)
    })
}

pub(super) fn reissue_always() -> RecoverFn {
    Arc::new(|original: &[Filter], _is_new: bool| original.to_vec())
}

/// Channel searches keep their own directory and discovery window.
pub(super) struct SearchSession {
    pub query: ChannelSearch,
    pub state: ChannelsState,
    pub loading: bool,
}

impl AppCore {
    /// Replace whatever `key` was subscribed to. Empty filters just close it.
    pub(super) fn open_subscription(
        &mut self,
        key: SubKey,
        filters: Vec<Filter>,
        plan: SubscriptionPlan,
    ) {
        self.close_subscription(key);
        if filters.is_empty() {
            return;
        }

        self.subs.next_generation = self.subs.next_generation.wrapping_add(1);
        let generation = self.subs.next_generation;
        let health_wait = plan.health_wait;
        self.subs.active.insert(
            key,
            ActiveSubscription {
                generation,
                filters,
                plan,
                subscribed: false,
                eose_seen: false,
                timer: None,
            },
        );

        let mux = self.mux.clone();
        let tx = self.core_sender.clone();
        let quorum = health_quorum(mux.as_ref());
        self.runtime.spawn(async move {
            let healthy = mux.wait_until_healthy(quorum, health_wait).await;
            if !healthy {
                tracing::debug!(sub = key.id(), "relay quorum not reached; subscribing anyway");
            }
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::ReadyToSubscribe { key, generation },
            )));
        });
    }

    pub(super) fn close_subscription(&mut self, key: SubKey) {
        let Some(active) = self.subs.active.remove(&key) else {
            return;
        };
        if let Some(timer) = active.timer {
            timer.abort();
        }
        if active.subscribed {
            tracing::debug!(sub = key.id(), "unsubscribe");
            self.mux.unsubscribe(key.id());
        }
    }

    pub(super) fn handle_ready_to_subscribe(&mut self, key: SubKey, generation: u64) {
        let Some(active) = self.subs.active.get_mut(&key) else {
            return;
        };
        if active.generation != generation || active.subscribed {
            return;
        }

        let tx = self.core_sender.clone();
        let sink = SubscriptionSink::new(move |message| {
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::Subscription {
                key,
                generation,
                message,
            })));
        });
        let request = SubscribeRequest {
            id: key.id().to_string(),
            filters: active.filters.clone(),
            eose_timeout: active.plan.eose_timeout,
            flush_interval: active.plan.flush_interval,
            on_recovered: active.plan.recover.clone(),
            sink,
        };
        active.subscribed = true;

        if let Some(window) = active.plan.window {
            let tx = self.core_sender.clone();
            active.timer = Some(self.runtime.spawn(async move {
                tokio::time::sleep(window).await;
                let _ = tx.send(CoreMsg::Internal(Box::new(
                    InternalEvent::DiscoveryWindowClosed { key, generation },
                )));
            }));
        }

        tracing::info!(sub = key.id(), filters = request.filters.len(), "subscribe");
        self.mux.subscribe(request);
    }

    pub(super) fn handle_discovery_window_closed(&mut self, key: SubKey, generation: u64) {
        if !self.subs.current(key, generation) {
            return;
        }
        self.close_subscription(key);
        match key {
            SubKey::AllChannels => {
                self.sidebar.reduce(ChannelsAction::Unsub);
                self.sidebar_loading = false;
            }
            SubKey::SearchChannels => {
                if let Some(search) = self.search.as_mut() {
                    search.state.reduce(ChannelsAction::Unsub);
                    search.loading = false;
                }
            }
            _ => {}
        }
    }

    pub(super) fn handle_subscription_message(
        &mut self,
        key: SubKey,
        generation: u64,
        message: SubscriptionMessage,
    ) {
        if !self.subs.current(key, generation) {
            tracing::debug!(sub = key.id(), generation, "dropping stale delivery");
            return;
        }
        match message {
            SubscriptionMessage::Eose => self.handle_eose(key),
            SubscriptionMessage::Events(batch) => self.handle_events(key, batch),
        }
    }

    fn handle_eose(&mut self, key: SubKey) {
        let Some(active) = self.subs.active.get_mut(&key) else {
            return;
        };
        if active.eose_seen {
            return;
        }
        active.eose_seen = true;
        if key == SubKey::Channel {
            if let Some(channel) = self.channel.as_mut() {
                channel.reduce(ChannelAction::InitialLoaded);
            }
        }
    }

    fn handle_events(&mut self, key: SubKey, batch: Vec<ReceivedEvent>) {
        match key {
            SubKey::AllChannels => {
                for received in batch {
                    self.sidebar.reduce(ChannelsAction::ReceivedEvent(received));
                }
            }
            SubKey::SearchChannels => {
                if let Some(search) = self.search.as_mut() {
                    for received in batch {
                        search.state.reduce(ChannelsAction::ReceivedEvent(received));
                    }
                }
            }
            SubKey::Channel => self.handle_channel_batch(batch),
            SubKey::Followee => {
                let events = batch.into_iter().map(|r| r.event).collect();
                self.followee.receive_batch(events);
            }
            SubKey::PinChannelMessage => {
                let events: Vec<Event> = batch.into_iter().map(|r| r.event).collect();
                let pins = self.store.config().pin_channels.clone();
                self.pins.receive(&pins, &events);
            }
            SubKey::Contacts => {
                let mut changed = false;
                for received in &batch {
                    changed |= self.follow_list.receive_contacts(&received.event);
                }
                if self.follow_list.loaded {
                    let follows = self.follow_list.follows.clone();
                    self.store.store_mut().save_follows(&follows);
                }
                if changed {
                    self.recompute_followee();
                }
            }
            SubKey::OwnChannelMetadata => {
                let me = self.store.pubkey().map(str::to_string);
                for received in batch {
                    let event = received.event;
                    if event.kind != Kind::ChannelMetadata
                        || Some(event.pubkey.to_hex()) != me
                    {
                        continue;
                    }
                    let newer = self
                        .own_metadata
                        .as_ref()
                        .is_none_or(|current| current.created_at < event.created_at);
                    if newer {
                        self.own_metadata = Some(event);
                    }
                }
            }
        }
    }

    fn handle_channel_batch(&mut self, batch: Vec<ReceivedEvent>) {
        let Some(channel) = self.channel.as_mut() else {
            return;
        };
        let authors: Vec<String> = batch
            .iter()
            .filter(|r| r.event.kind == Kind::ChannelMessage)
            .map(|r| r.event.pubkey.to_hex())
            .collect();
        let (_, newest) = channel.receive_batch(batch);
        let channel_id = channel.channel_id.clone();

        // Viewing a pinned channel reads it.
        if let Some(newest) = newest {
            if self.store.config().is_pinned(&channel_id) {
                self.store.mark_read(&channel_id, newest);
            }
        }
        for author in authors {
            self.request_profile(&author);
        }
    }

    // ── Sidebar + search ─────────────────────────────────────────────

    pub(super) fn open_sidebar(&mut self) {
        self.sidebar.reduce(ChannelsAction::Reload);
        self.sidebar_loading = true;
        let filters = directory::sidebar_filters(Timestamp::now(), self.config.directory_limit());
        let plan = self.directory_plan();
        self.open_subscription(SubKey::AllChannels, filters, plan);
    }

    pub(super) fn open_search(&mut self, query: ChannelSearch) {
        let filters =
            directory::search_filters(&query, Timestamp::now(), self.config.directory_limit());
        let loading = !filters.is_empty();
        self.search = Some(SearchSession {
            query,
            state: ChannelsState::default(),
            loading,
        });
        let plan = self.directory_plan();
        self.open_subscription(SubKey::SearchChannels, filters, plan);
    }

    pub(super) fn close_search(&mut self) {
        self.close_subscription(SubKey::SearchChannels);
        self.search = None;
    }

    fn directory_plan(&self) -> SubscriptionPlan {
        SubscriptionPlan {
            health_wait: self.config.directory_health_wait(),
            eose_timeout: Some(self.config.directory_eose_timeout()),
            flush_interval: Some(self.config.flush_interval()),
            window: Some(self.config.discovery_window()),
            recover: reissue_when_new(),
        }
    }

    // ── Channel view ─────────────────────────────────────────────────

    pub(super) fn open_channel(&mut self, channel_id: &str) {
        let channel_id = channel_id.trim().to_string();
        match self.channel.as_mut() {
            Some(current) => {
                current.reduce(ChannelAction::ChangeChannel(channel_id.clone()));
            }
            None => self.channel = Some(ChannelState::new(channel_id.clone())),
        }

        let backlog = self.config.channel_backlog();
        let filters = channel::full_filters(&channel_id, Timestamp::now(), backlog);
        if filters.is_empty() {
            tracing::debug!(channel_id = %channel_id, "channel id is not an event id");
            self.close_subscription(SubKey::Channel);
            if let Some(channel) = self.channel.as_mut() {
                channel.reduce(ChannelAction::NotFound);
            }
            return;
        }

        let id_for_recovery = channel_id.clone();
        let plan = SubscriptionPlan {
            health_wait: self.config.channel_health_wait(),
            eose_timeout: Some(self.config.channel_eose_timeout()),
            flush_interval: Some(self.config.flush_interval()),
            window: None,
            recover: Arc::new(move |_original: &[Filter], is_new: bool| {
                channel::channel_recovery_filters(
                    &id_for_recovery,
                    is_new,
                    Timestamp::now(),
                    backlog,
                )
            }),
        };
        self.open_subscription(SubKey::Channel, filters, plan);
    }

    pub(super) fn close_channel(&mut self) {
        self.close_subscription(SubKey::Channel);
        self.channel = None;
    }

    // ── Signed-in session ────────────────────────────────────────────

    pub(super) fn start_session_subscriptions(&mut self) {
        let Some(me) = self.store.pubkey().map(str::to_string) else {
            return;
        };
        let Ok(pubkey) = PublicKey::from_hex(&me) else {
            tracing::warn!(pubkey = %me, "stored identity is not a valid key");
            return;
        };
        tracing::info!(pubkey = %me, "start_session_subscriptions");

        let cached = self.store.store().load_follows();
        self.follow_list = FollowList::new(me, cached);
        self.followee_authors.clear();
        self.own_metadata = None;

        let plan = SubscriptionPlan {
            health_wait: self.config.directory_health_wait(),
            eose_timeout: Some(self.config.directory_eose_timeout()),
            flush_interval: None,
            window: None,
            recover: reissue_always(),
        };
        self.open_subscription(SubKey::Contacts, followee::contacts_filters(pubkey), plan);

        let own_filters = vec![Filter::new()
            .kind(Kind::ChannelMetadata)
            .author(pubkey)
            .limit(1)];
        let plan = SubscriptionPlan {
            health_wait: self.config.directory_health_wait(),
            eose_timeout: Some(self.config.directory_eose_timeout()),
            flush_interval: None,
            window: None,
            recover: reissue_always(),
        };
        self.open_subscription(SubKey::OwnChannelMetadata, own_filters, plan);

        self.recompute_followee();
        self.pin_ids = None;
        self.recompute_pins();
    }

    pub(super) fn stop_session_subscriptions(&mut self) {
        for key in [
            SubKey::Contacts,
            SubKey::OwnChannelMetadata,
            SubKey::Followee,
            SubKey::PinChannelMessage,
        ] {
            self.close_subscription(key);
        }
        self.followee.reduce(FolloweeAction::SignedOut);
        self.follow_list = FollowList::default();
        self.followee_authors.clear();
        self.pins = PinTracker::default();
        self.pin_ids = None;
        self.own_metadata = None;
    }

    /// Re-subscribe the timeline when the set of followed authors changes.
    pub(super) fn recompute_followee(&mut self) {
        let authors = self.follow_list.authors();
        if authors == self.followee_authors && self.subs.is_open(SubKey::Followee) {
            return;
        }
        self.followee_authors = authors.clone();
        let pubkeys = hex_pubkeys(&authors);
        let backlog = self.config.timeline_backlog();
        let filters = followee::timeline_filters(&pubkeys, Timestamp::now(), backlog);
        let plan = SubscriptionPlan {
            health_wait: self.config.directory_health_wait(),
            eose_timeout: Some(self.config.directory_eose_timeout()),
            flush_interval: Some(self.config.timeline_flush_interval()),
            window: None,
            recover: Arc::new(move |_original: &[Filter], _is_new: bool| {
                followee::timeline_recovery_filters(&pubkeys, Timestamp::now())
            }),
        };
        self.open_subscription(SubKey::Followee, filters, plan);
    }

    /// Re-subscribe pin tracking when the set of pinned ids changes. Read-mark moves alone do
    /// not re-subscribe.
    pub(super) fn recompute_pins(&mut self) {
        if self.store.pubkey().is_none() {
            return;
        }
        let pins = self.store.config().pin_channels.clone();
        let ids: Vec<String> = pins.iter().map(|p| p.id.clone()).collect();
        if self.pin_ids.as_ref() == Some(&ids) {
            return;
        }
        self.pin_ids = Some(ids);
        self.pins.set_pins(&pins);

        let filters = pins::pin_filters(&pins, Timestamp::now());
        let plan = SubscriptionPlan {
            health_wait: self.config.pins_health_wait(),
            eose_timeout: Some(self.config.channel_eose_timeout()),
            flush_interval: Some(self.config.flush_interval()),
            window: None,
            recover: Arc::new(move |_original: &[Filter], _is_new: bool| {
                pins::pin_recovery_filters(&pins, Timestamp::now())
            }),
        };
        self.open_subscription(SubKey::PinChannelMessage, filters, plan);
    }
}
