//! In-process doubles for the relay multiplexer, the signer and profile lookups.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use nostr_sdk::prelude::{Event, Filter, Metadata, PublicKey, UnsignedEvent};

use crate::core::profile::ProfileSource;
use crate::mux::{
    PublishOptions, PublishSink, ReceivedEvent, RelayInfo, RelayMux, SubscribeRequest,
    SubscriptionSink,
};
use crate::signer::{Signer, SignerError};

#[derive(Default)]
struct Recorded {
    active: HashMap<String, SubscribeRequest>,
    subscribes: HashMap<String, usize>,
    unsubscribes: HashMap<String, usize>,
    published: Vec<(Event, PublishSink, bool)>,
}

/// A multiplexer that records calls and lets tests push events through the registered sinks.
pub struct RecordingMux {
    relays: Vec<String>,
    connected: AtomicBool,
    recorded: Mutex<Recorded>,
}

impl RecordingMux {
    pub fn new(relays: Vec<String>) -> Self {
        Self {
            relays,
            connected: AtomicBool::new(true),
            recorded: Mutex::new(Recorded::default()),
        }
    }

    pub fn with_default_relays() -> Self {
        Self::new(garnet_relay_profiles::default_relay_urls())
    }

    fn recorded(&self) -> MutexGuard<'_, Recorded> {
        match self.recorded.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn is_subscribed(&self, id: &str) -> bool {
        self.recorded().active.contains_key(id)
    }

    pub fn subscribe_count(&self, id: &str) -> usize {
        self.recorded().subscribes.get(id).copied().unwrap_or(0)
    }

    pub fn unsubscribe_count(&self, id: &str) -> usize {
        self.recorded().unsubscribes.get(id).copied().unwrap_or(0)
    }

    pub fn filters(&self, id: &str) -> Option<Vec<Filter>> {
        self.recorded().active.get(id).map(|r| r.filters.clone())
    }

    pub fn sink(&self, id: &str) -> Option<SubscriptionSink> {
        self.recorded().active.get(id).map(|r| r.sink.clone())
    }

    /// What the subscription would re-issue after a reconnect.
    pub fn recovery_filters(&self, id: &str, is_new_subscription: bool) -> Option<Vec<Filter>> {
        let request = self.recorded().active.get(id).cloned()?;
        Some(request.recovery_filters(is_new_subscription))
    }

    /// Deliver `events` as if the first relay sent them. Returns false if `id` is not active.
    pub fn deliver(&self, id: &str, events: Vec<Event>) -> bool {
        let relay = self.relays.first().cloned().unwrap_or_default();
        self.deliver_from(id, &relay, events)
    }

    pub fn deliver_from(&self, id: &str, relay_url: &str, events: Vec<Event>) -> bool {
        let Some(sink) = self.sink(id) else {
            return false;
        };
        sink.events(
            events
                .into_iter()
                .map(|e| ReceivedEvent::new(relay_url, e))
                .collect(),
        );
        true
    }

    pub fn eose(&self, id: &str) -> bool {
        let Some(sink) = self.sink(id) else {
            return false;
        };
        sink.eose();
        true
    }

    pub fn published(&self) -> Vec<Event> {
        self.recorded()
            .published
            .iter()
            .map(|(e, _, _)| e.clone())
            .collect()
    }

    /// Answer every unanswered publish from every relay, then complete it.
    pub fn ack_all(&self, accepted: bool) {
        let pending: Vec<PublishSink> = {
            let mut recorded = self.recorded();
            recorded
                .published
                .iter_mut()
                .filter(|(_, _, answered)| !*answered)
                .map(|(_, sink, answered)| {
                    *answered = true;
                    sink.clone()
                })
                .collect()
        };
        let message = if accepted { "" } else { "blocked: test" };
        for sink in pending {
            for relay in &self.relays {
                sink.result(relay.clone(), accepted, message);
            }
            sink.complete();
        }
    }
}

impl RelayMux for RecordingMux {
    fn relays(&self) -> Vec<RelayInfo> {
        let healthy = self.connected.load(Ordering::SeqCst);
        self.relays
            .iter()
            .map(|url| RelayInfo {
                url: url.clone(),
                readable: true,
                writable: true,
                healthy,
            })
            .collect()
    }

    fn wait_until_healthy(&self, min_relays: usize, _timeout: Duration) -> BoxFuture<'static, bool> {
        let ready = self.healthy_relay_count() >= min_relays;
        futures::future::ready(ready).boxed()
    }

    fn subscribe(&self, request: SubscribeRequest) {
        let mut recorded = self.recorded();
        *recorded.subscribes.entry(request.id.clone()).or_default() += 1;
        recorded.active.insert(request.id.clone(), request);
    }

    fn unsubscribe(&self, id: &str) {
        let mut recorded = self.recorded();
        if recorded.active.remove(id).is_some() {
            *recorded.unsubscribes.entry(id.to_string()).or_default() += 1;
        }
    }

    fn publish(&self, event: Event, _options: PublishOptions, sink: PublishSink) {
        self.recorded().published.push((event, sink, false));
    }
}

/// Profile lookups answered from a fixed table.
#[derive(Default, Clone)]
pub struct StaticProfileSource {
    profiles: Arc<Mutex<HashMap<PublicKey, Metadata>>>,
}

impl StaticProfileSource {
    pub fn insert(&self, pubkey: PublicKey, metadata: Metadata) {
        if let Ok(mut g) = self.profiles.lock() {
            g.insert(pubkey, metadata);
        }
    }
}

impl ProfileSource for StaticProfileSource {
    fn fetch(&self, pubkey: PublicKey) -> BoxFuture<'static, Option<Metadata>> {
        let found = self
            .profiles
            .lock()
            .ok()
            .and_then(|g| g.get(&pubkey).cloned());
        futures::future::ready(found).boxed()
    }
}

/// A host without any signer installed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSigner;

impl Signer for NoSigner {
    fn get_public_key(&self) -> BoxFuture<'static, Result<PublicKey, SignerError>> {
        futures::future::ready(Err(SignerError::Unavailable)).boxed()
    }

    fn sign_event(&self, _unsigned: UnsignedEvent) -> BoxFuture<'static, Result<Event, SignerError>> {
        futures::future::ready(Err(SignerError::Unavailable)).boxed()
    }
}
