//! Contract with the relay multiplexer.
//!
//! The multiplexer owns relay connections, raw framing and the subscription registry. The core
//! only hands it filters plus a sink, and gets batches of events, end-of-stored-events signals
//! and publish acknowledgements back through that sink.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use nostr_sdk::prelude::{Event, Filter};

/// An event together with the relay that delivered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedEvent {
    pub relay_url: String,
    pub event: Event,
}

impl ReceivedEvent {
    pub fn new(relay_url: impl Into<String>, event: Event) -> Self {
        Self {
            relay_url: relay_url.into(),
            event,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionMessage {
    Events(Vec<ReceivedEvent>),
    Eose,
}

/// Where a subscription delivers. Cheap to clone; the multiplexer may call it from any thread.
#[derive(Clone)]
pub struct SubscriptionSink {
    deliver: Arc<dyn Fn(SubscriptionMessage) + Send + Sync>,
}

impl SubscriptionSink {
    pub fn new(deliver: impl Fn(SubscriptionMessage) + Send + Sync + 'static) -> Self {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    pub fn events(&self, batch: Vec<ReceivedEvent>) {
        if batch.is_empty() {
            return;
        }
        (self.deliver)(SubscriptionMessage::Events(batch));
    }

    pub fn eose(&self) {
        (self.deliver)(SubscriptionMessage::Eose);
    }
}

impl fmt::Debug for SubscriptionSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SubscriptionSink")
    }
}

/// Called by the multiplexer after a relay reconnects. Receives the filters that were active and
/// whether the relay-side subscription is brand new; returns the filters to issue instead.
pub type RecoverFn = Arc<dyn Fn(&[Filter], bool) -> Vec<Filter> + Send + Sync>;

#[derive(Clone)]
pub struct SubscribeRequest {
    pub id: String,
    pub filters: Vec<Filter>,
    pub eose_timeout: Option<Duration>,
    /// Batch deliveries for this long before flushing them to the sink.
    pub flush_interval: Option<Duration>,
    pub on_recovered: RecoverFn,
    pub sink: SubscriptionSink,
}

impl SubscribeRequest {
    pub fn recovery_filters(&self, is_new_subscription: bool) -> Vec<Filter> {
        (self.on_recovered)(&self.filters, is_new_subscription)
    }
}

impl fmt::Debug for SubscribeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeRequest")
            .field("id", &self.id)
            .field("filters", &self.filters)
            .field("eose_timeout", &self.eose_timeout)
            .field("flush_interval", &self.flush_interval)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOptions {
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishMessage {
    /// One relay's `OK` answer.
    Result {
        relay_url: String,
        accepted: bool,
        message: String,
    },
    /// Every relay answered or the timeout elapsed.
    Complete,
}

#[derive(Clone)]
pub struct PublishSink {
    deliver: Arc<dyn Fn(PublishMessage) + Send + Sync>,
}

impl PublishSink {
    pub fn new(deliver: impl Fn(PublishMessage) + Send + Sync + 'static) -> Self {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    pub fn result(&self, relay_url: impl Into<String>, accepted: bool, message: impl Into<String>) {
        (self.deliver)(PublishMessage::Result {
            relay_url: relay_url.into(),
            accepted,
            message: message.into(),
        });
    }

    pub fn complete(&self) {
        (self.deliver)(PublishMessage::Complete);
    }
}

impl fmt::Debug for PublishSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PublishSink")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayInfo {
    pub url: String,
    pub readable: bool,
    pub writable: bool,
    pub healthy: bool,
}

/// Process-wide relay multiplexer shared by every reducer.
///
/// Each caller uses its own subscription id and pairs its own subscribe/unsubscribe calls; the
/// multiplexer arbitrates no ordering between independent subscriptions.
pub trait RelayMux: Send + Sync + 'static {
    fn relays(&self) -> Vec<RelayInfo>;

    fn healthy_relay_count(&self) -> usize {
        self.relays().iter().filter(|r| r.healthy).count()
    }

    /// Resolves `true` once at least `min_relays` relays are healthy, or `false` on timeout.
    fn wait_until_healthy(&self, min_relays: usize, timeout: Duration) -> BoxFuture<'static, bool>;

    /// Replaces any existing subscription with the same id.
    fn subscribe(&self, request: SubscribeRequest);

    fn unsubscribe(&self, id: &str);

    fn publish(&self, event: Event, options: PublishOptions, sink: PublishSink);
}

/// Half of the known relays, rounded up: the quorum views wait for before subscribing.
pub fn health_quorum(mux: &dyn RelayMux) -> usize {
    mux.relays().len().div_ceil(2)
}
