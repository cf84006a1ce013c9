//! Profile lookup by hex or `npub`, memoized per identifier.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use nostr_sdk::prelude::*;
use serde::{Deserialize, Serialize};

use super::tags::normalize_pubkey;
use crate::mux::{RelayMux, SubscribeRequest, SubscriptionMessage, SubscriptionSink};

pub const DEFAULT_PROFILE_NAME: &str = "GEMSTONE";
pub const DEFAULT_ICON_URL: &str = "/default-icon.png";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Empty for the not-found sentinel.
    pub pubkey: String,
    pub name: String,
    pub about: Option<String>,
    pub icon_url: String,
    pub not_found: bool,
}

impl Profile {
    pub fn not_found() -> Self {
        Self {
            pubkey: String::new(),
            name: DEFAULT_PROFILE_NAME.to_string(),
            about: None,
            icon_url: DEFAULT_ICON_URL.to_string(),
            not_found: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ProfileLookup {
    Pending,
    Ready(Profile),
}

fn is_displayable_icon(picture: &str) -> bool {
    match url::Url::parse(picture) {
        Ok(url) => match url.scheme() {
            "http" | "https" => true,
            "data" => url.path().starts_with("image/"),
            _ => false,
        },
        Err(_) => false,
    }
}

pub fn profile_from_metadata(pubkey_hex: &str, metadata: &Metadata) -> Profile {
    let non_empty = |v: &Option<String>| v.as_deref().filter(|s| !s.is_empty()).map(str::to_string);
    let name = non_empty(&metadata.display_name)
        .or_else(|| non_empty(&metadata.name))
        .unwrap_or_else(|| DEFAULT_PROFILE_NAME.to_string());
    let icon_url = non_empty(&metadata.picture)
        .filter(|p| is_displayable_icon(p))
        .unwrap_or_else(|| DEFAULT_ICON_URL.to_string());
    Profile {
        pubkey: pubkey_hex.to_string(),
        name,
        about: metadata.about.clone(),
        icon_url,
        not_found: false,
    }
}

/// What the caller must do after [`ProfileResolver::request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileRequest {
    /// Nothing: the answer is known or a fetch is already running.
    Settled,
    Fetch(String),
}

#[derive(Debug, Default)]
pub struct ProfileResolver {
    epoch: u64,
    /// identifier -> hex, or `None` when the identifier cannot name a key.
    identifiers: HashMap<String, Option<String>>,
    resolved: HashMap<String, Profile>,
    in_flight: HashSet<String>,
    /// Profiles loaded from disk; shown immediately, refreshed once.
    warm: HashMap<String, Profile>,
}

impl ProfileResolver {
    pub fn with_cache(warm: HashMap<String, Profile>) -> Self {
        Self {
            warm,
            ..Default::default()
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn request(&mut self, identifier: &str) -> ProfileRequest {
        let identifier = identifier.trim();
        if self.identifiers.contains_key(identifier) {
            return ProfileRequest::Settled;
        }
        let hex = normalize_pubkey(identifier);
        self.identifiers.insert(identifier.to_string(), hex.clone());
        let Some(hex) = hex else {
            tracing::debug!(identifier, "profile identifier is not a public key");
            return ProfileRequest::Settled;
        };
        if self.resolved.contains_key(&hex) || !self.in_flight.insert(hex.clone()) {
            return ProfileRequest::Settled;
        }
        ProfileRequest::Fetch(hex)
    }

    /// Record a fetch result. Returns the profile to persist, if any. Results from before the
    /// last reset are dropped.
    pub fn complete(
        &mut self,
        epoch: u64,
        pubkey_hex: &str,
        metadata: Option<Metadata>,
    ) -> Option<Profile> {
        if epoch != self.epoch {
            tracing::debug!(pubkey = pubkey_hex, "dropping stale profile result");
            return None;
        }
        self.in_flight.remove(pubkey_hex);
        match metadata {
            Some(metadata) => {
                let profile = profile_from_metadata(pubkey_hex, &metadata);
                self.warm.insert(pubkey_hex.to_string(), profile.clone());
                self.resolved.insert(pubkey_hex.to_string(), profile.clone());
                Some(profile)
            }
            None => {
                let profile = self
                    .warm
                    .get(pubkey_hex)
                    .cloned()
                    .unwrap_or_else(Profile::not_found);
                self.resolved.insert(pubkey_hex.to_string(), profile);
                None
            }
        }
    }

    pub fn lookup(&self, identifier: &str) -> Option<ProfileLookup> {
        let hex = self.identifiers.get(identifier.trim())?;
        let Some(hex) = hex else {
            return Some(ProfileLookup::Ready(Profile::not_found()));
        };
        if let Some(profile) = self.resolved.get(hex) {
            return Some(ProfileLookup::Ready(profile.clone()));
        }
        if let Some(profile) = self.warm.get(hex) {
            return Some(ProfileLookup::Ready(profile.clone()));
        }
        Some(ProfileLookup::Pending)
    }

    pub fn snapshot(&self) -> HashMap<String, ProfileLookup> {
        self.identifiers
            .keys()
            .filter_map(|id| self.lookup(id).map(|l| (id.clone(), l)))
            .collect()
    }

    /// Forget every lookup; in-flight results will be ignored.
    pub fn reset(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        self.identifiers.clear();
        self.resolved.clear();
        self.in_flight.clear();
    }

    /// [`ProfileResolver::reset`] plus dropping the on-disk warm set.
    pub fn clear(&mut self) {
        self.reset();
        self.warm.clear();
    }
}

/// Fetches kind 0 metadata for a key. `None` means no record was found.
pub trait ProfileSource: Send + Sync + 'static {
    fn fetch(&self, pubkey: PublicKey) -> BoxFuture<'static, Option<Metadata>>;
}

/// [`ProfileSource`] backed by a one-shot subscription on the shared multiplexer.
pub struct MuxProfileSource {
    mux: Arc<dyn RelayMux>,
    timeout: Duration,
    seq: AtomicU64,
}

impl MuxProfileSource {
    pub fn new(mux: Arc<dyn RelayMux>, timeout: Duration) -> Self {
        Self {
            mux,
            timeout,
            seq: AtomicU64::new(0),
        }
    }
}

impl ProfileSource for MuxProfileSource {
    fn fetch(&self, pubkey: PublicKey) -> BoxFuture<'static, Option<Metadata>> {
        let mux = self.mux.clone();
        let timeout = self.timeout;
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let id = format!("profile:{}:{seq}", pubkey.to_hex());
        async move {
            let (tx, rx) = flume::unbounded::<SubscriptionMessage>();
            let filters = vec![Filter::new().kind(Kind::Metadata).author(pubkey).limit(1)];
            mux.subscribe(SubscribeRequest {
                id: id.clone(),
                filters,
                eose_timeout: Some(timeout),
                flush_interval: None,
                on_recovered: Arc::new(|original: &[Filter], _is_new: bool| original.to_vec()),
                sink: SubscriptionSink::new(move |msg| {
                    let _ = tx.send(msg);
                }),
            });

            let mut newest: Option<Event> = None;
            let collect = async {
                while let Ok(msg) = rx.recv_async().await {
                    match msg {
                        SubscriptionMessage::Events(batch) => {
                            for received in batch {
                                let event = received.event;
                                if event.kind != Kind::Metadata || event.pubkey != pubkey {
                                    continue;
                                }
                                if newest
                                    .as_ref()
                                    .is_none_or(|n| n.created_at < event.created_at)
                                {
                                    newest = Some(event);
                                }
                            }
                        }
                        SubscriptionMessage::Eose => break,
                    }
                }
            };
            if tokio::time::timeout(timeout, collect).await.is_err() {
                tracing::debug!(pubkey = %pubkey.to_hex(), "profile fetch timed out");
            }
            mux.unsubscribe(&id);

            let event = newest?;
            match Metadata::from_json(&event.content) {
                Ok(metadata) => Some(metadata),
                Err(e) => {
                    tracing::debug!(%e, pubkey = %pubkey.to_hex(), "unparseable profile metadata");
                    None
                }
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(json: &str) -> Metadata {
        Metadata::from_json(json).expect("metadata json")
    }

    #[test]
    fn display_name_wins_then_name_then_default() {
        let pk = "ab".repeat(32);
        let p = profile_from_metadata(&pk, &metadata(r#"{"display_name":"Disp","name":"nm"}"#));
        assert_eq!(p.name, "Disp");
        let p = profile_from_metadata(&pk, &metadata(r#"{"display_name":"","name":"nm"}"#));
        assert_eq!(p.name, "nm");
        let p = profile_from_metadata(&pk, &metadata(r#"{"about":"a"}"#));
        assert_eq!(p.name, DEFAULT_PROFILE_NAME);
        assert_eq!(p.about.as_deref(), Some("a"));
        assert!(!p.not_found);
    }

    #[test]
    fn icon_must_be_web_or_inline_image() {
        let pk = "ab".repeat(32);
        for (picture, expected) in [
            ("https://x.test/a.png", "https://x.test/a.png"),
            ("http://x.test/a.png", "http://x.test/a.png"),
            ("data:image/png;base64,AAAA", "data:image/png;base64,AAAA"),
            ("data:text/html,hi", DEFAULT_ICON_URL),
            ("javascript:alert(1)", DEFAULT_ICON_URL),
            ("not a url", DEFAULT_ICON_URL),
        ] {
            let json = serde_json::json!({ "picture": picture }).to_string();
            let p = profile_from_metadata(&pk, &metadata(&json));
            assert_eq!(p.icon_url, expected, "picture {picture}");
        }
    }

    #[test]
    fn invalid_identifier_is_not_found_without_fetch() {
        let mut resolver = ProfileResolver::default();
        assert_eq!(resolver.request("not-a-key"), ProfileRequest::Settled);
        assert_eq!(
            resolver.lookup("not-a-key"),
            Some(ProfileLookup::Ready(Profile::not_found()))
        );
        let nsec = Keys::generate().secret_key().to_bech32().unwrap();
        assert_eq!(resolver.request(&nsec), ProfileRequest::Settled);
    }

    #[test]
    fn npub_and_hex_share_one_fetch() {
        let keys = Keys::generate();
        let hex = keys.public_key().to_hex();
        let npub = keys.public_key().to_bech32().unwrap();
        let mut resolver = ProfileResolver::default();

        assert_eq!(resolver.request(&npub), ProfileRequest::Fetch(hex.clone()));
        assert_eq!(resolver.request(&hex), ProfileRequest::Settled);
        assert_eq!(resolver.request(&npub), ProfileRequest::Settled);
        assert_eq!(resolver.lookup(&hex), Some(ProfileLookup::Pending));

        let saved = resolver.complete(resolver.epoch(), &hex, Some(metadata(r#"{"name":"al"}"#)));
        assert_eq!(saved.as_ref().map(|p| p.name.as_str()), Some("al"));
        match resolver.lookup(&npub) {
            Some(ProfileLookup::Ready(p)) => assert_eq!(p.pubkey, hex),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_record_caches_sentinel() {
        let hex = Keys::generate().public_key().to_hex();
        let mut resolver = ProfileResolver::default();
        resolver.request(&hex);
        assert_eq!(resolver.complete(resolver.epoch(), &hex, None), None);
        assert_eq!(
            resolver.lookup(&hex),
            Some(ProfileLookup::Ready(Profile::not_found()))
        );
    }

    #[test]
    fn reset_drops_late_results() {
        let hex = Keys::generate().public_key().to_hex();
        let mut resolver = ProfileResolver::default();
        resolver.request(&hex);
        let stale = resolver.epoch();
        resolver.reset();
        assert_eq!(resolver.complete(stale, &hex, Some(metadata(r#"{"name":"x"}"#))), None);
        assert_eq!(resolver.lookup(&hex), None);
        assert_eq!(resolver.request(&hex), ProfileRequest::Fetch(hex.clone()));
    }

    #[test]
    fn warm_cache_answers_while_refreshing() {
        let hex = Keys::generate().public_key().to_hex();
        let cached = profile_from_metadata(&hex, &metadata(r#"{"name":"cached"}"#));
        let mut resolver = ProfileResolver::with_cache(HashMap::from([(hex.clone(), cached.clone())]));

        assert_eq!(resolver.request(&hex), ProfileRequest::Fetch(hex.clone()));
        assert_eq!(resolver.lookup(&hex), Some(ProfileLookup::Ready(cached.clone())));
        resolver.complete(resolver.epoch(), &hex, None);
        assert_eq!(resolver.lookup(&hex), Some(ProfileLookup::Ready(cached)));
    }
}
