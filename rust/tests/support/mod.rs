#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use garnet_core::mux::RelayMux;
use garnet_core::signer::KeysSigner;
use garnet_core::testing::{RecordingMux, StaticProfileSource};
use garnet_core::{AppReconciler, AppUpdate, GarnetApp, Services};
use nostr_sdk::prelude::*;

pub fn write_config(data_dir: &str) {
    let path = std::path::Path::new(data_dir).join("garnet_config.json");
    let v = serde_json::json!({
        "relay_urls": ["wss://relay.one.test", "wss://relay.two.test"],
        "discovery_window_secs": 3600,
    });
    std::fs::write(path, serde_json::to_vec(&v).unwrap()).unwrap();
}

pub fn wait_until(what: &str, timeout: Duration, mut f: impl FnMut() -> bool) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if f() {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    panic!("{what}: condition not met within {timeout:?}");
}

pub struct TestApp {
    pub app: Arc<GarnetApp>,
    pub mux: Arc<RecordingMux>,
    pub profiles: StaticProfileSource,
    pub keys: Keys,
}

impl TestApp {
    pub fn start(data_dir: &str, keys: Keys) -> Self {
        let mux = Arc::new(RecordingMux::new(vec![
            "wss://relay.one.test".to_string(),
            "wss://relay.two.test".to_string(),
        ]));
        let profiles = StaticProfileSource::default();
        let relay_mux: Arc<dyn RelayMux> = mux.clone();
        let services = Services {
            mux: relay_mux,
            signer: Arc::new(KeysSigner::new(keys.clone())),
            profile_source: Some(Arc::new(profiles.clone())),
        };
        let app = GarnetApp::new(data_dir.to_string(), services);
        Self {
            app,
            mux,
            profiles,
            keys,
        }
    }

    pub fn wait_subscribed(&self, id: &str) {
        wait_until(id, Duration::from_secs(5), || self.mux.is_subscribed(id));
    }
}

pub fn event(keys: &Keys, kind: Kind, content: &str, tags: Vec<Vec<String>>, at: u64) -> Event {
    let tags: Vec<Tag> = tags.into_iter().map(|t| Tag::parse(t).unwrap()).collect();
    EventBuilder::new(kind, content)
        .tags(tags)
        .custom_created_at(Timestamp::from_secs(at))
        .sign_with_keys(keys)
        .unwrap()
}

pub fn tag(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[derive(Clone, Default)]
pub struct Collector {
    pub updates: Arc<Mutex<Vec<AppUpdate>>>,
}

impl AppReconciler for Collector {
    fn reconcile(&self, update: AppUpdate) {
        self.updates.lock().unwrap().push(update);
    }
}
