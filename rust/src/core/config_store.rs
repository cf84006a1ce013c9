//! Persisted user configuration: identity, pinned channels and preferences.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::profile::Profile;

pub const PUBKEY_KEY: &str = "garnet.pubkey";
pub const CONFIG_KEY: &str = "garnet.config";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinnedChannel {
    pub id: String,
    pub last_read: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    #[default]
    Ja,
    En,
}

impl Lang {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ja" => Some(Lang::Ja),
            "en" => Some(Lang::En),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub pin_channels: Vec<PinnedChannel>,
    pub lang: Lang,
    pub enable_ambient_timeline: bool,
}

impl Config {
    pub fn is_pinned(&self, channel_id: &str) -> bool {
        self.pin_channels.iter().any(|p| p.id == channel_id)
    }

    pub fn pin(&self, channel_id: &str) -> Option<&PinnedChannel> {
        self.pin_channels.iter().find(|p| p.id == channel_id)
    }
}

fn parse_last_read(value: &Value) -> Option<u64> {
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    value
        .as_f64()
        .filter(|f| f.is_finite() && *f >= 0.0)
        .map(|f| f as u64)
}

fn parse_pin(entry: &Value) -> Option<PinnedChannel> {
    match entry {
        Value::String(id) => Some(PinnedChannel {
            id: id.clone(),
            last_read: 0,
        }),
        Value::Object(object) => {
            let id = object.get("id")?.as_str()?;
            let last_read = parse_last_read(object.get("lastRead")?)?;
            Some(PinnedChannel {
                id: id.to_string(),
                last_read,
            })
        }
        _ => None,
    }
}

/// Read a stored config blob. Each field is validated on its own; anything of the wrong shape
/// falls back to its default, so a corrupt blob never blocks startup.
pub fn parse_config(blob: Option<&str>) -> Config {
    let mut config = Config::default();
    let Some(blob) = blob else {
        return config;
    };
    let object = match serde_json::from_str::<Value>(blob) {
        Ok(Value::Object(object)) => object,
        Ok(_) => {
            tracing::warn!("stored config is not an object; using defaults");
            return config;
        }
        Err(e) => {
            tracing::warn!(%e, "stored config is not valid json; using defaults");
            return config;
        }
    };

    if let Some(Value::Array(entries)) = object.get("pinChannels") {
        for pin in entries.iter().filter_map(parse_pin) {
            if !config.is_pinned(&pin.id) {
                config.pin_channels.push(pin);
            }
        }
    }
    if let Some(lang) = object.get("lang").and_then(Value::as_str).and_then(Lang::parse) {
        config.lang = lang;
    }
    if let Some(enabled) = object.get("enableAmbientTimeline").and_then(Value::as_bool) {
        config.enable_ambient_timeline = enabled;
    }
    config
}

/// Key/value persistence plus the follow and profile caches.
pub trait SettingsStore: Send {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str);
    fn remove(&mut self, key: &str);

    fn load_follows(&self) -> Vec<String>;
    fn save_follows(&mut self, pubkeys: &[String]);

    fn load_profiles(&self) -> HashMap<String, Profile>;
    fn save_profile(&mut self, profile: &Profile);
    /// Drops cached follows and profiles.
    fn clear_caches(&mut self);
}

/// In-process store for tests and for running without a data directory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    pub values: HashMap<String, String>,
    pub follows: Vec<String>,
    pub profiles: HashMap<String, Profile>,
}

impl SettingsStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
    }

    fn remove(&mut self, key: &str) {
        self.values.remove(key);
    }

    fn load_follows(&self) -> Vec<String> {
        self.follows.clone()
    }

    fn save_follows(&mut self, pubkeys: &[String]) {
        self.follows = pubkeys.to_vec();
    }

    fn load_profiles(&self) -> HashMap<String, Profile> {
        self.profiles.clone()
    }

    fn save_profile(&mut self, profile: &Profile) {
        self.profiles.insert(profile.pubkey.clone(), profile.clone());
    }

    fn clear_caches(&mut self) {
        self.follows.clear();
        self.profiles.clear();
    }
}

/// The signed-in identity and its config, written through to a [`SettingsStore`].
pub struct ConfigStore {
    store: Box<dyn SettingsStore>,
    pubkey: Option<String>,
    config: Config,
}

impl ConfigStore {
    /// Restore a previous session, if any. The language preference survives sign-out, so it is
    /// restored even without an identity.
    pub fn open(store: Box<dyn SettingsStore>) -> Self {
        let pubkey = store.get(PUBKEY_KEY).filter(|s| !s.is_empty());
        let stored = parse_config(store.get(CONFIG_KEY).as_deref());
        let config = if pubkey.is_some() {
            stored
        } else {
            Config {
                lang: stored.lang,
                ..Config::default()
            }
        };
        Self {
            store,
            pubkey,
            config,
        }
    }

    pub fn pubkey(&self) -> Option<&str> {
        self.pubkey.as_deref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &dyn SettingsStore {
        self.store.as_ref()
    }

    pub fn store_mut(&mut self) -> &mut dyn SettingsStore {
        self.store.as_mut()
    }

    fn persist(&mut self) {
        match serde_json::to_string(&self.config) {
            Ok(json) => self.store.set(CONFIG_KEY, &json),
            Err(e) => tracing::warn!(%e, "failed to serialize config"),
        }
    }

    /// Returns false when `pubkey` is already the signed-in identity.
    pub fn sign_in(&mut self, pubkey: &str) -> bool {
        if self.pubkey.as_deref() == Some(pubkey) {
            return false;
        }
        self.store.set(PUBKEY_KEY, pubkey);
        self.pubkey = Some(pubkey.to_string());
        let lang = self.config.lang;
        self.config = parse_config(self.store.get(CONFIG_KEY).as_deref());
        if self.store.get(CONFIG_KEY).is_none() {
            self.config.lang = lang;
        }
        true
    }

    pub fn sign_out(&mut self) -> bool {
        if self.pubkey.is_none() {
            return false;
        }
        self.store.remove(PUBKEY_KEY);
        self.pubkey = None;
        self.config = Config {
            lang: self.config.lang,
            ..Config::default()
        };
        self.persist();
        true
    }

    pub fn pin(&mut self, channel_id: &str, last_read: u64) -> bool {
        if self.pubkey.is_none() || self.config.is_pinned(channel_id) {
            return false;
        }
        self.config.pin_channels.push(PinnedChannel {
            id: channel_id.to_string(),
            last_read,
        });
        self.persist();
        true
    }

    pub fn unpin(&mut self, channel_id: &str) -> bool {
        if self.pubkey.is_none() || !self.config.is_pinned(channel_id) {
            return false;
        }
        self.config.pin_channels.retain(|p| p.id != channel_id);
        self.persist();
        true
    }

    /// Move the read mark forward. Older timestamps are ignored.
    pub fn mark_read(&mut self, channel_id: &str, timestamp: u64) -> bool {
        if self.pubkey.is_none() {
            return false;
        }
        let Some(pin) = self
            .config
            .pin_channels
            .iter_mut()
            .find(|p| p.id == channel_id)
        else {
            return false;
        };
        if pin.last_read >= timestamp {
            return false;
        }
        pin.last_read = timestamp;
        self.persist();
        true
    }

    pub fn set_lang(&mut self, lang: Lang) -> bool {
        if self.config.lang == lang {
            return false;
        }
        self.config.lang = lang;
        self.persist();
        true
    }

    pub fn set_enable_ambient_timeline(&mut self, enabled: bool) -> bool {
        if self.pubkey.is_none() || self.config.enable_ambient_timeline == enabled {
            return false;
        }
        self.config.enable_ambient_timeline = enabled;
        self.persist();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: &str = "3bf0c63fcb93463407af97a5e5ee64fa883d107ef9e558472c4eb9aaaefa459d";

    fn stored(store: &ConfigStore) -> Config {
        parse_config(store.store().get(CONFIG_KEY).as_deref())
    }

    #[test]
    fn garbage_fields_fall_back_to_defaults() {
        let config = parse_config(Some(r#"{"pinChannels":"garbage","lang":42}"#));
        assert_eq!(config, Config::default());
        assert_eq!(config.lang, Lang::Ja);

        for blob in ["not json", "[]", "null", "7"] {
            assert_eq!(parse_config(Some(blob)), Config::default(), "blob {blob}");
        }
        assert_eq!(parse_config(None), Config::default());
    }

    #[test]
    fn pins_accept_legacy_strings_and_dedup() {
        let config = parse_config(Some(
            r#"{
                "pinChannels": [
                    "legacy",
                    {"id": "a", "lastRead": 10},
                    {"id": "a", "lastRead": 99},
                    {"id": "b", "lastRead": "10"},
                    {"id": 5, "lastRead": 1},
                    {"id": "c", "lastRead": 12.0},
                    {"id": "d", "lastRead": -1}
                ],
                "lang": "en",
                "enableAmbientTimeline": true
            }"#,
        ));
        assert_eq!(
            config.pin_channels,
            vec![
                PinnedChannel { id: "legacy".into(), last_read: 0 },
                PinnedChannel { id: "a".into(), last_read: 10 },
                PinnedChannel { id: "c".into(), last_read: 12 },
            ]
        );
        assert_eq!(config.lang, Lang::En);
        assert!(config.enable_ambient_timeline);
    }

    #[test]
    fn intents_persist_and_require_identity() {
        let mut store = ConfigStore::open(Box::new(MemoryStore::default()));
        assert!(!store.pin("c1", 0));
        assert!(store.set_lang(Lang::En));

        assert!(store.sign_in(ALICE));
        assert!(!store.sign_in(ALICE));
        assert_eq!(store.store().get(PUBKEY_KEY).as_deref(), Some(ALICE));
        assert_eq!(store.config().lang, Lang::En);

        assert!(store.pin("c1", 5));
        assert!(!store.pin("c1", 50));
        assert!(store.mark_read("c1", 20));
        assert!(!store.mark_read("c1", 10));
        assert!(!store.mark_read("unknown", 10));
        assert_eq!(store.config().pin("c1").map(|p| p.last_read), Some(20));
        assert_eq!(stored(&store), store.config().clone());

        assert!(store.set_enable_ambient_timeline(true));
        assert!(store.unpin("c1"));
        assert!(!store.unpin("c1"));
        assert_eq!(stored(&store).pin_channels, vec![]);
        assert!(stored(&store).enable_ambient_timeline);
    }

    #[test]
    fn sign_out_keeps_only_lang() {
        let mut store = ConfigStore::open(Box::new(MemoryStore::default()));
        store.sign_in(ALICE);
        store.pin("c1", 1);
        store.set_lang(Lang::En);
        store.set_enable_ambient_timeline(true);

        assert!(store.sign_out());
        assert_eq!(store.pubkey(), None);
        assert_eq!(store.store().get(PUBKEY_KEY), None);
        let expected = Config {
            lang: Lang::En,
            ..Config::default()
        };
        assert_eq!(store.config(), &expected);
        assert_eq!(stored(&store), expected);
    }

    #[test]
    fn open_restores_session() {
        let mut memory = MemoryStore::default();
        memory.set(PUBKEY_KEY, ALICE);
        memory.set(CONFIG_KEY, r#"{"pinChannels":["c1"],"lang":"en"}"#);
        let store = ConfigStore::open(Box::new(memory.clone()));
        assert_eq!(store.pubkey(), Some(ALICE));
        assert!(store.config().is_pinned("c1"));

        memory.remove(PUBKEY_KEY);
        let signed_out = ConfigStore::open(Box::new(memory));
        assert_eq!(signed_out.pubkey(), None);
        assert!(signed_out.config().pin_channels.is_empty());
        assert_eq!(signed_out.config().lang, Lang::En);
    }
}
