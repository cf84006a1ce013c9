use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const APP_CONFIG_FILE: &str = "garnet_config.json";

/// Runtime tuning read from `<data_dir>/garnet_config.json`. Every field is optional; the
/// accessors supply defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub relay_urls: Option<Vec<String>>,
    pub discovery_window_secs: Option<u64>,
    pub directory_health_wait_ms: Option<u64>,
    pub channel_health_wait_ms: Option<u64>,
    pub pins_health_wait_ms: Option<u64>,
    pub publish_health_wait_ms: Option<u64>,
    pub directory_eose_timeout_ms: Option<u64>,
    pub channel_eose_timeout_ms: Option<u64>,
    pub flush_interval_ms: Option<u64>,
    pub timeline_flush_interval_ms: Option<u64>,
    pub publish_timeout_ms: Option<u64>,
    pub profile_fetch_timeout_ms: Option<u64>,
    pub directory_limit: Option<usize>,
    pub channel_backlog: Option<usize>,
    pub timeline_backlog: Option<usize>,
}

fn ms(value: Option<u64>, default: u64) -> Duration {
    Duration::from_millis(value.unwrap_or(default))
}

/// A relay the client is set up to use, with what it is used for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfiguredRelay {
    pub url: String,
    pub read: bool,
    pub write: bool,
}

impl AppConfig {
    /// Configured relays (read and write), or the default profile when none survive sanitizing.
    pub fn relays(&self) -> Vec<ConfiguredRelay> {
        let configured = self
            .relay_urls
            .as_ref()
            .map(|urls| garnet_relay_profiles::sanitize_relay_urls(urls.iter().map(String::as_str)))
            .unwrap_or_default();
        if configured.is_empty() {
            return garnet_relay_profiles::default_profile()
                .relays
                .iter()
                .map(|spec| ConfiguredRelay {
                    url: spec.url.to_string(),
                    read: spec.read,
                    write: spec.write,
                })
                .collect();
        }
        configured
            .into_iter()
            .map(|url| ConfiguredRelay {
                url,
                read: true,
                write: true,
            })
            .collect()
    }

    pub fn relay_urls(&self) -> Vec<String> {
        self.relays().into_iter().map(|r| r.url).collect()
    }

    pub fn discovery_window(&self) -> Duration {
        Duration::from_secs(self.discovery_window_secs.unwrap_or(30))
    }

    pub fn directory_health_wait(&self) -> Duration {
        ms(self.directory_health_wait_ms, 5_000)
    }

    pub fn channel_health_wait(&self) -> Duration {
        ms(self.channel_health_wait_ms, 3_000)
    }

    pub fn pins_health_wait(&self) -> Duration {
        ms(self.pins_health_wait_ms, 2_000)
    }

    pub fn publish_health_wait(&self) -> Duration {
        ms(self.publish_health_wait_ms, 3_000)
    }

    pub fn directory_eose_timeout(&self) -> Duration {
        ms(self.directory_eose_timeout_ms, 30_000)
    }

    pub fn channel_eose_timeout(&self) -> Duration {
        ms(self.channel_eose_timeout_ms, 5_000)
    }

    pub fn flush_interval(&self) -> Duration {
        ms(self.flush_interval_ms, 500)
    }

    pub fn timeline_flush_interval(&self) -> Duration {
        ms(self.timeline_flush_interval_ms, 1_000)
    }

    pub fn publish_timeout(&self) -> Duration {
        ms(self.publish_timeout_ms, 10_000)
    }

    pub fn profile_fetch_timeout(&self) -> Duration {
        ms(self.profile_fetch_timeout_ms, 5_000)
    }

    pub fn directory_limit(&self) -> usize {
        self.directory_limit.unwrap_or(100)
    }

    pub fn channel_backlog(&self) -> usize {
        self.channel_backlog.unwrap_or(100)
    }

    pub fn timeline_backlog(&self) -> usize {
        self.timeline_backlog.unwrap_or(50)
    }
}

fn read_app_config(data_dir: &str) -> anyhow::Result<Option<AppConfig>> {
    let path = Path::new(data_dir).join(APP_CONFIG_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read(&path)?;
    Ok(Some(serde_json::from_slice(&raw)?))
}

pub fn load_app_config(data_dir: &str) -> AppConfig {
    match read_app_config(data_dir) {
        Ok(config) => config.unwrap_or_default(),
        Err(e) => {
            tracing::warn!(err = %format!("{e:#}"), "invalid {APP_CONFIG_FILE}; using defaults");
            AppConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_app_config(dir.path().to_str().unwrap());
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.discovery_window(), Duration::from_secs(30));
        assert_eq!(config.publish_timeout(), Duration::from_secs(10));
        assert_eq!(config.relay_urls(), garnet_relay_profiles::default_relay_urls());
        let flags: Vec<(bool, bool)> = config.relays().iter().map(|r| (r.read, r.write)).collect();
        let expected: Vec<(bool, bool)> = garnet_relay_profiles::default_profile()
            .relays
            .iter()
            .map(|spec| (spec.read, spec.write))
            .collect();
        assert_eq!(flags, expected);
    }

    #[test]
    fn file_overrides_and_bad_relays_fall_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(APP_CONFIG_FILE);
        std::fs::write(
            &path,
            r#"{"relay_urls":["wss://relay.test/","https://nope"],"discovery_window_secs":5}"#,
        )
        .unwrap();
        let config = load_app_config(dir.path().to_str().unwrap());
        assert_eq!(config.relay_urls(), vec!["wss://relay.test".to_string()]);
        assert!(config.relays().iter().all(|r| r.read && r.write));
        assert_eq!(config.discovery_window(), Duration::from_secs(5));

        std::fs::write(&path, r#"{"relay_urls":["ftp://x"]}"#).unwrap();
        let config = load_app_config(dir.path().to_str().unwrap());
        assert_eq!(config.relay_urls(), garnet_relay_profiles::default_relay_urls());
    }

    #[test]
    fn corrupt_file_degrades_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(APP_CONFIG_FILE), "{not json").unwrap();
        assert_eq!(load_app_config(dir.path().to_str().unwrap()), AppConfig::default());
    }
}
