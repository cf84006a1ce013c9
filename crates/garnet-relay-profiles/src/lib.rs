use url::Url;

/// A relay entry together with the capabilities the client uses it for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RelaySpec {
    pub url: &'static str,
    pub read: bool,
    pub write: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RelayProfile {
    pub name: &'static str,
    pub relays: &'static [RelaySpec],
}

impl RelayProfile {
    pub fn relay_urls_vec(self) -> Vec<String> {
        self.relays.iter().map(|r| r.url.to_string()).collect()
    }
}

const fn rw(url: &'static str) -> RelaySpec {
    RelaySpec {
        url,
        read: true,
        write: true,
    }
}

pub const GARNET_DEFAULT: RelayProfile = RelayProfile {
    name: "garnet-default",
    relays: &[
        rw("wss://relay.snort.social"),
        rw("wss://relay.damus.io"),
        rw("wss://nostr.fediverse.jp"),
        rw("wss://relay-jp.nostr.wirednet.jp"),
    ],
};

pub fn default_profile() -> RelayProfile {
    GARNET_DEFAULT
}

pub fn default_relay_urls() -> Vec<String> {
    default_profile().relay_urls_vec()
}

/// Keeps only well-formed `ws://`/`wss://` URLs, dropping duplicates while preserving order.
pub fn sanitize_relay_urls<I, S>(urls: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for raw in urls {
        let trimmed = raw.as_ref().trim();
        let Ok(parsed) = Url::parse(trimmed) else {
            continue;
        };
        if !matches!(parsed.scheme(), "ws" | "wss") || parsed.host_str().is_none() {
            continue;
        }
        let normalized = trimmed.trim_end_matches('/').to_string();
        if !out.contains(&normalized) {
            out.push(normalized);
        }
    }
    out
}
