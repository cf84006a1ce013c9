//! Identifier validation and tag interpretation shared by the reducers.

use std::sync::OnceLock;

use nostr_sdk::prelude::*;

/// Lowercase 64-char hex, the shape of event ids and x-only public keys.
pub fn is_hex_id(s: &str) -> bool {
    static HEX_ID_RE: OnceLock<regex::Regex> = OnceLock::new();
    HEX_ID_RE
        .get_or_init(|| regex::Regex::new(r"^[0-9a-f]{64}$").expect("valid hex id regex"))
        .is_match(s)
}

/// Normalize a user-supplied public identity to hex.
///
/// Hex input must be a valid x-only key; anything else must decode as an `npub`.
pub fn normalize_pubkey(identifier: &str) -> Option<String> {
    if is_hex_id(identifier) {
        return PublicKey::from_hex(identifier)
            .ok()
            .map(|_| identifier.to_string());
    }
    PublicKey::from_bech32(identifier).ok().map(|pk| pk.to_hex())
}

/// Value of the first `e` tag, if any.
pub fn first_event_tag_id(tags: &Tags) -> Option<String> {
    tags.iter().find_map(|tag| {
        let values = tag.as_slice();
        match values {
            [name, id, ..] if name == "e" && !id.is_empty() => Some(id.clone()),
            _ => None,
        }
    })
}

/// Channel id from a well-formed root marker: `["e", <64 hex>, <relay>, "root"]`.
pub fn root_channel_id(tags: &Tags) -> Option<String> {
    tags.iter().find_map(|tag| match tag.as_slice() {
        [name, id, _relay, marker, ..] if name == "e" && marker == "root" && is_hex_id(id) => {
            Some(id.clone())
        }
        _ => None,
    })
}

/// Hex pubkeys from `p` tags, skipping malformed entries and duplicates.
pub fn followed_pubkeys(tags: &Tags) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in tags.iter() {
        if let [name, pubkey, ..] = tag.as_slice() {
            if name == "p" && is_hex_id(pubkey) && !out.contains(pubkey) {
                out.push(pubkey.clone());
            }
        }
    }
    out
}

pub fn hex_pubkeys(hex: &[String]) -> Vec<PublicKey> {
    hex.iter()
        .filter_map(|h| PublicKey::from_hex(h).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(raw: Vec<Vec<&str>>) -> Tags {
        let mut t = Tags::new();
        for tag in raw {
            t.push(Tag::parse(tag).unwrap());
        }
        t
    }

    const HEX: &str = "3bf0c63fcb93463407af97a5e5ee64fa883d107ef9e558472c4eb9aaaefa459d";

    #[test]
    fn hex_id_requires_lowercase_64_chars() {
        assert!(is_hex_id(HEX));
        assert!(!is_hex_id(&HEX.to_uppercase()));
        assert!(!is_hex_id(&HEX[1..]));
        assert!(!is_hex_id("not-hex"));
    }

    #[test]
    fn normalize_accepts_hex_and_npub_only() {
        let keys = Keys::generate();
        let npub = keys.public_key().to_bech32().unwrap();
        assert_eq!(normalize_pubkey(&npub), Some(keys.public_key().to_hex()));
        assert_eq!(normalize_pubkey(HEX).as_deref(), Some(HEX));

        let nsec = keys.secret_key().to_bech32().unwrap();
        assert_eq!(normalize_pubkey(&nsec), None);
        assert_eq!(normalize_pubkey("npub1garbage"), None);
        // Right shape, but not a point on the curve.
        assert_eq!(normalize_pubkey(&"f".repeat(64)), None);
    }

    #[test]
    fn first_e_tag_skips_other_tags() {
        let t = tags(vec![vec!["r", "x"], vec!["e", "first"], vec!["e", "second"]]);
        assert_eq!(first_event_tag_id(&t).as_deref(), Some("first"));
        assert_eq!(first_event_tag_id(&tags(vec![vec!["p", HEX]])), None);
    }

    #[test]
    fn root_tag_must_be_well_formed() {
        let good = tags(vec![vec!["e", HEX, "wss://r", "root"]]);
        assert_eq!(root_channel_id(&good).as_deref(), Some(HEX));

        let reply_only = tags(vec![vec!["e", HEX, "wss://r", "reply"]]);
        assert_eq!(root_channel_id(&reply_only), None);

        let bad_id = tags(vec![vec!["e", "abc", "wss://r", "root"]]);
        assert_eq!(root_channel_id(&bad_id), None);

        let short = tags(vec![vec!["e", HEX]]);
        assert_eq!(root_channel_id(&short), None);
    }

    #[test]
    fn followed_pubkeys_dedups_and_filters() {
        let t = tags(vec![
            vec!["p", HEX],
            vec!["p", "bogus"],
            vec!["p", HEX, "wss://relay"],
            vec!["e", HEX],
        ]);
        assert_eq!(followed_pubkeys(&t), vec![HEX.to_string()]);
    }
}
