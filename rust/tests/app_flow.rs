//! End-to-end flows through the app actor with an in-process relay multiplexer.

use std::time::Duration;

use garnet_core::{AppAction, AuthState, ChannelStatus, Lang, ProfileLookup};
use nostr_sdk::prelude::*;
use tempfile::tempdir;

#[path = "support/mod.rs"]
mod support;

use support::{event, tag, wait_until, Collector, TestApp};

const WAIT: Duration = Duration::from_secs(5);

#[test]
fn sidebar_applies_owner_updates_and_ignores_forgeries() {
    let dir = tempdir().unwrap();
    let data_dir = dir.path().to_string_lossy().to_string();
    support::write_config(&data_dir);
    let t = TestApp::start(&data_dir, Keys::generate());
    t.wait_subscribed("all_channels");

    let owner = Keys::generate();
    let forger = Keys::generate();
    let creation = event(&owner, Kind::ChannelCreation, r#"{"name":"rust-ja"}"#, vec![], 100);
    let id = creation.id.to_hex();
    // The update arrives before its creation record.
    let update = event(
        &owner,
        Kind::ChannelMetadata,
        r#"{"name":"rust-jp","about":"rustaceans"}"#,
        vec![tag(&["e", id.as_str()])],
        200,
    );
    let forged = event(
        &forger,
        Kind::ChannelMetadata,
        r#"{"name":"scam"}"#,
        vec![tag(&["e", id.as_str()])],
        300,
    );
    t.mux.deliver("all_channels", vec![update, forged]);
    t.mux.deliver("all_channels", vec![creation]);

    wait_until("channel listed", WAIT, || {
        t.app.state().channels.channels.len() == 1
    });
    let state = t.app.state();
    let channel = &state.channels.channels[0];
    assert_eq!(channel.id(), id);
    assert_eq!(channel.metadata.name(), Some("rust-jp"));
    assert_eq!(channel.metadata.fields.about.as_deref(), Some("rustaceans"));
    assert!(state.channels.loading);

    let relays: Vec<&str> = state.relays.iter().map(|r| r.url.as_str()).collect();
    assert_eq!(relays, ["wss://relay.one.test", "wss://relay.two.test"]);
    assert!(state.relays.iter().all(|r| r.healthy));
}

#[test]
fn channel_view_loads_backlog_and_resolves_authors() {
    let dir = tempdir().unwrap();
    let data_dir = dir.path().to_string_lossy().to_string();
    support::write_config(&data_dir);
    let t = TestApp::start(&data_dir, Keys::generate());

    let owner = Keys::generate();
    let speaker = Keys::generate();
    t.profiles.insert(
        speaker.public_key(),
        Metadata::new().name("speaker"),
    );

    let creation = event(&owner, Kind::ChannelCreation, r#"{"name":"room"}"#, vec![], 100);
    let id = creation.id.to_hex();
    let root = |at: u64, text: &str| {
        event(
            &speaker,
            Kind::ChannelMessage,
            text,
            vec![tag(&["e", id.as_str(), "wss://relay.one.test", "root"])],
            at,
        )
    };
    let collector = Collector::default();
    t.app.listen_for_updates(Box::new(collector.clone()));

    t.app.dispatch(AppAction::OpenChannel {
        channel_id: id.clone(),
    });
    t.wait_subscribed("channel");
    assert_eq!(
        t.app.state().current_channel.map(|c| c.status),
        Some(ChannelStatus::AwaitingData)
    );

    t.mux
        .deliver("channel", vec![creation, root(120, "second"), root(110, "first")]);
    t.mux.eose("channel");

    wait_until("channel loaded", WAIT, || {
        t.app
            .state()
            .current_channel
            .is_some_and(|c| c.status == ChannelStatus::Loaded && c.messages.len() == 2)
    });
    let view = t.app.state().current_channel.unwrap();
    assert_eq!(view.channel.unwrap().metadata.name(), Some("room"));
    let texts: Vec<&str> = view.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(texts, vec!["first", "second"]);

    let speaker_hex = speaker.public_key().to_hex();
    wait_until("author profile", WAIT, || {
        matches!(
            t.app.state().profiles.get(&speaker_hex),
            Some(ProfileLookup::Ready(p)) if p.name == "speaker"
        )
    });

    let updates = collector.updates.lock().unwrap();
    assert!(updates.windows(2).all(|w| w[0].rev() < w[1].rev()));
}

#[test]
fn followee_timeline_uses_contact_list() {
    let dir = tempdir().unwrap();
    let data_dir = dir.path().to_string_lossy().to_string();
    support::write_config(&data_dir);
    let me = Keys::generate();
    let t = TestApp::start(&data_dir, me.clone());

    t.app.dispatch(AppAction::SignIn);
    t.wait_subscribed("contacts");
    // No cached follows and no contact list yet: nobody to follow.
    assert!(!t.mux.is_subscribed("followee"));

    let friend = Keys::generate();
    let friend_hex = friend.public_key().to_hex();
    let contacts = event(&me, Kind::ContactList, "", vec![tag(&["p", friend_hex.as_str()])], 50);
    t.mux.deliver("contacts", vec![contacts]);
    t.wait_subscribed("followee");

    let channel = "ab".repeat(32);
    let note = event(&friend, Kind::TextNote, "hello world", vec![], 100);
    let message = event(
        &friend,
        Kind::ChannelMessage,
        "in a channel",
        vec![tag(&["e", channel.as_str(), "", "root"])],
        110,
    );
    t.mux.deliver("followee", vec![note, message]);

    wait_until("timeline filled", WAIT, || {
        let timeline = t.app.state().timeline;
        timeline.notes.len() == 1 && timeline.messages.len() == 1
    });
    let timeline = t.app.state().timeline;
    assert_eq!(timeline.notes[0].content, "hello world");
    assert_eq!(timeline.messages[0].channel_id, channel);

    t.app.dispatch(AppAction::SignOut);
    wait_until("signed out", WAIT, || {
        t.app.state().auth == AuthState::SignedOut
    });
    assert!(t.app.state().timeline.notes.is_empty());
    assert!(!t.mux.is_subscribed("followee"));
    assert!(!t.mux.is_subscribed("contacts"));
}

#[test]
fn session_and_pins_survive_restart() {
    let dir = tempdir().unwrap();
    let data_dir = dir.path().to_string_lossy().to_string();
    support::write_config(&data_dir);
    let me = Keys::generate();
    let channel = "cd".repeat(32);

    {
        let t = TestApp::start(&data_dir, me.clone());
        t.app.dispatch(AppAction::SignIn);
        wait_until("signed in", WAIT, || {
            matches!(t.app.state().auth, AuthState::SignedIn { .. })
        });
        t.app.dispatch(AppAction::PinChannel {
            channel_id: channel.clone(),
        });
        t.app.dispatch(AppAction::SetLanguage { lang: Lang::En });
        wait_until("pinned", WAIT, || t.app.state().pinned.len() == 1);
        t.wait_subscribed("pin_channel_message");
    }

    let t = TestApp::start(&data_dir, me.clone());
    let state = t.app.state();
    match state.auth {
        AuthState::SignedIn { pubkey, npub } => {
            assert_eq!(pubkey, me.public_key().to_hex());
            assert_eq!(npub, me.public_key().to_bech32().unwrap());
        }
        other => panic!("expected restored session, got {other:?}"),
    }
    assert_eq!(state.lang, Lang::En);
    assert_eq!(state.pinned.len(), 1);
    assert_eq!(state.pinned[0].id, channel);
    assert!(!state.pinned[0].unread);

    // Foregrounding restarts the signed-in subscriptions.
    t.wait_subscribed("pin_channel_message");
    let later = event(
        &Keys::generate(),
        Kind::ChannelMessage,
        "ping",
        vec![tag(&["e", channel.as_str(), "", "root"])],
        Timestamp::now().as_secs() + 60,
    );
    t.mux.deliver("pin_channel_message", vec![later]);
    wait_until("unread", WAIT, || {
        t.app.state().pinned.first().is_some_and(|p| p.unread)
    });
}

#[test]
fn search_by_owner_only_lists_owned_channels() {
    let dir = tempdir().unwrap();
    let data_dir = dir.path().to_string_lossy().to_string();
    support::write_config(&data_dir);
    let t = TestApp::start(&data_dir, Keys::generate());

    let owner = Keys::generate();
    let npub = owner.public_key().to_bech32().unwrap();
    t.app.dispatch(AppAction::SearchChannels {
        channel_id: None,
        owner: Some(npub.clone()),
    });
    t.wait_subscribed("search_channels");
    let filters = t.mux.filters("search_channels").unwrap();
    assert!(filters.iter().all(|f| f
        .authors
        .as_ref()
        .is_some_and(|a| a.contains(&owner.public_key()))));

    let creation = event(&owner, Kind::ChannelCreation, r#"{"name":"mine"}"#, vec![], 10);
    t.mux.deliver("search_channels", vec![creation]);
    wait_until("search result", WAIT, || {
        t.app
            .state()
            .search
            .is_some_and(|s| s.results.channels.len() == 1)
    });
    assert!(t.app.state().channels.channels.is_empty());

    t.app.dispatch(AppAction::CloseChannelSearch);
    wait_until("search closed", WAIT, || t.app.state().search.is_none());
    assert!(!t.mux.is_subscribed("search_channels"));
}
