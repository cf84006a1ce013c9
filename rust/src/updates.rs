use nostr_sdk::prelude::{Event, Metadata, PublicKey};

use crate::core::publish::PublishIntent;
use crate::core::session::SubKey;
use crate::mux::{PublishMessage, SubscriptionMessage};
use crate::signer::SignerError;
use crate::state::AppState;
use crate::AppAction;

#[derive(Clone, Debug)]
pub enum AppUpdate {
    /// Primary update stream: always a full state snapshot.
    FullState(AppState),
}

impl AppUpdate {
    pub fn rev(&self) -> u64 {
        match self {
            AppUpdate::FullState(s) => s.rev,
        }
    }
}

#[derive(Debug)]
pub enum CoreMsg {
    Action(AppAction),
    Internal(Box<InternalEvent>),
}

#[derive(Debug)]
pub enum InternalEvent {
    // Subscription lifecycle
    ReadyToSubscribe {
        key: SubKey,
        generation: u64,
    },
    Subscription {
        key: SubKey,
        generation: u64,
        message: SubscriptionMessage,
    },
    DiscoveryWindowClosed {
        key: SubKey,
        generation: u64,
    },

    // Signer results
    PublicKeyResolved {
        pubkey: PublicKey,
    },
    SignInFailed {
        error: SignerError,
    },
    EventSigned {
        publish_id: u64,
        intent: PublishIntent,
        event: Event,
    },
    SignFailed {
        publish_id: u64,
        error: SignerError,
    },

    // Publish path
    PublishReady {
        publish_id: u64,
        connected: bool,
    },
    PublishProgress {
        publish_id: u64,
        message: PublishMessage,
    },

    ProfileFetched {
        epoch: u64,
        pubkey: String,
        metadata: Option<Metadata>,
    },
}
