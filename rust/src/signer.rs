use futures::future::BoxFuture;
use futures::FutureExt;
use nostr_sdk::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignerErrorKind {
    /// No signer is installed (e.g. browser extension missing).
    Unavailable,
    /// The user declined the request.
    Rejected,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignerError {
    #[error("signer unavailable")]
    Unavailable,
    #[error("signing request rejected")]
    Rejected,
    #[error("signer failed: {0}")]
    Other(String),
}

impl SignerError {
    pub fn kind(&self) -> SignerErrorKind {
        match self {
            SignerError::Unavailable => SignerErrorKind::Unavailable,
            SignerError::Rejected => SignerErrorKind::Rejected,
            SignerError::Other(_) => SignerErrorKind::Other,
        }
    }
}

/// Short, user-facing text for a signer failure.
pub fn user_visible_signer_error(err: &SignerError) -> String {
    match err.kind() {
        SignerErrorKind::Unavailable => "No signer available. Install a NIP-07 extension.".into(),
        SignerErrorKind::Rejected => "Signing request was rejected".into(),
        SignerErrorKind::Other => format!("Signing failed: {err}"),
    }
}

/// Host-provided signing capability. Either call may fail; callers treat that as a warning.
pub trait Signer: Send + Sync + 'static {
    fn get_public_key(&self) -> BoxFuture<'static, Result<PublicKey, SignerError>>;

    fn sign_event(&self, unsigned: UnsignedEvent) -> BoxFuture<'static, Result<Event, SignerError>>;
}

/// Signs with a locally held key.
#[derive(Clone)]
pub struct KeysSigner {
    keys: Keys,
}

impl KeysSigner {
    pub fn new(keys: Keys) -> Self {
        Self { keys }
    }
}

impl Signer for KeysSigner {
    fn get_public_key(&self) -> BoxFuture<'static, Result<PublicKey, SignerError>> {
        let pubkey = self.keys.public_key();
        async move { Ok(pubkey) }.boxed()
    }

    fn sign_event(&self, unsigned: UnsignedEvent) -> BoxFuture<'static, Result<Event, SignerError>> {
        let keys = self.keys.clone();
        async move {
            if unsigned.pubkey != keys.public_key() {
                return Err(SignerError::Other("event author does not match signer".into()));
            }
            unsigned
                .sign_with_keys(&keys)
                .map_err(|e| SignerError::Other(e.to_string()))
        }
        .boxed()
    }
}
