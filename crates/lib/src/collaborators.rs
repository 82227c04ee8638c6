//! Boundary traits for the external collaborators.
//!
//! The verification core is a pure orchestration layer: everything it needs
//! from the surrounding application (identity data, the directory
//! transport, cached proofs, sync triggering, alerting, feature flags) is
//! injected through the traits in this module. There is no ambient global
//! state, which keeps the engine independently testable.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
    error::VerifyError,
    request::{Aci, DirectoryRecord, E164Info, IdentityKey, MonitorMode, VerificationRequest},
    store::StoreError,
};

/// Identity-key lookup for arbitrary identifiers.
#[async_trait]
pub trait IdentityLookup: Send + Sync {
    /// The identity key the app has cached for `aci`, if any.
    async fn identity_key(&self, aci: &Aci) -> Option<IdentityKey>;
}

/// What the conversation store knows about a peer.
#[derive(Debug, Clone, Default)]
pub struct PeerIdentity {
    /// The peer's account identifier, if known.
    pub aci: Option<Aci>,
    /// The peer's phone number, if shared.
    pub e164: Option<String>,
    /// Unidentified-access key for the peer, if available.
    pub access_key: Option<Vec<u8>>,
}

/// Conversation/peer lookup.
#[async_trait]
pub trait ConversationLookup: Send + Sync {
    /// Cached identity data for a conversation peer, if the conversation
    /// exists.
    async fn get(&self, peer: &str) -> Option<PeerIdentity>;
}

/// Snapshot of the local account as far as verification is concerned.
#[derive(Debug, Clone)]
pub struct LocalAccount {
    /// Our own account identifier.
    pub aci: Aci,
    /// Our own identity key.
    pub identity_key: IdentityKey,
    /// Our phone number with access key, if we have one.
    pub e164_info: Option<E164Info>,
    /// Whether the phone number is flagged locally discoverable.
    pub phone_discoverable: bool,
    /// Our username hash, if a username is set.
    pub username_hash: Option<Vec<u8>>,
    /// Whether the username is flagged corrupted locally.
    pub username_corrupted: bool,
}

/// Access to the local account's identity state.
#[async_trait]
pub trait AccountState: Send + Sync {
    /// The local account snapshot, or `None` before registration.
    async fn local_account(&self) -> Option<LocalAccount>;
}

/// Error surface of the external directory-verification library.
///
/// This is the adapter seam: whatever error enum the underlying library
/// exposes is mapped into these kinds by the transport implementation, and
/// from here into the closed [`VerifyError`] taxonomy. The core never sees
/// the library's own types.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The directory rejected the binding. Terminal.
    #[error("Directory rejected the binding: {0}")]
    VerificationFailed(String),

    /// The directory service is inactive or unreachable.
    #[error("Directory service inactive")]
    ServiceInactive,

    /// Network or I/O failure.
    #[error("I/O failure: {0}")]
    Io(String),

    /// Server-side rate limiting with a mandated delay.
    #[error("Rate limited for {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// The operation was cancelled through its token.
    #[error("Cancelled")]
    Cancelled,

    /// Anything the adapter does not recognize.
    #[error("Unrecognized transport error: {0}")]
    Other(String),
}

impl From<TransportError> for VerifyError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::VerificationFailed(msg) => VerifyError::VerificationFailed(msg),
            TransportError::ServiceInactive => {
                VerifyError::TransientTransport("service inactive".to_string())
            }
            TransportError::Io(msg) => VerifyError::TransientTransport(msg),
            TransportError::RateLimited { retry_after } => VerifyError::RateLimited { retry_after },
            TransportError::Cancelled => VerifyError::Aborted,
            TransportError::Other(msg) => VerifyError::Unknown(msg),
        }
    }
}

/// The external directory-verification transport.
#[async_trait]
pub trait DirectoryTransport: Send + Sync {
    /// First-time lookup of an identifier with no locally cached proof.
    async fn search(
        &self,
        request: &VerificationRequest,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError>;

    /// Incremental re-verification against a previously cached proof.
    async fn monitor(
        &self,
        request: &VerificationRequest,
        mode: MonitorMode,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError>;
}

/// Locally cached directory proofs.
#[async_trait]
pub trait DirectoryCache: Send + Sync {
    /// The cached proof for `aci`, if one exists.
    async fn get(&self, aci: &Aci) -> Result<Option<DirectoryRecord>, StoreError>;

    /// Drop all cached proofs. Used when key transparency is disabled.
    async fn clear(&self) -> Result<(), StoreError>;
}

/// Fire-and-forget request for a full device-to-device storage sync.
///
/// Completion is announced separately through a [`crate::signal::Signal`]
/// owned by the embedder.
pub trait SyncTrigger: Send + Sync {
    /// Ask the sync subsystem to run a full sync.
    fn request_full_sync(&self, reason: &str);
}

/// Sink for the one-time trust-failure alert.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Surface the "trust verification failed" alert to the user.
    async fn notify_trust_verification_failed(&self);
}

/// Remote feature gating.
pub trait FeatureFlag: Send + Sync {
    /// Whether key transparency checks are enabled for this install.
    fn key_transparency_enabled(&self) -> bool;
}
