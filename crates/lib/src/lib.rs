//! Keywatch: key transparency monitoring core.
//!
//! Keywatch maintains cryptographic trust in an account directory: it
//! periodically and on demand verifies that an identifier (the local
//! account's or a conversation peer's) is still bound to the public key
//! and metadata the application has cached, by consulting an append-only
//! verifiable directory through an injected transport.
//!
//! ## Core Concepts
//!
//! * **Service (`service::KeyTransparencyService`)**: the orchestrator
//!   exposing the public API; composes everything below over
//!   constructor-injected collaborators.
//! * **BackOff (`backoff::BackOff`)**: stateful timeout-sequence generator
//!   scoped to one retry chain.
//! * **TaskDeduplicator (`dedup::TaskDeduplicator`)**: single-flight
//!   coalescing of concurrent identical async operations.
//! * **CheckScheduler (`scheduler::CheckScheduler`)**: durable periodic
//!   scheduler with manual delay/force-run controls, persisted across
//!   restarts.
//! * **Health (`health`)**: hysteresis classifier folding verification
//!   outcomes into a persisted [`health::HealthState`].
//! * **Signal (`signal::Signal`)**: bounded, cancellable one-shot waiting,
//!   used for storage-sync completion.
//! * **Collaborators (`collaborators`)**: the boundary traits the embedding
//!   application implements, from identity lookup and directory transport
//!   to the proof cache, sync trigger, alert sink, and feature flag.
//!
//! All flows are cooperative async: cancellation tokens are honored at
//! entry, after awaits, and inside sleeps, and the only alert the service
//! ever raises fires exactly once, on the transition into
//! [`health::HealthState::Fail`].

pub mod backoff;
pub mod clock;
pub mod collaborators;
pub mod config;
pub mod dedup;
pub mod error;
pub mod health;
pub mod request;
pub mod scheduler;
pub mod service;
pub mod signal;
pub mod store;

pub use clock::{Clock, SystemClock};
#[cfg(any(test, feature = "testing"))]
pub use clock::ManualClock;
pub use config::ServiceConfig;
pub use error::{SchedulerError, VerifyError};
pub use health::HealthState;
pub use request::{Aci, IdentityKey, VerificationRequest};
pub use service::{Collaborators, KeyTransparencyService};
pub use store::{InMemoryStore, KeyValueStore, StoreError};

/// Result type used throughout the keywatch library.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for the keywatch library.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Verification-flow errors (the closed retry/classification taxonomy).
    #[error(transparent)]
    Verify(#[from] error::VerifyError),

    /// Scheduler lifecycle errors.
    #[error(transparent)]
    Scheduler(#[from] error::SchedulerError),

    /// Persistence errors.
    #[error(transparent)]
    Store(#[from] store::StoreError),
}

impl Error {
    /// Check if this is a caller-initiated cancellation.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Error::Verify(e) if e.is_aborted())
    }

    /// Check if this is a missing-data error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Verify(e) if e.is_not_found())
    }
}
