//! Error types for directory verification.
//!
//! The verification flow discriminates errors into a closed taxonomy: only
//! the transient kinds are ever retried, and only while a retry chain's
//! backoff table is not exhausted. Everything else propagates to the caller
//! unchanged.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by verification operations.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum VerifyError {
    /// The caller cancelled the operation. Never retried, never classified.
    #[error("Operation aborted by caller")]
    Aborted,

    /// Key transparency is disabled (persisted flag or feature flag).
    #[error("Key transparency is not available")]
    NotAvailable,

    /// Identity or account data for the target is missing locally.
    #[error("Missing identity data: {0}")]
    NotFound(String),

    /// A peer check cannot be trusted because our own binding is unverified.
    #[error("Self check failed; own account binding is not verified")]
    SelfCheckFailed,

    /// The directory rejected the binding. Terminal and authoritative.
    #[error("Directory verification failed: {0}")]
    VerificationFailed(String),

    /// Service inactive or I/O failure. Retried via the backoff table.
    #[error("Transient transport failure: {0}")]
    TransientTransport(String),

    /// Server-side rate limiting. Retried after the server-specified delay.
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Unrecognized error from the verification library. Treated as failure.
    #[error("Unexpected verification error: {0}")]
    Unknown(String),
}

impl VerifyError {
    /// Check if this error kind is eligible for a retry inside the
    /// verification loop.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VerifyError::TransientTransport(_) | VerifyError::RateLimited { .. }
        )
    }

    /// Check if this is a caller-initiated cancellation.
    pub fn is_aborted(&self) -> bool {
        matches!(self, VerifyError::Aborted)
    }

    /// Check if this is an authoritative verification failure.
    pub fn is_verification_failed(&self) -> bool {
        matches!(self, VerifyError::VerificationFailed(_))
    }

    /// Check if this is a missing-data error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, VerifyError::NotFound(_))
    }
}

/// Errors from the scheduler lifecycle.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum SchedulerError {
    /// `start()` was called on a scheduler that is already running.
    #[error("Scheduler '{name}' is already running")]
    AlreadyRunning { name: &'static str },

    /// A control command was issued before `start()`.
    #[error("Scheduler '{name}' is not running")]
    NotRunning { name: &'static str },
}
