//! Health state for the local account's directory binding.
//!
//! Verification outcomes are folded into a persisted [`HealthState`] by a
//! pure classifier with hysteresis: a single authoritative failure from a
//! clean baseline lands on `Intermittent`, and only a second consecutive
//! failure escalates to `Fail`. This keeps one transient blip from raising
//! a user-facing alarm.

use serde::{Deserialize, Serialize};

use crate::error::VerifyError;

/// Persisted verification health of the local account binding.
///
/// Absent persisted state reads as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// No conclusive verification result yet.
    #[default]
    Unknown,
    /// Last verification succeeded.
    Ok,
    /// One verification failure observed; not yet alarming.
    Intermittent,
    /// Two consecutive failures (or one unrecognized error). Alarming.
    Fail,
}

impl HealthState {
    /// States that gate peer checks: a peer's proof is only trustworthy
    /// when our own binding verifies.
    pub fn is_ok(&self) -> bool {
        matches!(self, HealthState::Ok)
    }
}

/// Classification-relevant shape of a verification outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Verification succeeded.
    Success,
    /// Authoritative mismatch from the directory.
    Failed,
    /// Transient transport failure with retries exhausted.
    Transient,
    /// Unrecognized error kind.
    Unexpected,
}

impl VerifyOutcome {
    /// Map a terminal verification error into its outcome class.
    ///
    /// Only errors that escaped the retry loop reach classification;
    /// `Aborted` and availability errors are never classified and must not
    /// be passed here.
    pub fn from_error(error: &VerifyError) -> Self {
        match error {
            VerifyError::VerificationFailed(_) => VerifyOutcome::Failed,
            VerifyError::TransientTransport(_) | VerifyError::RateLimited { .. } => {
                VerifyOutcome::Transient
            }
            _ => VerifyOutcome::Unexpected,
        }
    }
}

/// Fold one verification outcome into the previous health state.
///
/// Note the deliberate asymmetry: a transient failure from a clean
/// (`Ok`/`Unknown`) baseline lands on `Unknown`, not `Intermittent`. A
/// purely transient blip from a clean slate does not start the escalation
/// path.
pub fn classify(previous: HealthState, outcome: VerifyOutcome) -> HealthState {
    match outcome {
        VerifyOutcome::Success => HealthState::Ok,
        VerifyOutcome::Failed => match previous {
            HealthState::Intermittent | HealthState::Fail => HealthState::Fail,
            HealthState::Unknown | HealthState::Ok => HealthState::Intermittent,
        },
        VerifyOutcome::Transient => match previous {
            // Already degraded: a transient blip neither clears nor
            // escalates the reading.
            HealthState::Intermittent | HealthState::Fail => previous,
            HealthState::Unknown | HealthState::Ok => HealthState::Unknown,
        },
        VerifyOutcome::Unexpected => HealthState::Fail,
    }
}
