//! Static configuration for the verification service.
//!
//! Intervals and backoff tables are compile-time configuration, not
//! persisted state; only the next-run watermark and health reading survive
//! restarts.

use std::time::Duration;

/// Sleep table for retries inside a single verification chain.
///
/// Fibonacci-like growth; one chain makes at most as many transport
/// attempts as the table has entries.
pub const VERIFY_BACKOFF: [Duration; 6] = [
    Duration::from_secs(2),
    Duration::from_secs(4),
    Duration::from_secs(6),
    Duration::from_secs(10),
    Duration::from_secs(16),
    Duration::from_secs(26),
];

/// Sleep table for the scheduler after a failed callback run.
pub const SCHEDULER_BACKOFF: [Duration; 5] = [
    Duration::from_secs(30),
    Duration::from_secs(60),
    Duration::from_secs(90),
    Duration::from_secs(150),
    Duration::from_secs(240),
];

/// Tunables of the verification service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Period of the background self-check.
    pub self_check_interval: Duration,
    /// Debounce applied when identifier-affecting events fire locally.
    pub trigger_debounce: Duration,
    /// Delay before the dedicated retry after an `intermittent` reading.
    pub intermittent_retry_delay: Duration,
    /// Bound on waiting for storage-sync completion before verifying.
    pub sync_wait_timeout: Duration,
    /// Retry table used inside one verification chain.
    pub verify_backoff: Vec<Duration>,
    /// Retry table used by the scheduler after callback errors.
    pub scheduler_backoff: Vec<Duration>,
    /// Testing override: classify and persist failures but never alert.
    pub suppress_alerts: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            self_check_interval: Duration::from_secs(12 * 60 * 60),
            trigger_debounce: Duration::from_secs(5 * 60),
            intermittent_retry_delay: Duration::from_secs(30 * 60),
            sync_wait_timeout: Duration::from_secs(30),
            verify_backoff: VERIFY_BACKOFF.to_vec(),
            scheduler_backoff: SCHEDULER_BACKOFF.to_vec(),
            suppress_alerts: false,
        }
    }
}
