//! Timeout-sequence generator for one retry chain.
//!
//! A [`BackOff`] walks an ordered table of sleep durations. Each top-level
//! verification chain constructs its own instance and carries it across
//! retries; instances are never shared between independent chains, so one
//! flapping operation cannot starve another's retry budget.

use std::time::Duration;

/// Stateful cursor over an ordered table of retry timeouts.
#[derive(Debug, Clone)]
pub struct BackOff {
    timeouts: Vec<Duration>,
    index: usize,
}

impl BackOff {
    /// Create a backoff chain over the given timeout table.
    pub fn new(timeouts: &[Duration]) -> Self {
        Self {
            timeouts: timeouts.to_vec(),
            index: 0,
        }
    }

    /// Return the timeout at the cursor and advance it.
    ///
    /// Returns `None` once the table is exhausted; callers must stop
    /// retrying and surface their error at that point.
    pub fn next(&mut self) -> Option<Duration> {
        let timeout = self.timeouts.get(self.index).copied()?;
        self.index += 1;
        Some(timeout)
    }

    /// True once the cursor has passed the last table entry.
    pub fn is_full(&self) -> bool {
        self.index >= self.timeouts.len()
    }
}
