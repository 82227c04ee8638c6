//! One-shot signal with bounded, cancellable waiting.
//!
//! General-purpose primitive for "wait until something else announces
//! completion, but never hang": a [`Signal`] can be notified any number of
//! times, and a [`SignalListener`] subscribed *before* the triggering
//! request observes the next notification even if it fires while the waiter
//! is between subscribing and awaiting. Used here for storage-sync
//! completion, but not specific to it.

use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// A multi-producer notification source.
///
/// Internally a generation counter; each [`Signal::notify`] bumps it and
/// wakes every listener subscribed before the bump.
#[derive(Debug, Clone)]
pub struct Signal {
    generation: watch::Sender<u64>,
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl Signal {
    /// Create a signal with no pending notifications.
    pub fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self { generation }
    }

    /// Wake all current listeners.
    pub fn notify(&self) {
        self.generation.send_modify(|g| *g += 1);
    }

    /// Subscribe to the next notification.
    ///
    /// Notifications that fired before this call are not observed; any
    /// notification after it is, even if it lands before the listener is
    /// awaited.
    pub fn subscribe(&self) -> SignalListener {
        SignalListener {
            generation: self.generation.subscribe(),
        }
    }
}

/// Outcome of a bounded signal wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalWait {
    /// The signal fired.
    Notified,
    /// The timeout elapsed first (or the signal source was dropped).
    TimedOut,
    /// The caller's cancellation token fired first.
    Cancelled,
}

/// A subscription to one future [`Signal::notify`].
#[derive(Debug)]
pub struct SignalListener {
    generation: watch::Receiver<u64>,
}

impl SignalListener {
    /// Wait for the signal, bounded by `timeout` and by `cancel`.
    pub async fn wait(mut self, timeout: Duration, cancel: &CancellationToken) -> SignalWait {
        tokio::select! {
            _ = cancel.cancelled() => SignalWait::Cancelled,
            _ = tokio::time::sleep(timeout) => SignalWait::TimedOut,
            changed = self.generation.changed() => match changed {
                Ok(()) => SignalWait::Notified,
                // Source dropped; no notification can ever arrive.
                Err(_) => SignalWait::TimedOut,
            },
        }
    }
}
