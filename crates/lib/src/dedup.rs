//! Single-flight coalescing of identical async operations.
//!
//! A [`TaskDeduplicator`] guarantees that at most one execution of a named
//! logical task is physically running at any instant: the first caller
//! starts the shared execution and owns it, later callers attach to the
//! same outcome. Only the owner's cancellation aborts the shared work; a
//! joiner's cancellation merely stops that joiner from waiting.

use std::{
    future::Future,
    sync::{Arc, Mutex},
};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::VerifyError;

type Outcome<T> = Result<T, VerifyError>;
type Slot<T> = Arc<Mutex<Option<InFlight<T>>>>;

struct InFlight<T> {
    outcome: watch::Receiver<Option<Outcome<T>>>,
    work: CancellationToken,
}

/// Clears the in-flight slot when the shared execution ends, including by
/// panic, so the deduplicator can never wedge shut.
struct SlotGuard<T>(Slot<T>);

impl<T> Drop for SlotGuard<T> {
    fn drop(&mut self) {
        *self.0.lock().unwrap() = None;
    }
}

/// Coalesces concurrent runs of one named async task.
pub struct TaskDeduplicator<T: Clone + Send + Sync + 'static> {
    name: &'static str,
    in_flight: Slot<T>,
}

impl<T: Clone + Send + Sync + 'static> TaskDeduplicator<T> {
    /// Create a deduplicator for the given logical task name.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            in_flight: Arc::new(Mutex::new(None)),
        }
    }

    /// Run the task, or attach to an execution already in flight.
    ///
    /// The factory is only invoked when no execution is running; it
    /// receives the shared work token, which is cancelled when the owning
    /// caller's `cancel` fires. All waiters observe the identical outcome.
    pub async fn run<F, Fut>(&self, cancel: &CancellationToken, factory: F) -> Outcome<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Outcome<T>> + Send + 'static,
    {
        if cancel.is_cancelled() {
            return Err(VerifyError::Aborted);
        }

        let (mut outcome_rx, work, is_owner) = {
            let mut slot = self.in_flight.lock().unwrap();
            if let Some(entry) = slot.as_ref() {
                debug!(task = self.name, "attaching to in-flight execution");
                (entry.outcome.clone(), entry.work.clone(), false)
            } else {
                debug!(task = self.name, "starting shared execution");
                let work = CancellationToken::new();
                let (outcome_tx, outcome_rx) = watch::channel(None);
                *slot = Some(InFlight {
                    outcome: outcome_rx.clone(),
                    work: work.clone(),
                });

                let guard = SlotGuard(self.in_flight.clone());
                let shared = factory(work.clone());
                let task_work = work.clone();
                tokio::spawn(async move {
                    let outcome = tokio::select! {
                        _ = task_work.cancelled() => Err(VerifyError::Aborted),
                        result = shared => result,
                    };
                    // Free the slot before publishing so a waiter that sees
                    // the outcome can immediately start a fresh execution.
                    drop(guard);
                    let _ = outcome_tx.send(Some(outcome));
                });

                (outcome_rx, work, true)
            }
        };

        loop {
            if let Some(outcome) = outcome_rx.borrow_and_update().as_ref() {
                return outcome.clone();
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    if is_owner {
                        debug!(task = self.name, "owner cancelled; aborting shared execution");
                        work.cancel();
                    } else {
                        debug!(task = self.name, "joiner cancelled; detaching");
                    }
                    return Err(VerifyError::Aborted);
                }
                changed = outcome_rx.changed() => {
                    if changed.is_err() {
                        // Execution task died without publishing (panic).
                        return Err(VerifyError::Unknown(
                            "shared execution terminated without an outcome".to_string(),
                        ));
                    }
                }
            }
        }
    }

    /// Whether an execution is currently in flight.
    pub fn is_running(&self) -> bool {
        self.in_flight.lock().unwrap().is_some()
    }
}
