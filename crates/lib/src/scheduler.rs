//! Durable periodic scheduler with manual delay and force-run controls.
//!
//! A [`CheckScheduler`] drives a recurring callback from a background task,
//! persisting its next-run watermark through the key-value store so that a
//! restart resumes the schedule instead of resetting it: a past-due
//! watermark fires promptly, a future one arms a timer for the remaining
//! delta. Control commands (`delay_by`, `run_at`) flow through a command
//! channel, the same actor shape as a background sync engine.

use std::{future::Future, pin::Pin, sync::Arc, sync::Mutex, time::Duration};

use tokio::sync::mpsc;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::{
    backoff::BackOff,
    clock::Clock,
    error::SchedulerError,
    store::{KeyValueStore, read_watermark, write_watermark},
};

/// The recurring operation driven by the scheduler.
///
/// Errors are caught and logged by the scheduler; they pace the next
/// attempt through the scheduler's own backoff but never stop it.
pub type CheckCallback =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = crate::Result<()>> + Send>> + Send + Sync>;

/// Static configuration of one scheduler instance.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Logical name, used in logs and errors.
    pub name: &'static str,
    /// Interval between successful runs.
    pub interval: Duration,
    /// Key under which the next-run watermark is persisted.
    pub storage_key: &'static str,
    /// Sleep table applied after failed callback runs.
    pub backoff_timeouts: Vec<Duration>,
}

enum SchedulerCommand {
    /// Push the next run to `max(current, now + delay)`.
    DelayBy(Duration),
    /// Force the next run to occur at or after the given epoch millis.
    RunAt(u64),
}

/// Durable periodic scheduler.
pub struct CheckScheduler {
    config: SchedulerConfig,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    command_tx: Mutex<Option<mpsc::Sender<SchedulerCommand>>>,
}

impl CheckScheduler {
    /// Create a scheduler; it does nothing until [`CheckScheduler::start`].
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            store,
            clock,
            command_tx: Mutex::new(None),
        }
    }

    /// Start the background task driving the callback.
    ///
    /// Errors if the scheduler is already running. The persisted next-run
    /// watermark is rehydrated first; a past-due or absent watermark makes
    /// the first run fire promptly.
    pub fn start(&self, callback: CheckCallback) -> Result<(), SchedulerError> {
        let mut slot = self.command_tx.lock().unwrap();
        if slot.is_some() {
            return Err(SchedulerError::AlreadyRunning {
                name: self.config.name,
            });
        }

        let (tx, rx) = mpsc::channel(16);
        *slot = Some(tx);

        let actor = SchedulerActor {
            config: self.config.clone(),
            store: self.store.clone(),
            clock: self.clock.clone(),
            callback,
            command_rx: rx,
        };
        let span = info_span!("check_scheduler", name = self.config.name);
        tokio::spawn(actor.run().instrument(span));
        Ok(())
    }

    /// Debounce: push the next run to `max(current_next, now + delay)`.
    ///
    /// Never pulls a run earlier; a run already scheduled further out wins.
    pub fn delay_by(&self, delay: Duration) -> Result<(), SchedulerError> {
        self.send(SchedulerCommand::DelayBy(delay))
    }

    /// Force the next run to occur at or after `at_millis`, once.
    ///
    /// Afterwards the schedule reverts to interval-based.
    pub fn run_at(&self, at_millis: u64) -> Result<(), SchedulerError> {
        self.send(SchedulerCommand::RunAt(at_millis))
    }

    /// Stop the background task. Idempotent.
    pub fn stop(&self) {
        // Dropping the sender ends the actor's command loop.
        self.command_tx.lock().unwrap().take();
    }

    /// Whether the background task is running.
    pub fn is_running(&self) -> bool {
        self.command_tx.lock().unwrap().is_some()
    }

    fn send(&self, command: SchedulerCommand) -> Result<(), SchedulerError> {
        let slot = self.command_tx.lock().unwrap();
        let tx = slot.as_ref().ok_or(SchedulerError::NotRunning {
            name: self.config.name,
        })?;
        tx.try_send(command).map_err(|_| SchedulerError::NotRunning {
            name: self.config.name,
        })
    }
}

struct SchedulerActor {
    config: SchedulerConfig,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    callback: CheckCallback,
    command_rx: mpsc::Receiver<SchedulerCommand>,
}

impl SchedulerActor {
    async fn run(mut self) {
        info!("Starting scheduler");

        let mut next_run_at = match read_watermark(self.store.as_ref(), self.config.storage_key)
            .await
        {
            Ok(Some(at)) => at,
            Ok(None) => self.clock.now_millis(),
            Err(e) => {
                warn!("Failed to read persisted schedule, running promptly: {e}");
                self.clock.now_millis()
            }
        };

        // One backoff chain per failure streak; reset on success.
        let mut failure_backoff: Option<BackOff> = None;

        loop {
            let now = self.clock.now_millis();
            let delay = Duration::from_millis(next_run_at.saturating_sub(now));

            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(SchedulerCommand::DelayBy(delay)) => {
                        let candidate = self.clock.now_millis() + delay.as_millis() as u64;
                        if candidate > next_run_at {
                            debug!(next_run_at = candidate, "Delaying next run");
                            next_run_at = candidate;
                            self.persist(next_run_at).await;
                        }
                    }
                    Some(SchedulerCommand::RunAt(at)) => {
                        debug!(next_run_at = at, "Forcing next run");
                        next_run_at = at;
                        self.persist(next_run_at).await;
                    }
                    None => {
                        info!("Scheduler shutting down");
                        break;
                    }
                },

                _ = tokio::time::sleep(delay) => {
                    debug!("Running scheduled callback");
                    let result = (self.callback)().await;
                    let now = self.clock.now_millis();
                    next_run_at = match result {
                        Ok(()) => {
                            failure_backoff = None;
                            now + self.config.interval.as_millis() as u64
                        }
                        Err(e) => {
                            warn!("Scheduled callback failed: {e}");
                            let backoff = failure_backoff.get_or_insert_with(|| {
                                BackOff::new(&self.config.backoff_timeouts)
                            });
                            match backoff.next() {
                                Some(pause) => now + pause.as_millis() as u64,
                                // Chain exhausted; fall back to the interval.
                                None => now + self.config.interval.as_millis() as u64,
                            }
                        }
                    };
                    self.persist(next_run_at).await;
                }
            }
        }
    }

    async fn persist(&self, next_run_at: u64) {
        if let Err(e) =
            write_watermark(self.store.as_ref(), self.config.storage_key, next_run_at).await
        {
            warn!("Failed to persist schedule watermark: {e}");
        }
    }
}
