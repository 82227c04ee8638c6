//! Key transparency service: the verification orchestrator.
//!
//! This module composes the leaf utilities (backoff, single-flight dedup,
//! durable scheduler, health classifier) with the injected collaborators
//! into the public verification API. External triggers (app start,
//! identifier changes, registration completion, explicit peer checks, the
//! periodic timer) all funnel into the same cancellable verification
//! routine; outcomes are folded into the persisted health state and may
//! surface a one-time alert on the transition into `Fail`.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::{
    backoff::BackOff,
    clock::Clock,
    collaborators::{
        AccountState, AlertSink, ConversationLookup, DirectoryCache, DirectoryTransport,
        FeatureFlag, IdentityLookup, SyncTrigger,
    },
    config::ServiceConfig,
    dedup::TaskDeduplicator,
    error::VerifyError,
    health::{HealthState, VerifyOutcome, classify},
    request::{E164Info, MonitorMode, VerificationRequest},
    scheduler::{CheckScheduler, SchedulerConfig},
    signal::{Signal, SignalWait},
    store::{KEY_NEXT_SELF_CHECK, KeyValueStore, StateStore},
};

const SELF_CHECK_TASK: &str = "kt-self-check";
const SYNC_REASON_INTERMITTENT: &str = "key-transparency-intermittent";

/// Everything the service needs from the surrounding application.
pub struct Collaborators {
    /// Identity-key lookup for arbitrary identifiers.
    pub identity: Arc<dyn IdentityLookup>,
    /// Conversation/peer store.
    pub conversations: Arc<dyn ConversationLookup>,
    /// Local account state.
    pub account: Arc<dyn AccountState>,
    /// The external directory-verification transport.
    pub transport: Arc<dyn DirectoryTransport>,
    /// Locally cached directory proofs.
    pub directory_cache: Arc<dyn DirectoryCache>,
    /// Fire-and-forget full-sync trigger.
    pub sync_trigger: Arc<dyn SyncTrigger>,
    /// Fired by the embedder once a requested sync completes.
    pub sync_complete: Signal,
    /// Sink for the one-time trust-failure alert.
    pub alerts: Arc<dyn AlertSink>,
    /// Remote feature gating.
    pub feature_flag: Arc<dyn FeatureFlag>,
    /// Durable key-value persistence.
    pub store: Arc<dyn KeyValueStore>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
}

/// The key transparency verification service.
///
/// Cheap to clone via its inner `Arc`; all operations are async and
/// cooperative, with cancellation supplied per call.
#[derive(Clone)]
pub struct KeyTransparencyService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    config: ServiceConfig,
    collab: Collaborators,
    state: StateStore,
    scheduler: CheckScheduler,
    self_check_dedup: TaskDeduplicator<()>,
}

impl KeyTransparencyService {
    /// Build a service over the given collaborators and configuration.
    pub fn new(collab: Collaborators, config: ServiceConfig) -> Self {
        let state = StateStore::new(collab.store.clone());
        let scheduler = CheckScheduler::new(
            SchedulerConfig {
                name: SELF_CHECK_TASK,
                interval: config.self_check_interval,
                storage_key: KEY_NEXT_SELF_CHECK,
                backoff_timeouts: config.scheduler_backoff.clone(),
            },
            collab.store.clone(),
            collab.clock.clone(),
        );
        Self {
            inner: Arc::new(ServiceInner {
                config,
                collab,
                state,
                scheduler,
                self_check_dedup: TaskDeduplicator::new(SELF_CHECK_TASK),
            }),
        }
    }

    /// Whether key transparency checks may run.
    ///
    /// The persisted disabled flag wins over the feature flag.
    pub async fn is_available(&self) -> crate::Result<bool> {
        self.inner.is_available().await.map_err(Into::into)
    }

    /// Disable key transparency and clear all persisted state.
    ///
    /// Idempotent. Cached proofs, the health reading, and the schedule
    /// watermark are cleared concurrently.
    pub async fn disable(&self) -> crate::Result<()> {
        let inner = &self.inner;
        info!("Disabling key transparency");
        inner.state.set_disabled().await?;
        tokio::try_join!(
            inner.state.clear_health(),
            inner.state.clear_schedule(),
            inner.collab.directory_cache.clear(),
        )?;
        Ok(())
    }

    /// Start the periodic self-check schedule.
    ///
    /// Errors if already started. The schedule resumes from the persisted
    /// watermark, so a past-due run after a restart fires promptly.
    pub fn start(&self) -> crate::Result<()> {
        let callback_inner = self.inner.clone();
        self.inner.scheduler.start(Arc::new(move || {
            let inner = callback_inner.clone();
            Box::pin(async move {
                inner
                    .self_check(&CancellationToken::new())
                    .await
                    .map_err(crate::Error::from)
            })
        }))?;
        Ok(())
    }

    /// Stop the periodic self-check schedule. Idempotent.
    pub fn stop(&self) {
        self.inner.scheduler.stop();
    }

    /// An identity-affecting event occurred locally; debounce the next
    /// self-check so the change has time to propagate.
    pub fn on_known_identifier_change(&self) -> crate::Result<()> {
        self.inner
            .scheduler
            .delay_by(self.inner.config.trigger_debounce)?;
        Ok(())
    }

    /// Registration just completed; force a self-check after the debounce
    /// delay.
    pub fn on_registration_done(&self) -> crate::Result<()> {
        let at = self.inner.collab.clock.now_millis()
            + self.inner.config.trigger_debounce.as_millis() as u64;
        self.inner.scheduler.run_at(at)?;
        Ok(())
    }

    /// Verify a conversation peer's identifier→key binding.
    ///
    /// After the peer verifies, our own health gates the result: a peer's
    /// proof is not trustworthy if we cannot verify our own binding.
    pub async fn check(&self, peer: &str, cancel: &CancellationToken) -> Result<(), VerifyError> {
        let inner = self.inner.clone();
        inner
            .check(peer, cancel)
            .instrument(info_span!("kt_check", peer = %peer))
            .await
    }

    /// Verify our own binding. Single-flight: concurrent callers coalesce
    /// onto one underlying verification and share its outcome.
    pub async fn self_check(&self, cancel: &CancellationToken) -> Result<(), VerifyError> {
        self.inner.clone().self_check(cancel).await
    }
}

impl ServiceInner {
    async fn is_available(&self) -> Result<bool, crate::store::StoreError> {
        if self.state.is_disabled().await? {
            return Ok(false);
        }
        Ok(self.collab.feature_flag.key_transparency_enabled())
    }

    async fn self_check(self: Arc<Self>, cancel: &CancellationToken) -> Result<(), VerifyError> {
        let factory_inner = self.clone();
        self.self_check_dedup
            .run(cancel, move |work| async move {
                factory_inner
                    .self_check_impl(work)
                    .instrument(info_span!("kt_self_check"))
                    .await
            })
            .await
    }

    async fn check(self: Arc<Self>, peer: &str, cancel: &CancellationToken) -> Result<(), VerifyError> {
        if !self.is_available().await.unwrap_or(false) {
            return Err(VerifyError::NotAvailable);
        }
        if cancel.is_cancelled() {
            return Err(VerifyError::Aborted);
        }

        let peer_identity = self
            .collab
            .conversations
            .get(peer)
            .await
            .ok_or_else(|| VerifyError::NotFound(format!("no conversation for peer {peer}")))?;
        let aci = peer_identity
            .aci
            .ok_or_else(|| VerifyError::NotFound(format!("no aci for peer {peer}")))?;
        let identity_key = self
            .collab
            .identity
            .identity_key(&aci)
            .await
            .ok_or_else(|| VerifyError::NotFound(format!("no identity key for {aci}")))?;

        let mut request = VerificationRequest::new(aci, identity_key);
        if let (Some(e164), Some(access_key)) = (peer_identity.e164, peer_identity.access_key) {
            request.e164_info = Some(E164Info { e164, access_key });
        }

        self.verify(&request, cancel).await?;

        if cancel.is_cancelled() {
            return Err(VerifyError::Aborted);
        }

        // Gate on our own binding: verify ourselves first if we never have,
        // and refuse to vouch for a peer while our own check is failing.
        let mut own_health = self.read_health().await;
        if own_health == HealthState::Unknown {
            debug!("Own health unknown; running self check before trusting peer result");
            match self.clone().self_check(cancel).await {
                Ok(()) => {}
                Err(VerifyError::Aborted) => return Err(VerifyError::Aborted),
                Err(e) => {
                    debug!("Self check failed during peer check: {e}");
                    return Err(VerifyError::SelfCheckFailed);
                }
            }
            own_health = self.read_health().await;
        }
        if !own_health.is_ok() {
            return Err(VerifyError::SelfCheckFailed);
        }

        info!(peer = %peer, "Peer binding verified");
        Ok(())
    }

    /// The single physical self-check execution behind the deduplicator.
    async fn self_check_impl(self: Arc<Self>, work: CancellationToken) -> Result<(), VerifyError> {
        if !self.is_available().await.unwrap_or(false) {
            debug!("Key transparency not available; skipping self check");
            return Ok(());
        }
        let Some(account) = self.collab.account.local_account().await else {
            debug!("Not registered yet; skipping self check");
            return Ok(());
        };

        let mut request = VerificationRequest::new(account.aci, account.identity_key);
        if account.phone_discoverable {
            request.e164_info = account.e164_info;
        }
        if !account.username_corrupted {
            request.username_hash = account.username_hash;
        }

        let previous = self.read_health().await;

        // An intermittent reading is often a stale local cache rather than
        // a genuine mismatch: force a storage sync and give it a bounded
        // window to land before verifying again.
        if previous == HealthState::Intermittent {
            let listener = self.collab.sync_complete.subscribe();
            self.collab.sync_trigger.request_full_sync(SYNC_REASON_INTERMITTENT);
            match listener.wait(self.config.sync_wait_timeout, &work).await {
                SignalWait::Cancelled => return Err(VerifyError::Aborted),
                SignalWait::Notified => debug!("Storage sync completed before self check"),
                SignalWait::TimedOut => {
                    debug!("Storage sync did not complete in time; verifying anyway")
                }
            }
        }

        if work.is_cancelled() {
            return Err(VerifyError::Aborted);
        }

        match self.verify(&request, &work).await {
            Ok(()) => {
                self.write_health(HealthState::Ok).await;
                info!("Self check verified own binding");
                Ok(())
            }
            Err(VerifyError::Aborted) => Err(VerifyError::Aborted),
            Err(error) => {
                let next = classify(previous, VerifyOutcome::from_error(&error));
                warn!(?previous, ?next, "Self check failed: {error}");
                self.write_health(next).await;

                if next == HealthState::Fail && previous != HealthState::Fail {
                    if self.config.suppress_alerts {
                        info!("Alert suppressed by testing override");
                    } else {
                        self.collab.alerts.notify_trust_verification_failed().await;
                    }
                }

                if next == HealthState::Intermittent {
                    self.clone().spawn_intermittent_retry();
                }

                Err(error)
            }
        }
    }

    /// Verify one request against the directory, retrying transient
    /// failures through a single backoff chain.
    ///
    /// An explicit loop carries the chain across retries; the same
    /// `BackOff` keeps advancing until it is exhausted, at which point the
    /// last transient error surfaces unchanged.
    async fn verify(
        &self,
        request: &VerificationRequest,
        cancel: &CancellationToken,
    ) -> Result<(), VerifyError> {
        let mode = match self.collab.account.local_account().await {
            Some(account) if account.aci == request.aci => MonitorMode::Own,
            _ => MonitorMode::Other,
        };

        let mut backoff = BackOff::new(&self.config.verify_backoff);
        loop {
            if cancel.is_cancelled() {
                return Err(VerifyError::Aborted);
            }

            let cached = self
                .collab
                .directory_cache
                .get(&request.aci)
                .await
                .map_err(|e| VerifyError::Unknown(e.to_string()))?;

            let attempt = match cached {
                // First-time discovery: no local proof to monitor against.
                None => self.collab.transport.search(request, cancel).await,
                Some(_) => self.collab.transport.monitor(request, mode, cancel).await,
            };

            let error = match attempt {
                Ok(()) => return Ok(()),
                Err(transport_error) => VerifyError::from(transport_error),
            };

            if cancel.is_cancelled() || error.is_aborted() {
                return Err(VerifyError::Aborted);
            }
            if !error.is_retryable() {
                return Err(error);
            }
            let Some(table_pause) = backoff.next() else {
                return Err(error);
            };
            if backoff.is_full() {
                // The chain has passed its last entry; surface the error.
                return Err(error);
            }

            // Rate limiting sleeps the server-mandated delay; the table
            // slot is still consumed so the chain stays bounded.
            let pause = match &error {
                VerifyError::RateLimited { retry_after } => *retry_after,
                _ => table_pause,
            };
            debug!(aci = %request.aci, ?pause, "Transient verification failure, retrying: {error}");

            tokio::select! {
                _ = cancel.cancelled() => return Err(VerifyError::Aborted),
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    /// Schedule the dedicated post-`intermittent` retry, distinct from the
    /// periodic schedule.
    fn spawn_intermittent_retry(self: Arc<Self>) {
        let delay = self.config.intermittent_retry_delay;
        debug!(?delay, "Scheduling dedicated retry after intermittent result");
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = self.self_check(&CancellationToken::new()).await {
                debug!("Intermittent retry self check failed: {e}");
            }
        });
    }

    async fn read_health(&self) -> HealthState {
        match self.state.health().await {
            Ok(health) => health,
            Err(e) => {
                warn!("Failed to read persisted health, assuming unknown: {e}");
                HealthState::Unknown
            }
        }
    }

    async fn write_health(&self, health: HealthState) {
        if let Err(e) = self.state.set_health(health).await {
            warn!("Failed to persist health state: {e}");
        }
    }
}
