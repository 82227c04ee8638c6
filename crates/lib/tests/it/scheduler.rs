//! Durable scheduling: catch-up after restart, debounce and force-run
//! controls, and the scheduler's own failure backoff.

use std::time::Duration;

use keywatch::{
    Error, KeyValueStore, SchedulerError, collaborators::TransportError,
    store::KEY_NEXT_SELF_CHECK,
};

use crate::helpers::{TestContext, test_config, wait_until};

async fn watermark(ctx: &TestContext) -> Option<u64> {
    ctx.store
        .get(KEY_NEXT_SELF_CHECK)
        .await
        .unwrap()
        .map(|raw| raw.parse().unwrap())
}

async fn wait_for_watermark(ctx: &TestContext, expected: u64) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if watermark(ctx).await == Some(expected) {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "watermark never reached {expected}, currently {:?}",
            watermark(ctx).await
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn past_due_watermark_fires_promptly_on_start() {
    let ctx = TestContext::new();
    // Clock starts at 100_000; the persisted run is long past due.
    ctx.store
        .put(KEY_NEXT_SELF_CHECK, "50000".to_string())
        .await
        .unwrap();

    ctx.service.start().unwrap();
    assert!(wait_until(|| ctx.transport.total_calls() >= 1, Duration::from_secs(1)).await);

    // Rescheduled to now + interval.
    wait_for_watermark(&ctx, 160_000).await;
    ctx.service.stop();
}

#[tokio::test(start_paused = true)]
async fn absent_watermark_fires_promptly_on_start() {
    let ctx = TestContext::new();
    ctx.service.start().unwrap();
    assert!(wait_until(|| ctx.transport.total_calls() >= 1, Duration::from_secs(1)).await);
    ctx.service.stop();
}

#[tokio::test(start_paused = true)]
async fn future_watermark_waits_out_the_remaining_delta() {
    let ctx = TestContext::new();
    // One hour out from the clock's 100_000.
    ctx.store
        .put(KEY_NEXT_SELF_CHECK, (100_000u64 + 3_600_000).to_string())
        .await
        .unwrap();

    ctx.service.start().unwrap();

    tokio::time::sleep(Duration::from_secs(30 * 60)).await;
    assert_eq!(ctx.transport.total_calls(), 0);

    tokio::time::sleep(Duration::from_secs(31 * 60)).await;
    assert!(wait_until(|| ctx.transport.total_calls() >= 1, Duration::from_secs(1)).await);
    ctx.service.stop();
}

#[tokio::test(start_paused = true)]
async fn delay_by_never_pulls_a_run_earlier() {
    let ctx = TestContext::new();
    ctx.service.start().unwrap();
    wait_for_watermark(&ctx, 160_000).await;

    // now + debounce (5s) is earlier than the scheduled 160_000: no-op.
    ctx.service.on_known_identifier_change().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(watermark(&ctx).await, Some(160_000));

    // From 158_000, now + 5s lands past the scheduled run and wins.
    ctx.clock.set(158_000);
    ctx.service.on_known_identifier_change().unwrap();
    wait_for_watermark(&ctx, 163_000).await;
    ctx.service.stop();
}

#[tokio::test(start_paused = true)]
async fn run_at_forces_one_prompt_run_then_reverts_to_interval() {
    let ctx = TestContext::new();
    ctx.service.start().unwrap();
    assert!(wait_until(|| ctx.transport.total_calls() == 1, Duration::from_secs(1)).await);
    wait_for_watermark(&ctx, 160_000).await;

    // Registration completion forces a run at now + debounce (105_000).
    ctx.service.on_registration_done().unwrap();
    wait_for_watermark(&ctx, 105_000).await;

    // The forced run fires after the 5s delta, then the schedule reverts
    // to the interval-derived watermark.
    assert!(wait_until(|| ctx.transport.total_calls() == 2, Duration::from_secs(10)).await);
    wait_for_watermark(&ctx, 160_000).await;
    ctx.service.stop();
}

#[tokio::test(start_paused = true)]
async fn callback_errors_engage_the_scheduler_backoff_then_reset() {
    let ctx = TestContext::new();
    // Two terminal failures, then recovery.
    ctx.transport
        .push_failures(TransportError::VerificationFailed("mismatch".into()), 2);

    ctx.service.start().unwrap();

    // First run fails: next attempt after scheduler_backoff[0] = 30s.
    assert!(wait_until(|| ctx.transport.total_calls() == 1, Duration::from_secs(1)).await);
    wait_for_watermark(&ctx, 130_000).await;

    // Second run (30s later, plus the bounded sync wait for the now
    // intermittent health) fails: scheduler_backoff[1] = 60s.
    tokio::time::sleep(Duration::from_secs(40)).await;
    assert!(wait_until(|| ctx.transport.total_calls() == 2, Duration::from_secs(5)).await);
    wait_for_watermark(&ctx, 160_000).await;

    // Third run succeeds: backoff resets, schedule is interval-derived.
    tokio::time::sleep(Duration::from_secs(70)).await;
    assert!(wait_until(|| ctx.transport.total_calls() == 3, Duration::from_secs(5)).await);
    wait_for_watermark(&ctx, 160_000).await;
    ctx.service.stop();
}

#[tokio::test(start_paused = true)]
async fn start_twice_errors() {
    let ctx = TestContext::new();
    ctx.service.start().unwrap();
    assert!(matches!(
        ctx.service.start(),
        Err(Error::Scheduler(SchedulerError::AlreadyRunning { .. }))
    ));
    ctx.service.stop();
}

#[tokio::test(start_paused = true)]
async fn controls_error_when_not_started() {
    let ctx = TestContext::new();
    assert!(matches!(
        ctx.service.on_known_identifier_change(),
        Err(Error::Scheduler(SchedulerError::NotRunning { .. }))
    ));
    assert!(matches!(
        ctx.service.on_registration_done(),
        Err(Error::Scheduler(SchedulerError::NotRunning { .. }))
    ));
}

#[tokio::test(start_paused = true)]
async fn schedule_survives_a_restart() {
    let first = TestContext::new();
    first.service.start().unwrap();
    assert!(wait_until(|| first.transport.total_calls() == 1, Duration::from_secs(1)).await);
    wait_for_watermark(&first, 160_000).await;
    first.service.stop();

    // "Restart": a fresh service over the same store, with the clock now
    // past the persisted watermark. The overdue run fires promptly.
    let clock = std::sync::Arc::new(keywatch::ManualClock::new(200_000));
    let second = TestContext::over_store(test_config(), first.store.clone(), clock);
    second.service.start().unwrap();
    assert!(wait_until(|| second.transport.total_calls() >= 1, Duration::from_secs(1)).await);
    second.service.stop();
}
