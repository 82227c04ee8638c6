//! Retry and backoff behavior of the verification routine.
//!
//! All tests run under tokio's paused clock, so sleep assertions are exact.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use keywatch::{
    VerifyError,
    collaborators::TransportError,
    request::{DirectoryRecord, MonitorMode},
};

use crate::helpers::{PEER, PEER_ACI, SELF_ACI, TestContext};

#[tokio::test(start_paused = true)]
async fn succeeds_after_k_transient_failures_sleeping_first_k_table_values() {
    let ctx = TestContext::new();
    ctx.transport.push_failures(TransportError::ServiceInactive, 3);

    let started = tokio::time::Instant::now();
    let cancel = CancellationToken::new();
    ctx.service.self_check(&cancel).await.unwrap();

    // 3 failures then success: slept exactly 10 + 20 + 30 ms.
    assert_eq!(started.elapsed(), Duration::from_millis(60));
    assert_eq!(ctx.transport.search_calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn exhausted_backoff_rethrows_the_final_transient_error() {
    let ctx = TestContext::new();
    // Table has 4 entries; the transport never recovers.
    ctx.transport.set_default_error(TransportError::Io("reset".into()));

    let cancel = CancellationToken::new();
    let result = ctx.service.self_check(&cancel).await;

    assert!(matches!(result, Err(VerifyError::TransientTransport(_))));
    // The chain bounds total attempts to the table length; no extra retry
    // after exhaustion.
    assert_eq!(ctx.transport.search_calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn rate_limiting_sleeps_the_server_mandated_delay() {
    let ctx = TestContext::new();
    ctx.transport.push(Err(TransportError::RateLimited {
        retry_after: Duration::from_secs(7),
    }));

    let started = tokio::time::Instant::now();
    let cancel = CancellationToken::new();
    ctx.service.self_check(&cancel).await.unwrap();

    // The table slot is consumed but the sleep is the server's value.
    assert_eq!(started.elapsed(), Duration::from_secs(7));
    assert_eq!(ctx.transport.search_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn verification_failure_is_terminal_and_never_retried() {
    let ctx = TestContext::new();
    ctx.transport
        .push(Err(TransportError::VerificationFailed("mismatch".into())));

    let started = tokio::time::Instant::now();
    let cancel = CancellationToken::new();
    let result = ctx.service.self_check(&cancel).await;

    assert!(matches!(result, Err(VerifyError::VerificationFailed(_))));
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(ctx.transport.search_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn unrecognized_errors_are_terminal() {
    let ctx = TestContext::new();
    ctx.transport
        .push(Err(TransportError::Other("novel failure".into())));

    let cancel = CancellationToken::new();
    let result = ctx.service.self_check(&cancel).await;

    assert!(matches!(result, Err(VerifyError::Unknown(_))));
    assert_eq!(ctx.transport.search_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn no_cached_record_uses_search_mode() {
    let ctx = TestContext::new();
    let cancel = CancellationToken::new();
    ctx.service.self_check(&cancel).await.unwrap();

    assert_eq!(ctx.transport.search_calls(), 1);
    assert_eq!(ctx.transport.monitor_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn cached_record_uses_monitor_mode_own_for_self() {
    let ctx = TestContext::new();
    ctx.cache.insert(SELF_ACI, DirectoryRecord(vec![9]));

    let cancel = CancellationToken::new();
    ctx.service.self_check(&cancel).await.unwrap();

    assert_eq!(ctx.transport.search_calls(), 0);
    assert_eq!(ctx.transport.modes(), vec![MonitorMode::Own]);
}

#[tokio::test(start_paused = true)]
async fn cached_record_uses_monitor_mode_other_for_peers() {
    let ctx = TestContext::new();
    ctx.cache.insert(PEER_ACI, DirectoryRecord(vec![9]));
    // Make our own health pass the gate without a second verification.
    ctx.state
        .set_health(keywatch::HealthState::Ok)
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    ctx.service.check(PEER, &cancel).await.unwrap();

    assert_eq!(ctx.transport.modes(), vec![MonitorMode::Other]);
}

#[tokio::test(start_paused = true)]
async fn cancelled_caller_aborts_before_any_transport_call() {
    let ctx = TestContext::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = ctx.service.self_check(&cancel).await;
    assert!(matches!(result, Err(VerifyError::Aborted)));
    assert_eq!(ctx.transport.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_a_backoff_sleep() {
    let ctx = TestContext::new();
    ctx.transport.set_default_error(TransportError::ServiceInactive);

    let cancel = CancellationToken::new();
    let service = ctx.service.clone();
    let check = {
        let cancel = cancel.clone();
        tokio::spawn(async move { service.self_check(&cancel).await })
    };

    // Land inside the first 10ms backoff sleep, then cancel.
    tokio::time::sleep(Duration::from_millis(5)).await;
    cancel.cancel();

    let result = check.await.unwrap();
    assert!(matches!(result, Err(VerifyError::Aborted)));
    assert_eq!(ctx.transport.search_calls(), 1);
}
