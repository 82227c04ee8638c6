/*! Integration tests for keywatch.
 *
 * This test suite is organized as a single integration test binary
 * following the pattern described by matklad in
 * https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html
 *
 * The module structure mirrors the main library structure:
 * - verify: retry/backoff behavior of the verification routine
 * - scheduler: durable scheduling, catch-up, delay/force-run controls
 * - service: availability, peer checks, health transitions, alerting,
 *   single-flight self-checks, restart persistence
 */

use tracing_subscriber::EnvFilter;

#[ctor::ctor]
fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("keywatch=debug".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

mod scheduler;
mod verify;
