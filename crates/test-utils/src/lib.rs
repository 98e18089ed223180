//! Shared fixtures for `ferryman` tests: config builders, a fake executor
//! backend, a scripted copy engine and a full-runtime harness.

pub mod builders;
pub mod fake_executor;
pub mod harness;
pub mod scripted_engine;

use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Install a per-test log writer once per test binary.
///
/// Output is only shown for failing tests. The filter is read from
/// `FERRYMAN_LOG` (same directives as the binary), defaulting to `info`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("FERRYMAN_LOG")
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let _ = fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .try_init();
    });
}

/// Fail the test if `f` has not finished within five seconds.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(Duration::from_secs(5), f)
        .await
        .expect("test timed out after 5s")
}

/// Poll `check` every few milliseconds until it returns `Some`.
///
/// Meant to be wrapped in [`with_timeout`].
pub async fn eventually<T>(mut check: impl FnMut() -> Option<T>) -> T {
    loop {
        if let Some(value) = check() {
            return value;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
