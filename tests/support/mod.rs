//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::Once;

use kvop::op::ExecuteOptions;
use kvop::op::RetryConfig;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Install a test subscriber once, filtered by `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
    });
}

/// Options with millisecond backoff so conflict retries stay fast.
pub fn fast_options() -> ExecuteOptions {
    let fast = RetryConfig {
        initial_interval_ms: 1,
        max_interval_ms: 5,
        max_elapsed_ms: 5_000,
    };
    ExecuteOptions::default().with_retry(fast).with_transport_retry(fast)
}
