//! Retry configuration and the transport retry loop.
//!
//! Two independent budgets use the same randomized exponential backoff:
//!
//! - [`ExecuteOptions::retry`]: re-running a whole atomic operation after
//!   its write transaction lost an optimistic-concurrency race
//! - [`ExecuteOptions::transport_retry`]: re-submitting one physical request
//!   after a retryable store fault, nested inside one attempt

use std::time::Duration;

use kvop_constants::retry::DEFAULT_RETRY_INITIAL_INTERVAL_MS;
use kvop_constants::retry::DEFAULT_RETRY_MAX_ELAPSED_MS;
use kvop_constants::retry::DEFAULT_RETRY_MAX_INTERVAL_MS;
use kvop_constants::retry::DEFAULT_TRANSPORT_RETRY_MAX_ELAPSED_MS;
use kvop_constants::retry::MAX_RETRY_ATTEMPTS;
use kvop_core::KvClient;
use kvop_core::OpResponse;
use kvop_core::RequestOp;
use rand::Rng;
use serde::Deserialize;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::error::OpError;
use crate::verified::compute_backoff_step;

/// Backoff parameters of one retry budget.
///
/// A `max_elapsed_ms` of `0` disables retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// First backoff interval.
    pub initial_interval_ms: u64,
    /// Ceiling of a single interval.
    pub max_interval_ms: u64,
    /// Total time budget, measured from the first attempt.
    pub max_elapsed_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: DEFAULT_RETRY_INITIAL_INTERVAL_MS,
            max_interval_ms: DEFAULT_RETRY_MAX_INTERVAL_MS,
            max_elapsed_ms: DEFAULT_RETRY_MAX_ELAPSED_MS,
        }
    }
}

impl RetryConfig {
    /// Defaults of the transport retry budget.
    pub fn transport_default() -> Self {
        Self {
            max_elapsed_ms: DEFAULT_TRANSPORT_RETRY_MAX_ELAPSED_MS,
            ..Self::default()
        }
    }

    /// A configuration that never retries.
    pub fn disabled() -> Self {
        Self {
            max_elapsed_ms: 0,
            ..Self::default()
        }
    }
}

/// Options of one `execute` call.
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Budget for re-running an atomic operation after a conflict.
    pub retry: RetryConfig,
    /// Budget for re-submitting a request after a retryable store fault.
    pub transport_retry: RetryConfig,
    /// Aborts round trips and backoff waits.
    pub cancel: CancellationToken,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            transport_retry: RetryConfig::transport_default(),
            cancel: CancellationToken::new(),
        }
    }
}

impl ExecuteOptions {
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_transport_retry(mut self, transport_retry: RetryConfig) -> Self {
        self.transport_retry = transport_retry;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Stateful backoff over one retry budget.
#[derive(Debug)]
pub(crate) struct Backoff {
    config: RetryConfig,
    started: Instant,
    interval_ms: u64,
    attempts: u32,
}

impl Backoff {
    pub(crate) fn new(config: RetryConfig) -> Self {
        Self {
            config,
            started: Instant::now(),
            interval_ms: config.initial_interval_ms.min(config.max_interval_ms),
            attempts: 1,
        }
    }

    /// Delay before the next attempt, or `None` when the budget is exhausted.
    pub(crate) fn next_delay(&mut self) -> Option<Duration> {
        if self.config.max_elapsed_ms == 0 || self.attempts >= MAX_RETRY_ATTEMPTS {
            return None;
        }
        let step = compute_backoff_step(self.interval_ms, self.config.max_interval_ms, rand::rng().random::<u64>());
        let elapsed_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        if elapsed_ms.saturating_add(step.sleep_ms) > self.config.max_elapsed_ms {
            return None;
        }
        self.interval_ms = step.next_interval_ms;
        self.attempts = self.attempts.saturating_add(1);
        Some(Duration::from_millis(step.sleep_ms))
    }

    /// Attempts started so far, including the first one.
    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Sleep for `delay` unless `cancel` fires first.
pub(crate) async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> Result<(), OpError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(OpError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Submit one request, re-submitting it after retryable store faults.
///
/// Non-retryable faults and an exhausted transport budget return the last
/// store error. Cancellation aborts the round trip and the backoff wait.
pub async fn execute_with_retry(
    client: &dyn KvClient,
    request: RequestOp,
    options: &ExecuteOptions,
) -> Result<OpResponse, OpError> {
    let mut backoff = Backoff::new(options.transport_retry);
    loop {
        if options.cancel.is_cancelled() {
            return Err(OpError::Cancelled);
        }
        let result = tokio::select! {
            biased;
            _ = options.cancel.cancelled() => return Err(OpError::Cancelled),
            result = client.execute(request.clone()) => result,
        };
        match result {
            Ok(response) => return Ok(response),
            Err(err) if err.is_retryable() => match backoff.next_delay() {
                Some(delay) => {
                    debug!(
                        kind = request.kind_name(),
                        attempt = backoff.attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying request after transient store error"
                    );
                    sleep_or_cancel(delay, &options.cancel).await?;
                }
                None => {
                    warn!(
                        kind = request.kind_name(),
                        attempts = backoff.attempts(),
                        elapsed_ms = backoff.elapsed().as_millis() as u64,
                        error = %err,
                        "transport retry budget exhausted"
                    );
                    return Err(err.into());
                }
            },
            Err(err) => return Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use kvop_core::DeterministicKvStore;
    use kvop_core::KeyValueStoreError;

    use super::*;

    fn fast() -> RetryConfig {
        RetryConfig {
            initial_interval_ms: 1,
            max_interval_ms: 2,
            max_elapsed_ms: 1_000,
        }
    }

    #[test]
    fn disabled_budget_never_retries() {
        let mut backoff = Backoff::new(RetryConfig::disabled());
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.attempts(), 1);
    }

    #[test]
    fn delays_stay_within_interval_bounds() {
        let mut backoff = Backoff::new(RetryConfig {
            initial_interval_ms: 100,
            max_interval_ms: 150,
            max_elapsed_ms: 60_000,
        });
        let first = backoff.next_delay().unwrap();
        assert!(first >= Duration::from_millis(80) && first <= Duration::from_millis(120));
        let second = backoff.next_delay().unwrap();
        assert!(second >= Duration::from_millis(120) && second <= Duration::from_millis(180));
        let third = backoff.next_delay().unwrap();
        assert!(third <= Duration::from_millis(180));
        assert_eq!(backoff.attempts(), 4);
    }

    #[test]
    fn initial_interval_clamped_to_max() {
        let mut backoff = Backoff::new(RetryConfig {
            initial_interval_ms: 500,
            max_interval_ms: 100,
            max_elapsed_ms: 60_000,
        });
        let first = backoff.next_delay().unwrap();
        assert!(first <= Duration::from_millis(120));
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: RetryConfig = serde_json::from_str(r#"{"max_elapsed_ms": 0}"#).unwrap();
        assert_eq!(config.max_elapsed_ms, 0);
        assert_eq!(config.initial_interval_ms, DEFAULT_RETRY_INITIAL_INTERVAL_MS);
    }

    #[tokio::test]
    async fn retryable_error_is_retried() {
        let store = DeterministicKvStore::new();
        store.fail_next(KeyValueStoreError::Unavailable { reason: "down".into() });
        store.fail_next(KeyValueStoreError::Internal { reason: "oops".into() });
        let options = ExecuteOptions::default().with_transport_retry(fast());

        let response = execute_with_retry(&store, RequestOp::put("k", "v"), &options).await.unwrap();
        assert_eq!(response.header.revision, 1);
    }

    #[tokio::test]
    async fn non_retryable_error_is_returned() {
        let store = DeterministicKvStore::new();
        store.fail_next(KeyValueStoreError::Failed { reason: "bad".into() });
        let options = ExecuteOptions::default().with_transport_retry(fast());

        match execute_with_retry(&store, RequestOp::get("k"), &options).await {
            Err(OpError::Store {
                source: KeyValueStoreError::Failed { reason },
            }) => assert_eq!(reason, "bad"),
            other => panic!("expected store error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn exhausted_budget_returns_last_error() {
        let store = DeterministicKvStore::new();
        store.fail_next(KeyValueStoreError::Unavailable { reason: "down".into() });
        let options = ExecuteOptions::default().with_transport_retry(RetryConfig::disabled());

        let err = execute_with_retry(&store, RequestOp::get("k"), &options).await.unwrap_err();
        assert!(matches!(err, OpError::Store { .. }));
    }

    #[tokio::test]
    async fn cancelled_before_submission() {
        let store = DeterministicKvStore::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let options = ExecuteOptions::default().with_cancellation(cancel);

        let err = execute_with_retry(&store, RequestOp::put("k", "v"), &options).await.unwrap_err();
        assert_eq!(err, OpError::Cancelled);
        assert_eq!(store.revision(), 0);
    }
}
