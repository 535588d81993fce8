//! Retry backoff defaults.
//!
//! The same exponential, randomized backoff drives two independent budgets:
//! re-running a whole atomic operation after a lost optimistic-concurrency
//! race, and re-submitting one physical request after a transient transport
//! fault.

/// Default first backoff interval in milliseconds.
pub const DEFAULT_RETRY_INITIAL_INTERVAL_MS: u64 = 20;

/// Default ceiling for a single backoff interval in milliseconds.
pub const DEFAULT_RETRY_MAX_INTERVAL_MS: u64 = 1_000;

/// Default total time budget of the conflict retry loop in milliseconds.
pub const DEFAULT_RETRY_MAX_ELAPSED_MS: u64 = 30_000;

/// Default total time budget of the transport retry loop in milliseconds.
pub const DEFAULT_TRANSPORT_RETRY_MAX_ELAPSED_MS: u64 = 15_000;

/// Multiplier applied to the interval after each retry, in percent (150 = 1.5x).
pub const RETRY_MULTIPLIER_PERCENT: u64 = 150;

/// Randomization applied to each interval, in percent (20 = +/-20%).
pub const RETRY_RANDOMIZATION_PERCENT: u64 = 20;

/// Upper bound on retry attempts, independent of the time budget.
///
/// Tiger Style: Bounded loop even with a zero backoff interval.
pub const MAX_RETRY_ATTEMPTS: u32 = 1_000;
