//! Compile-time constant assertions for Tiger Style compliance.
//!
//! Each assertion verifies a relationship between constants that must hold
//! for correct operation.

use super::api::*;
use super::atomic::*;
use super::retry::*;

// ============================================================================
// Key-Value Size Limits
// ============================================================================

const _: () = assert!(MAX_KEY_SIZE > 0);
const _: () = assert!(MAX_KEY_SIZE < MAX_VALUE_SIZE);
const _: () = assert!(MAX_KEY_SIZE <= 1024 * 1024); // sanity check

// ============================================================================
// Transaction Limits
// ============================================================================

const _: () = assert!(MAX_TXN_OPS > 0);
const _: () = assert!(MAX_TXN_NESTING > 0);
// A merged sub-transaction adds one nesting level per merge.
const _: () = assert!(MAX_TXN_NESTING >= 4);

// ============================================================================
// Atomic Operation Limits
// ============================================================================

const _: () = assert!(MAX_READ_LEVELS > 0);
const _: () = assert!(MAX_READ_LEVELS <= 100); // sanity check

// ============================================================================
// Retry Backoff
// ============================================================================

const _: () = assert!(DEFAULT_RETRY_INITIAL_INTERVAL_MS > 0);
const _: () = assert!(DEFAULT_RETRY_INITIAL_INTERVAL_MS <= DEFAULT_RETRY_MAX_INTERVAL_MS);
const _: () = assert!(DEFAULT_RETRY_MAX_INTERVAL_MS <= DEFAULT_RETRY_MAX_ELAPSED_MS);
const _: () = assert!(DEFAULT_RETRY_MAX_INTERVAL_MS <= DEFAULT_TRANSPORT_RETRY_MAX_ELAPSED_MS);

// Intervals must grow, randomization must keep them positive
const _: () = assert!(RETRY_MULTIPLIER_PERCENT >= 100);
const _: () = assert!(RETRY_RANDOMIZATION_PERCENT < 100);

const _: () = assert!(MAX_RETRY_ATTEMPTS > 0);
const _: () = assert!(MAX_RETRY_ATTEMPTS <= 10_000); // sanity check
