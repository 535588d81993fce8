//! Store contract constants.
//!
//! These constants bound the requests the framework will build and the
//! in-memory store will accept.
//!
//! Tiger Style: Constants are fixed and immutable, enforced at compile time.

// ============================================================================
// Key-Value Size Limits
// ============================================================================

/// Maximum size of a single key in bytes (1 KB).
///
/// Tiger Style: Fixed limit prevents memory exhaustion from oversized keys.
/// Applied to every request before it reaches the store.
pub const MAX_KEY_SIZE: u32 = 1024;

/// Maximum size of a single value in bytes (1 MB).
///
/// Tiger Style: Fixed limit prevents memory exhaustion from oversized values.
pub const MAX_VALUE_SIZE: u32 = 1024 * 1024;

// ============================================================================
// Transaction Limits
// ============================================================================

/// Maximum number of entries in each list of one transaction (compare, then, else).
///
/// Matches the default `--max-txn-ops` of an etcd cluster. Atomic operations
/// report the largest list they submitted so callers can stay below it.
pub const MAX_TXN_OPS: u32 = 128;

/// Maximum nesting depth of transactions inside transactions.
///
/// Tiger Style: Bounded recursion when evaluating nested `Txn` requests.
pub const MAX_TXN_NESTING: u32 = 16;

/// Range end that selects every key greater than or equal to the start key.
pub const RANGE_END_UNBOUNDED: &str = "\0";
