//! Centralized constants for the kvop transaction framework.
//!
//! Tiger Style: Constants are fixed and immutable, enforced at compile time.
//! Each constant has explicit bounds to prevent unbounded resource allocation.
//!
//! # Modules
//!
//! - [`api`]: Store contract bounds (key/value sizes, transaction op counts)
//! - [`retry`]: Backoff defaults for lost races and transient transport faults
//! - [`atomic`]: Atomic operation limits (read level nesting)
//!
//! # Usage
//!
//! ```
//! use kvop_constants::api::MAX_KEY_SIZE;
//! use kvop_constants::retry::DEFAULT_RETRY_INITIAL_INTERVAL_MS;
//! ```

pub mod api;
mod assertions;
pub mod atomic;
pub mod retry;

/// Prelude module for commonly used constants.
pub mod prelude {
    pub use crate::api::MAX_KEY_SIZE;
    pub use crate::api::MAX_TXN_OPS;
    pub use crate::api::MAX_VALUE_SIZE;
    pub use crate::atomic::MAX_READ_LEVELS;
    pub use crate::retry::DEFAULT_RETRY_INITIAL_INTERVAL_MS;
    pub use crate::retry::DEFAULT_RETRY_MAX_ELAPSED_MS;
    pub use crate::retry::DEFAULT_RETRY_MAX_INTERVAL_MS;
    pub use crate::retry::DEFAULT_TRANSPORT_RETRY_MAX_ELAPSED_MS;
}
