//! Key-value client abstraction for the kvop framework.
//!
//! - [`KvClient`]: the single async round-trip collaborator every operation
//!   runs against
//! - [`DeterministicKvStore`]: in-memory MVCC store implementing the same
//!   contract, for tests and simulation

pub mod inmemory;
pub mod traits;

pub use inmemory::DeterministicKvStore;
// Re-export the wire types so callers need a single import path
pub use kvop_kv_types::*;
pub use traits::KvClient;
