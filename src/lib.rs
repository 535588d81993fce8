//! Optimistic-concurrency read/write transactions over an etcd-style MVCC
//! key-value store.
//!
//! Repository code describes what it reads and what it writes. The framework
//! records every key and range the read phase observed, turns them into
//! `mod_revision` compares, submits the writes as one conditional
//! transaction and re-runs the whole cycle with fresh reads when another
//! writer got in between.
//!
//! # Crates
//!
//! - [`constants`]: bounded limits and retry defaults
//! - [`kv`]: store contract types, [`kv::KvClient`] and the in-memory
//!   [`kv::DeterministicKvStore`]
//! - [`op`]: typed operations, transactions and atomic operations
//!
//! # Example
//!
//! ```
//! use kvop::prelude::*;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let store = DeterministicKvStore::new();
//! let created = Key::new("users/alice")
//!     .put_if_not_exists("{}")
//!     .execute_or_err(&store, &ExecuteOptions::default())
//!     .await
//!     .unwrap();
//! assert!(created);
//! # });
//! ```

pub use kvop_constants as constants;
pub use kvop_core as kv;
pub use kvop_op as op;

/// Commonly used types.
pub mod prelude {
    pub use kvop_core::CompareOp;
    pub use kvop_core::DeterministicKvStore;
    pub use kvop_core::KeyValue;
    pub use kvop_core::KeyValueStoreError;
    pub use kvop_core::KvClient;
    pub use kvop_core::RequestOp;
    pub use kvop_core::TxnCompare;
    pub use kvop_op::AtomicOp;
    pub use kvop_op::AtomicResult;
    pub use kvop_op::DistributedMutex;
    pub use kvop_op::ExecuteOptions;
    pub use kvop_op::Key;
    pub use kvop_op::KvMutex;
    pub use kvop_op::NoResult;
    pub use kvop_op::Op;
    pub use kvop_op::OpError;
    pub use kvop_op::Prefix;
    pub use kvop_op::ReadScope;
    pub use kvop_op::RetryConfig;
    pub use kvop_op::TxnOp;
    pub use kvop_op::TxnResult;
    pub use kvop_op::TypedOp;
    pub use kvop_op::result_slot;
}
