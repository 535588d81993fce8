//! Typed operations, flattened transactions and atomic read/write
//! operations over an etcd-style MVCC key-value store.
//!
//! # Layers
//!
//! - [`TypedOp`]: one request plus a mapper to a typed value and an ordered
//!   processor list
//! - [`TxnOp`]: one physical `IF`/`THEN`/`ELSE` transaction; merged
//!   sub-transactions are flattened into it and get their own result back
//! - [`AtomicOp`]: read phase, then one write transaction guarded by
//!   conditions synthesized from what the read phase observed, retried with
//!   fresh reads after lost races
//!
//! Every `execute` takes an [`ExecuteOptions`] with the conflict retry
//! budget, the transport retry budget and a cancellation token.

pub mod atomic;
pub mod error;
pub mod key;
pub mod lock;
pub mod op;
pub mod result;
pub mod retry;
pub mod tracker;
pub mod txn;
pub mod verified;

pub use atomic::AtomicOp;
pub use atomic::AtomicOpCore;
pub use atomic::AtomicProcessor;
pub use atomic::AtomicResult;
pub use atomic::ReadFactory;
pub use atomic::ReadScope;
pub use atomic::WriteFactory;
pub use error::MultiError;
pub use error::OpError;
pub use key::Key;
pub use key::Prefix;
pub use lock::DistributedMutex;
pub use lock::KvMutex;
pub use op::LowLevelOp;
pub use op::Op;
pub use op::Processor;
pub use op::TypedOp;
pub use result::NoResult;
pub use result::OpResult;
pub use result::ResultSlot;
pub use result::SubResult;
pub use result::result_slot;
pub use retry::ExecuteOptions;
pub use retry::RetryConfig;
pub use retry::execute_with_retry;
pub use tracker::TrackedOp;
pub use tracker::TrackedOpKind;
pub use tracker::TrackerKv;
pub use txn::TxnOp;
pub use txn::TxnProcessor;
pub use txn::TxnResult;
