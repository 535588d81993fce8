//! Lock ownership contract and a store-backed mutex.
//!
//! Atomic operations do not lock anything themselves. They require a
//! [`DistributedMutex`] to be held locally and add its ownership compare to
//! the write transaction, so the write commits only while the lock is still
//! owned.

use std::sync::Arc;

use kvop_constants::api::RANGE_END_UNBOUNDED;
use kvop_core::CompareOp;
use kvop_core::KvClient;
use kvop_core::RequestOp;
use kvop_core::TxnCompare;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::OpError;
use crate::op::TypedOp;
use crate::result::NoResult;
use crate::retry::ExecuteOptions;
use crate::txn::TxnOp;

/// A lock whose ownership can be asserted inside a transaction.
pub trait DistributedMutex: Send + Sync {
    /// Key of the lock while it is held locally, `None` otherwise.
    fn owned_key(&self) -> Option<String>;

    /// Compare that holds only while this process owns the lock.
    fn is_owner(&self) -> Option<TxnCompare>;

    /// Returns true if the lock is held locally.
    fn is_locked(&self) -> bool {
        self.owned_key().is_some_and(|key| !key.is_empty() && key != RANGE_END_UNBOUNDED)
    }
}

impl<T: DistributedMutex + ?Sized> DistributedMutex for Arc<T> {
    fn owned_key(&self) -> Option<String> {
        (**self).owned_key()
    }

    fn is_owner(&self) -> Option<TxnCompare> {
        (**self).is_owner()
    }
}

/// Mutex backed by one store key.
///
/// The key is created only if absent. Its create revision identifies the
/// owner: a lock released and taken again has a different create revision.
pub struct KvMutex {
    client: Arc<dyn KvClient>,
    key: String,
    holder_id: String,
    /// Create revision of the lock key while held.
    held: Mutex<Option<i64>>,
}

impl KvMutex {
    pub fn new(client: Arc<dyn KvClient>, key: impl Into<String>, holder_id: impl Into<String>) -> Self {
        Self {
            client,
            key: key.into(),
            holder_id: holder_id.into(),
            held: Mutex::new(None),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Take the lock if nobody holds it.
    ///
    /// Returns `false` if the lock key already exists.
    pub async fn try_lock(&self, options: &ExecuteOptions) -> Result<bool, OpError> {
        let txn = TxnOp::<bool>::new()
            .when(TxnCompare::create_revision(self.key.clone(), CompareOp::Equal, 0))
            .then(TypedOp::<NoResult>::from_request(
                RequestOp::put(self.key.clone(), self.holder_id.clone()),
                |_, _| Ok(NoResult),
            ))
            .on_succeeded(|r| r.set_value(true));
        let result = txn.execute(self.client.as_ref(), options).await;
        let revision = result.header().map(|header| header.revision);
        if !result.into_result()? {
            debug!(key = %self.key, holder = %self.holder_id, "lock held by another session");
            return Ok(false);
        }
        // The put is the only write of the transaction, so the header
        // revision is the create revision of the lock key.
        *self.held.lock() = revision;
        debug!(key = %self.key, holder = %self.holder_id, revision, "lock acquired");
        Ok(true)
    }

    /// Release the lock.
    ///
    /// The key is deleted only while still owned. Returns `false` if the
    /// lock was not held or was taken over.
    pub async fn unlock(&self, options: &ExecuteOptions) -> Result<bool, OpError> {
        let Some(owner) = self.is_owner() else {
            return Ok(false);
        };
        let txn = TxnOp::<bool>::new()
            .when(owner)
            .then(TypedOp::<NoResult>::from_request(RequestOp::delete(self.key.clone()), |_, _| {
                Ok(NoResult)
            }))
            .on_succeeded(|r| r.set_value(true));
        let released = txn.execute_or_err(self.client.as_ref(), options).await?;
        *self.held.lock() = None;
        debug!(key = %self.key, holder = %self.holder_id, released, "lock released");
        Ok(released)
    }
}

impl DistributedMutex for KvMutex {
    fn owned_key(&self) -> Option<String> {
        self.held.lock().map(|_| self.key.clone())
    }

    fn is_owner(&self) -> Option<TxnCompare> {
        self.held
            .lock()
            .map(|revision| TxnCompare::create_revision(self.key.clone(), CompareOp::Equal, revision))
    }
}
