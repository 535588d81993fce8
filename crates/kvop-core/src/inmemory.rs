//! In-memory implementation of [`KvClient`] for testing.
//!
//! Provides a deterministic, non-persistent MVCC store with the same
//! semantics the framework expects from a real etcd-style cluster:
//!
//! - one store revision per request that writes, shared by every write of a
//!   transaction
//! - reads inside a transaction see the earlier writes of the same branch
//! - range compares must hold for every key in the range; an empty range is
//!   compared as a single absent key
//!
//! Tests inject concurrent writers with the synchronous [`DeterministicKvStore::apply`]
//! and transport faults with [`DeterministicKvStore::fail_next`].

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;
use kvop_kv_types::CompareTarget;
use kvop_kv_types::DeleteResponse;
use kvop_kv_types::GetRequest;
use kvop_kv_types::GetResponse;
use kvop_kv_types::KeyValue;
use kvop_kv_types::KeyValueStoreError;
use kvop_kv_types::OpResponse;
use kvop_kv_types::PutResponse;
use kvop_kv_types::RequestOp;
use kvop_kv_types::ResponseHeader;
use kvop_kv_types::ResponseOp;
use kvop_kv_types::TxnCompare;
use kvop_kv_types::TxnResponse;
use kvop_kv_types::key_in_range;
use kvop_kv_types::validate_request;
use parking_lot::Mutex;
use tracing::trace;

use crate::traits::KvClient;

/// In-memory deterministic MVCC key-value store.
///
/// # Example
///
/// ```
/// use kvop_core::DeterministicKvStore;
/// use kvop_core::KvClient;
/// use kvop_core::RequestOp;
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let store = DeterministicKvStore::new();
/// let response = store.execute(RequestOp::put("foo", "bar")).await.unwrap();
/// assert_eq!(response.header.revision, 1);
/// assert_eq!(store.revision(), 1);
/// assert_eq!(store.get_kv("foo").unwrap().value, "bar");
/// # });
/// ```
#[derive(Default)]
pub struct DeterministicKvStore {
    state: Mutex<StoreState>,
    faults: Mutex<VecDeque<KeyValueStoreError>>,
}

#[derive(Debug, Default)]
struct StoreState {
    revision: i64,
    data: BTreeMap<String, KeyValue>,
}

impl DeterministicKvStore {
    /// Create a new empty store at revision 0.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Apply a request immediately, bypassing fault injection.
    ///
    /// Synchronous so tests can interleave a "concurrent" writer from inside
    /// a factory or processor.
    pub fn apply(&self, request: RequestOp) -> Result<OpResponse, KeyValueStoreError> {
        validate_request(&request)?;
        let mut state = self.state.lock();
        let next_revision = state.revision + 1;
        let mut wrote = false;
        let response = state.apply_op(request, next_revision, &mut wrote);
        if wrote {
            state.revision = next_revision;
        }
        Ok(OpResponse {
            header: ResponseHeader {
                revision: state.revision,
            },
            response,
        })
    }

    /// Make the next async round trip fail with `error`.
    ///
    /// Faults queue up; each round trip consumes one.
    pub fn fail_next(&self, error: KeyValueStoreError) {
        self.faults.lock().push_back(error);
    }

    /// Current store revision.
    pub fn revision(&self) -> i64 {
        self.state.lock().revision
    }

    /// Snapshot of every stored key, ordered by key.
    pub fn dump(&self) -> Vec<KeyValue> {
        self.state.lock().data.values().cloned().collect()
    }

    /// Current state of one key.
    pub fn get_kv(&self, key: &str) -> Option<KeyValue> {
        self.state.lock().data.get(key).cloned()
    }
}

#[async_trait]
impl KvClient for DeterministicKvStore {
    async fn execute(&self, request: RequestOp) -> Result<OpResponse, KeyValueStoreError> {
        if let Some(fault) = self.faults.lock().pop_front() {
            trace!(kind = request.kind_name(), error = %fault, "injected fault");
            return Err(fault);
        }
        trace!(kind = request.kind_name(), "applying request");
        self.apply(request)
    }
}

impl StoreState {
    fn apply_op(&mut self, request: RequestOp, revision: i64, wrote: &mut bool) -> ResponseOp {
        match request {
            RequestOp::Get(get) => ResponseOp::Get(self.range(&get)),
            RequestOp::Put(put) => {
                *wrote = true;
                let prev_kv = self.data.get(&put.key).cloned();
                let (create_revision, version) = match &prev_kv {
                    Some(prev) => (prev.create_revision, prev.version + 1),
                    None => (revision, 1),
                };
                self.data.insert(put.key.clone(), KeyValue {
                    key: put.key,
                    value: put.value,
                    create_revision,
                    mod_revision: revision,
                    version,
                });
                ResponseOp::Put(PutResponse { prev_kv })
            }
            RequestOp::Delete(delete) => {
                let keys = self.keys_in(&delete.key, delete.range_end.as_deref());
                for key in &keys {
                    self.data.remove(key);
                }
                if !keys.is_empty() {
                    *wrote = true;
                }
                ResponseOp::Delete(DeleteResponse {
                    deleted: keys.len() as i64,
                })
            }
            RequestOp::Txn(txn) => {
                let succeeded = txn.compare.iter().all(|cmp| self.evaluate(cmp));
                let ops = if succeeded { txn.success } else { txn.failure };
                let responses = ops.into_iter().map(|op| self.apply_op(op, revision, wrote)).collect();
                ResponseOp::Txn(TxnResponse { succeeded, responses })
            }
        }
    }

    fn range(&self, get: &GetRequest) -> GetResponse {
        let kvs = self.kvs_in(&get.key, get.range_end.as_deref());
        let count = kvs.len() as i64;
        if get.count_only {
            return GetResponse {
                kvs: Vec::new(),
                count,
                more: false,
            };
        }
        let more = get.limit > 0 && count > get.limit;
        let kvs = if more {
            kvs.into_iter().take(get.limit as usize).collect()
        } else {
            kvs
        };
        GetResponse { kvs, count, more }
    }

    fn evaluate(&self, cmp: &TxnCompare) -> bool {
        let kvs = self.kvs_in(&cmp.key, cmp.range_end.as_deref());
        if kvs.is_empty() {
            // An absent key has no value to compare against.
            return cmp.target != CompareTarget::Value && cmp.matches(&KeyValue::default());
        }
        kvs.iter().all(|kv| cmp.matches(kv))
    }

    fn kvs_in(&self, key: &str, range_end: Option<&str>) -> Vec<KeyValue> {
        match range_end {
            None => self.data.get(key).cloned().into_iter().collect(),
            Some(_) => self
                .data
                .range::<str, _>((Bound::Included(key), Bound::Unbounded))
                .take_while(|(k, _)| key_in_range(k, key, range_end))
                .map(|(_, kv)| kv.clone())
                .collect(),
        }
    }

    fn keys_in(&self, key: &str, range_end: Option<&str>) -> Vec<String> {
        self.kvs_in(key, range_end).into_iter().map(|kv| kv.key).collect()
    }
}
