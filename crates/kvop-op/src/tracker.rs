//! Recording client used by the read phase of atomic operations.
//!
//! [`TrackerKv`] wraps a [`KvClient`] and records every get, put and delete
//! that reaches the store, including operations inside the branch of a
//! transaction that actually ran. The recorded operations are the input of
//! [`write_conditions`](crate::verified::write_conditions).

use std::cmp::Ordering;
use std::cmp::Reverse;
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use kvop_constants::api::RANGE_END_UNBOUNDED;
use kvop_core::KeyValue;
use kvop_core::KeyValueStoreError;
use kvop_core::KvClient;
use kvop_core::OpResponse;
use kvop_core::RequestOp;
use kvop_core::ResponseOp;
use parking_lot::Mutex;

/// Kind of a tracked operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TrackedOpKind {
    Get,
    Put,
    Delete,
}

/// One store operation observed during the read phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedOp {
    pub kind: TrackedOpKind,
    pub key: String,
    /// Exclusive range end, `None` for a single key.
    pub range_end: Option<String>,
    /// Returned count for gets, `1` for puts, deleted count for deletes.
    pub count: i64,
    /// Items returned by a get.
    pub kvs: Vec<KeyValue>,
    /// Header revision of the response that carried the operation.
    ///
    /// For a put this is the mod revision the put gave the key.
    pub revision: i64,
}

impl TrackedOp {
    /// Returns true if the operation targets a range instead of one key.
    pub fn is_range(&self) -> bool {
        self.range_end.is_some()
    }

    /// Returns true if every key selected by `other` is selected by `self`.
    pub fn covers(&self, other: &TrackedOp) -> bool {
        match (self.range_end.as_deref(), other.range_end.as_deref()) {
            (None, None) => self.key == other.key,
            (None, Some(_)) => false,
            (Some(_), None) => kvop_core::key_in_range(&other.key, &self.key, self.range_end.as_deref()),
            (Some(RANGE_END_UNBOUNDED), Some(_)) => self.key <= other.key,
            (Some(_), Some(RANGE_END_UNBOUNDED)) => false,
            (Some(end), Some(other_end)) => self.key <= other.key && other_end <= end,
        }
    }

    fn dedup_key(&self) -> (TrackedOpKind, String, Option<String>, i64) {
        (self.kind, self.key.clone(), self.range_end.clone(), self.count)
    }
}

/// Sort key of a range end: unbounded first, then longer ranges, single keys last.
fn range_rank(range_end: Option<&str>) -> Reverse<(u8, &str)> {
    match range_end {
        None => Reverse((0, "")),
        Some(RANGE_END_UNBOUNDED) => Reverse((2, "")),
        Some(end) => Reverse((1, end)),
    }
}

pub(crate) fn tracked_order(a: &TrackedOp, b: &TrackedOp) -> Ordering {
    a.kind
        .cmp(&b.kind)
        .then_with(|| a.key.cmp(&b.key))
        .then_with(|| range_rank(a.range_end.as_deref()).cmp(&range_rank(b.range_end.as_deref())))
        .then_with(|| a.count.cmp(&b.count))
}

#[derive(Default)]
struct TrackerState {
    ops: Vec<TrackedOp>,
    seen: HashSet<(TrackedOpKind, String, Option<String>, i64)>,
}

impl TrackerState {
    fn record(&mut self, op: TrackedOp) {
        let key = op.dedup_key();
        if self.seen.insert(key.clone()) {
            self.ops.push(op);
            return;
        }
        // A repeated put moves the key's mod revision forward.
        if op.kind != TrackedOpKind::Put {
            return;
        }
        if let Some(existing) = self.ops.iter_mut().find(|existing| existing.dedup_key() == key) {
            existing.revision = existing.revision.max(op.revision);
        }
    }

    fn record_response(&mut self, request: &RequestOp, response: &ResponseOp, revision: i64) {
        match (request, response) {
            (RequestOp::Get(get), ResponseOp::Get(resp)) => self.record(TrackedOp {
                kind: TrackedOpKind::Get,
                key: get.key.clone(),
                range_end: get.range_end.clone(),
                count: resp.count,
                kvs: resp.kvs.clone(),
                revision,
            }),
            (RequestOp::Put(put), ResponseOp::Put(_)) => self.record(TrackedOp {
                kind: TrackedOpKind::Put,
                key: put.key.clone(),
                range_end: None,
                count: 1,
                kvs: Vec::new(),
                revision,
            }),
            (RequestOp::Delete(delete), ResponseOp::Delete(resp)) => self.record(TrackedOp {
                kind: TrackedOpKind::Delete,
                key: delete.key.clone(),
                range_end: delete.range_end.clone(),
                count: resp.deleted,
                kvs: Vec::new(),
                revision,
            }),
            (RequestOp::Txn(txn), ResponseOp::Txn(resp)) => {
                let branch = if resp.succeeded { &txn.success } else { &txn.failure };
                for (request, response) in branch.iter().zip(&resp.responses) {
                    self.record_response(request, response, revision);
                }
            }
            _ => {}
        }
    }
}

/// Client decorator recording the operations of the read phase.
pub struct TrackerKv {
    client: Arc<dyn KvClient>,
    state: Mutex<TrackerState>,
}

impl TrackerKv {
    pub fn new(client: Arc<dyn KvClient>) -> Self {
        Self {
            client,
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// Deduplicated operations sorted by kind, key and range length.
    pub fn operations(&self) -> Vec<TrackedOp> {
        let mut ops = self.state.lock().ops.clone();
        ops.sort_by(tracked_order);
        ops
    }

    /// Number of distinct tracked operations.
    pub fn len(&self) -> usize {
        self.state.lock().ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KvClient for TrackerKv {
    async fn execute(&self, request: RequestOp) -> Result<OpResponse, KeyValueStoreError> {
        let response = self.client.execute(request.clone()).await?;
        self.state.lock().record_response(&request, &response.response, response.header.revision);
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use kvop_core::CompareOp;
    use kvop_core::DeterministicKvStore;
    use kvop_core::GetRequest;
    use kvop_core::TxnCompare;

    use super::*;

    fn get(key: &str, range_end: Option<&str>, count: i64) -> TrackedOp {
        TrackedOp {
            kind: TrackedOpKind::Get,
            key: key.into(),
            range_end: range_end.map(String::from),
            count,
            kvs: Vec::new(),
            revision: 1,
        }
    }

    #[test]
    fn covers_by_containment() {
        let prefix = get("a/", Some("a0"), 7);
        assert!(prefix.covers(&get("a/1", None, 1)));
        assert!(prefix.covers(&get("a/b/", Some("a/b0"), 2)));
        assert!(!prefix.covers(&get("b", None, 1)));
        assert!(!get("a/1", None, 1).covers(&prefix));
        assert!(get("a", Some("\0"), 3).covers(&prefix));
        assert!(!prefix.covers(&get("a/", Some("\0"), 3)));
    }

    #[test]
    fn sort_puts_wider_ranges_first() {
        let mut ops = vec![
            get("a/1", None, 1),
            get("a/", Some("a/z"), 3),
            get("a/", Some("a0"), 7),
            get("a/", None, 0),
            get("a/", Some("\0"), 9),
        ];
        ops.sort_by(tracked_order);
        let ends: Vec<Option<&str>> = ops.iter().map(|op| op.range_end.as_deref()).collect();
        assert_eq!(ends, vec![Some("\0"), Some("a0"), Some("a/z"), None, None]);
        assert_eq!(ops[4].key, "a/1");
    }

    #[tokio::test]
    async fn records_and_deduplicates() {
        let store = DeterministicKvStore::new();
        store.apply(RequestOp::put("foo/1", "a")).unwrap();
        let tracker = TrackerKv::new(store.clone());

        tracker.get(GetRequest::key("foo/1")).await.unwrap();
        tracker.get(GetRequest::key("foo/1")).await.unwrap();
        tracker.get(GetRequest::prefix("foo/")).await.unwrap();
        tracker.put("bar", "b").await.unwrap();

        let ops = tracker.operations();
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[0].kind, TrackedOpKind::Get);
        assert_eq!(ops[0].range_end.as_deref(), Some("foo0"));
        assert_eq!(ops[0].kvs.len(), 1);
        assert_eq!(ops[1].key, "foo/1");
        assert_eq!(ops[2].kind, TrackedOpKind::Put);
        assert_eq!(ops[1].revision, 1);
        assert_eq!(ops[2].revision, 2);
    }

    #[tokio::test]
    async fn repeated_put_keeps_latest_revision() {
        let store = DeterministicKvStore::new();
        let tracker = TrackerKv::new(store.clone());

        tracker.put("marker", "x").await.unwrap();
        store.apply(RequestOp::put("other", "y")).unwrap();
        tracker.put("marker", "x").await.unwrap();

        let ops = tracker.operations();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].revision, 3);
        assert_eq!(store.get_kv("marker").unwrap().mod_revision, 3);
    }

    #[tokio::test]
    async fn records_only_the_executed_branch() {
        let store = DeterministicKvStore::new();
        let tracker = TrackerKv::new(store.clone());
        let txn = RequestOp::txn(
            vec![TxnCompare::mod_revision("missing", CompareOp::Greater, 0)],
            vec![RequestOp::get("then")],
            vec![RequestOp::get("else"), RequestOp::txn(vec![], vec![RequestOp::get("nested")], vec![])],
        );
        tracker.execute(txn).await.unwrap();

        let keys: Vec<String> = tracker.operations().into_iter().map(|op| op.key).collect();
        assert_eq!(keys, vec!["else".to_string(), "nested".to_string()]);
    }

    #[tokio::test]
    async fn transport_error_is_not_recorded() {
        let store = DeterministicKvStore::new();
        store.fail_next(KeyValueStoreError::Unavailable {
            reason: "down".into(),
        });
        let tracker = TrackerKv::new(store.clone());
        assert!(tracker.get(GetRequest::key("a")).await.is_err());
        assert!(tracker.is_empty());
    }
}
