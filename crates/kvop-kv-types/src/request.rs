//! Requests accepted by the store.

use serde::Deserialize;
use serde::Serialize;

use crate::compare::TxnCompare;
use crate::range::prefix_range_end;

/// Read a key or a range of keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GetRequest {
    pub key: String,
    /// Exclusive end of the range, `None` for a single key.
    pub range_end: Option<String>,
    /// Maximum number of returned items, `0` for no limit.
    pub limit: i64,
    /// Return only the count, no items.
    pub count_only: bool,
}

impl GetRequest {
    pub fn key(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    pub fn prefix(prefix: impl Into<String>) -> Self {
        let key = prefix.into();
        let range_end = Some(prefix_range_end(&key));
        Self {
            key,
            range_end,
            ..Self::default()
        }
    }

    pub fn with_count_only(mut self) -> Self {
        self.count_only = true;
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }
}

/// Create or replace a key.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PutRequest {
    pub key: String,
    pub value: String,
}

/// Delete a key or a range of keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteRequest {
    pub key: String,
    pub range_end: Option<String>,
}

impl DeleteRequest {
    pub fn key(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            range_end: None,
        }
    }

    pub fn prefix(prefix: impl Into<String>) -> Self {
        let key = prefix.into();
        let range_end = Some(prefix_range_end(&key));
        Self { key, range_end }
    }
}

/// Single-shot `IF`/`THEN`/`ELSE` transaction.
///
/// `success` runs if every compare holds, `failure` otherwise. Both may
/// contain nested transactions.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxnRequest {
    pub compare: Vec<TxnCompare>,
    pub success: Vec<RequestOp>,
    pub failure: Vec<RequestOp>,
}

impl TxnRequest {
    /// Length of the longest of the compare, success and failure lists.
    pub fn max_list_len(&self) -> usize {
        self.compare.len().max(self.success.len()).max(self.failure.len())
    }
}

/// One request to the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RequestOp {
    Get(GetRequest),
    Put(PutRequest),
    Delete(DeleteRequest),
    Txn(TxnRequest),
}

impl RequestOp {
    pub fn get(key: impl Into<String>) -> Self {
        RequestOp::Get(GetRequest::key(key))
    }

    pub fn get_prefix(prefix: impl Into<String>) -> Self {
        RequestOp::Get(GetRequest::prefix(prefix))
    }

    pub fn put(key: impl Into<String>, value: impl Into<String>) -> Self {
        RequestOp::Put(PutRequest {
            key: key.into(),
            value: value.into(),
        })
    }

    pub fn delete(key: impl Into<String>) -> Self {
        RequestOp::Delete(DeleteRequest::key(key))
    }

    pub fn delete_prefix(prefix: impl Into<String>) -> Self {
        RequestOp::Delete(DeleteRequest::prefix(prefix))
    }

    pub fn txn(compare: Vec<TxnCompare>, success: Vec<RequestOp>, failure: Vec<RequestOp>) -> Self {
        RequestOp::Txn(TxnRequest {
            compare,
            success,
            failure,
        })
    }

    /// Short name of the request kind, for logs and error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            RequestOp::Get(_) => "get",
            RequestOp::Put(_) => "put",
            RequestOp::Delete(_) => "delete",
            RequestOp::Txn(_) => "txn",
        }
    }
}
