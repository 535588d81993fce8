//! Responses returned by the store.

use serde::Deserialize;
use serde::Serialize;

use crate::kv::KeyValue;
use crate::kv::ResponseHeader;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GetResponse {
    pub kvs: Vec<KeyValue>,
    /// Number of keys in the range, regardless of `limit` and `count_only`.
    pub count: i64,
    /// True if `limit` truncated `kvs`.
    pub more: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PutResponse {
    /// Previous value of the key, if it existed.
    pub prev_kv: Option<KeyValue>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteResponse {
    pub deleted: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxnResponse {
    /// True if every compare held and the success branch ran.
    pub succeeded: bool,
    /// Responses of the branch that ran, positionally.
    pub responses: Vec<ResponseOp>,
}

/// Response to one [`RequestOp`](crate::RequestOp).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ResponseOp {
    Get(GetResponse),
    Put(PutResponse),
    Delete(DeleteResponse),
    Txn(TxnResponse),
}

impl ResponseOp {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ResponseOp::Get(_) => "get",
            ResponseOp::Put(_) => "put",
            ResponseOp::Delete(_) => "delete",
            ResponseOp::Txn(_) => "txn",
        }
    }

    pub fn into_get(self) -> Option<GetResponse> {
        match self {
            ResponseOp::Get(r) => Some(r),
            _ => None,
        }
    }

    pub fn into_put(self) -> Option<PutResponse> {
        match self {
            ResponseOp::Put(r) => Some(r),
            _ => None,
        }
    }

    pub fn into_delete(self) -> Option<DeleteResponse> {
        match self {
            ResponseOp::Delete(r) => Some(r),
            _ => None,
        }
    }

    pub fn into_txn(self) -> Option<TxnResponse> {
        match self {
            ResponseOp::Txn(r) => Some(r),
            _ => None,
        }
    }
}

/// A response together with the header of the round trip that produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OpResponse {
    pub header: ResponseHeader,
    pub response: ResponseOp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn into_variants() {
        let get = ResponseOp::Get(GetResponse::default());
        assert_eq!(get.kind_name(), "get");
        assert!(get.clone().into_get().is_some());
        assert!(get.into_txn().is_none());

        let del = ResponseOp::Delete(DeleteResponse { deleted: 2 });
        assert_eq!(del.into_delete().map(|d| d.deleted), Some(2));

        let txn = ResponseOp::Txn(TxnResponse {
            succeeded: true,
            responses: vec![ResponseOp::Put(PutResponse::default())],
        });
        let txn = txn.into_txn().unwrap();
        assert!(txn.succeeded);
        assert_eq!(txn.responses.len(), 1);
    }
}
