//! Core traits for store access.

use async_trait::async_trait;
use kvop_kv_types::DeleteRequest;
use kvop_kv_types::DeleteResponse;
use kvop_kv_types::GetRequest;
use kvop_kv_types::GetResponse;
use kvop_kv_types::KeyValueStoreError;
use kvop_kv_types::OpResponse;
use kvop_kv_types::PutResponse;
use kvop_kv_types::RequestOp;
use kvop_kv_types::ResponseHeader;
use kvop_kv_types::ResponseOp;
use kvop_kv_types::TxnRequest;
use kvop_kv_types::TxnResponse;

/// Client of an etcd-style MVCC key-value store.
///
/// Implementations move one request to the store and return its response.
/// They are shared between independent operations and must be safe for
/// concurrent use.
#[async_trait]
pub trait KvClient: Send + Sync {
    /// Execute one request as a single round trip.
    async fn execute(&self, request: RequestOp) -> Result<OpResponse, KeyValueStoreError>;

    /// Read a key or range.
    async fn get(&self, request: GetRequest) -> Result<(ResponseHeader, GetResponse), KeyValueStoreError> {
        let response = self.execute(RequestOp::Get(request)).await?;
        match response.response {
            ResponseOp::Get(get) => Ok((response.header, get)),
            other => Err(unexpected("get", &other)),
        }
    }

    /// Create or replace a key.
    async fn put(&self, key: &str, value: &str) -> Result<(ResponseHeader, PutResponse), KeyValueStoreError> {
        let response = self.execute(RequestOp::put(key, value)).await?;
        match response.response {
            ResponseOp::Put(put) => Ok((response.header, put)),
            other => Err(unexpected("put", &other)),
        }
    }

    /// Delete a key or range.
    async fn delete(&self, request: DeleteRequest) -> Result<(ResponseHeader, DeleteResponse), KeyValueStoreError> {
        let response = self.execute(RequestOp::Delete(request)).await?;
        match response.response {
            ResponseOp::Delete(delete) => Ok((response.header, delete)),
            other => Err(unexpected("delete", &other)),
        }
    }

    /// Run a single-shot transaction.
    async fn txn(&self, request: TxnRequest) -> Result<(ResponseHeader, TxnResponse), KeyValueStoreError> {
        let response = self.execute(RequestOp::Txn(request)).await?;
        match response.response {
            ResponseOp::Txn(txn) => Ok((response.header, txn)),
            other => Err(unexpected("txn", &other)),
        }
    }
}

fn unexpected(expected: &str, actual: &ResponseOp) -> KeyValueStoreError {
    KeyValueStoreError::Failed {
        reason: format!("expected {expected} response, got {}", actual.kind_name()),
    }
}

// Blanket implementation for Arc<T>
#[async_trait]
impl<T: KvClient + ?Sized> KvClient for std::sync::Arc<T> {
    async fn execute(&self, request: RequestOp) -> Result<OpResponse, KeyValueStoreError> {
        (**self).execute(request).await
    }
}
