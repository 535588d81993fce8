//! Operation helpers for one key and for a key prefix.

use kvop_core::CompareOp;
use kvop_core::DeleteRequest;
use kvop_core::GetRequest;
use kvop_core::KeyValue;
use kvop_core::RequestOp;
use kvop_core::ResponseOp;
use kvop_core::TxnCompare;

use crate::error::OpError;
use crate::op::TypedOp;
use crate::result::NoResult;
use crate::txn::TxnOp;

fn unexpected(expected: &str, actual: &ResponseOp) -> OpError {
    OpError::UnexpectedResponse {
        expected: expected.into(),
        actual: actual.kind_name().into(),
    }
}

/// Operations on a single key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key {
    key: String,
}

impl Key {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Read the key, `None` if it does not exist.
    pub fn get(&self) -> TypedOp<Option<KeyValue>> {
        TypedOp::from_request(RequestOp::Get(GetRequest::key(self.key.clone())), |_, response| match response {
            ResponseOp::Get(get) if get.count > 1 => Err(OpError::UnexpectedCount { found: get.count }),
            ResponseOp::Get(get) => Ok(get.kvs.into_iter().next()),
            other => Err(unexpected("get", &other)),
        })
    }

    /// Read the key, [`OpError::NotFound`] if it does not exist.
    pub fn get_or_err(&self) -> TypedOp<Option<KeyValue>> {
        let key = self.key.clone();
        self.get().with_empty_result_as_error(move || OpError::NotFound { key: key.clone() })
    }

    /// True if the key exists.
    pub fn exists(&self) -> TypedOp<bool> {
        let request = GetRequest::key(self.key.clone()).with_count_only();
        TypedOp::from_request(RequestOp::Get(request), |_, response| match response {
            ResponseOp::Get(get) => Ok(get.count > 0),
            other => Err(unexpected("get", &other)),
        })
    }

    pub fn put(&self, value: impl Into<String>) -> TypedOp<NoResult> {
        TypedOp::from_request(RequestOp::put(self.key.clone(), value), |_, response| match response {
            ResponseOp::Put(_) => Ok(NoResult),
            other => Err(unexpected("put", &other)),
        })
    }

    /// Create the key only if it does not exist. The result is `true` if created.
    pub fn put_if_not_exists(&self, value: impl Into<String>) -> TxnOp<bool> {
        TxnOp::new()
            .when(TxnCompare::mod_revision(self.key.clone(), CompareOp::Equal, 0))
            .then(self.put(value))
            .on_succeeded(|r| r.set_value(true))
    }

    /// Delete the key. The result is `true` if it existed.
    pub fn delete(&self) -> TypedOp<bool> {
        TypedOp::from_request(RequestOp::Delete(DeleteRequest::key(self.key.clone())), |_, response| {
            match response {
                ResponseOp::Delete(delete) => Ok(delete.deleted > 0),
                other => Err(unexpected("delete", &other)),
            }
        })
    }

    /// Delete the key, [`OpError::NotFound`] if it does not exist.
    pub fn delete_if_exists(&self) -> TypedOp<bool> {
        let key = self.key.clone();
        self.delete().with_empty_result_as_error(move || OpError::NotFound { key: key.clone() })
    }
}

/// Operations on every key starting with a prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Prefix {
    prefix: String,
}

impl Prefix {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Key `prefix + suffix`.
    pub fn key(&self, suffix: &str) -> Key {
        Key::new(format!("{}{suffix}", self.prefix))
    }

    /// Nested prefix `prefix + suffix`.
    pub fn add(&self, suffix: &str) -> Prefix {
        Prefix::new(format!("{}{suffix}", self.prefix))
    }

    /// Read all keys, sorted by key.
    pub fn get_all(&self) -> TypedOp<Vec<KeyValue>> {
        TypedOp::from_request(RequestOp::get_prefix(self.prefix.clone()), |_, response| match response {
            ResponseOp::Get(get) => Ok(get.kvs),
            other => Err(unexpected("get", &other)),
        })
    }

    /// Number of keys.
    pub fn count(&self) -> TypedOp<i64> {
        let request = GetRequest::prefix(self.prefix.clone()).with_count_only();
        TypedOp::from_request(RequestOp::Get(request), |_, response| match response {
            ResponseOp::Get(get) => Ok(get.count),
            other => Err(unexpected("get", &other)),
        })
    }

    pub fn at_least_one_exists(&self) -> TypedOp<bool> {
        let request = GetRequest::prefix(self.prefix.clone()).with_count_only();
        TypedOp::from_request(RequestOp::Get(request), |_, response| match response {
            ResponseOp::Get(get) => Ok(get.count > 0),
            other => Err(unexpected("get", &other)),
        })
    }

    /// Delete all keys. The result is the number of deleted keys.
    pub fn delete_all(&self) -> TypedOp<i64> {
        TypedOp::from_request(RequestOp::delete_prefix(self.prefix.clone()), |_, response| match response {
            ResponseOp::Delete(delete) => Ok(delete.deleted),
            other => Err(unexpected("delete", &other)),
        })
    }
}
