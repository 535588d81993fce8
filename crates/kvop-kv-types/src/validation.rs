//! Validation of requests against fixed size limits.

use kvop_constants::api::MAX_KEY_SIZE;
use kvop_constants::api::MAX_TXN_NESTING;
use kvop_constants::api::MAX_TXN_OPS;
use kvop_constants::api::MAX_VALUE_SIZE;

use crate::KeyValueStoreError;
use crate::compare::TxnCompare;
use crate::request::RequestOp;

/// Validate a request, recursing into nested transactions.
pub fn validate_request(request: &RequestOp) -> Result<(), KeyValueStoreError> {
    validate_at_depth(request, 0)
}

fn validate_at_depth(request: &RequestOp, depth: u32) -> Result<(), KeyValueStoreError> {
    match request {
        RequestOp::Get(get) => {
            check_key(&get.key)?;
            check_range_end(&get.key, get.range_end.as_deref())?;
        }
        RequestOp::Put(put) => {
            check_key(&put.key)?;
            check_value(&put.value)?;
        }
        RequestOp::Delete(delete) => {
            check_key(&delete.key)?;
            check_range_end(&delete.key, delete.range_end.as_deref())?;
        }
        RequestOp::Txn(txn) => {
            if depth >= MAX_TXN_NESTING {
                return Err(KeyValueStoreError::Failed {
                    reason: format!("transaction nesting exceeds maximum of {MAX_TXN_NESTING}"),
                });
            }
            for len in [txn.compare.len(), txn.success.len(), txn.failure.len()] {
                check_batch(len)?;
            }
            for cmp in &txn.compare {
                check_compare(cmp)?;
            }
            for op in txn.success.iter().chain(txn.failure.iter()) {
                validate_at_depth(op, depth + 1)?;
            }
        }
    }
    Ok(())
}

fn check_key(key: &str) -> Result<(), KeyValueStoreError> {
    if key.is_empty() {
        return Err(KeyValueStoreError::EmptyKey);
    }
    let len = key.len();
    if len > MAX_KEY_SIZE as usize {
        return Err(KeyValueStoreError::KeyTooLarge {
            size: len as u32,
            max: MAX_KEY_SIZE,
        });
    }
    Ok(())
}

fn check_value(value: &str) -> Result<(), KeyValueStoreError> {
    let len = value.len();
    if len > MAX_VALUE_SIZE as usize {
        return Err(KeyValueStoreError::ValueTooLarge {
            size: len.min(u32::MAX as usize) as u32,
            max: MAX_VALUE_SIZE,
        });
    }
    Ok(())
}

fn check_range_end(key: &str, range_end: Option<&str>) -> Result<(), KeyValueStoreError> {
    if range_end == Some("") {
        return Err(KeyValueStoreError::InvalidRange {
            key: key.to_string(),
            reason: "range end cannot be empty".into(),
        });
    }
    Ok(())
}

fn check_batch(len: usize) -> Result<(), KeyValueStoreError> {
    if len > MAX_TXN_OPS as usize {
        return Err(KeyValueStoreError::BatchTooLarge {
            size: len as u32,
            max: MAX_TXN_OPS,
        });
    }
    Ok(())
}

fn check_compare(cmp: &TxnCompare) -> Result<(), KeyValueStoreError> {
    check_key(&cmp.key)?;
    check_range_end(&cmp.key, cmp.range_end.as_deref())
}
