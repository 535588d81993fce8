use thiserror::Error;

/// Errors returned by a key-value store round trip.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyValueStoreError {
    /// The key does not exist.
    #[error("key '{key}' not found")]
    NotFound { key: String },

    /// Generic non-retryable failure.
    #[error("operation failed: {reason}")]
    Failed { reason: String },

    /// The key is empty.
    #[error("key cannot be empty")]
    EmptyKey,

    /// The key exceeds the size limit.
    #[error("key size {size} exceeds maximum of {max} bytes")]
    KeyTooLarge { size: u32, max: u32 },

    /// The value exceeds the size limit.
    #[error("value size {size} exceeds maximum of {max} bytes")]
    ValueTooLarge { size: u32, max: u32 },

    /// A transaction list exceeds the op limit.
    #[error("batch size {size} exceeds maximum of {max} operations")]
    BatchTooLarge { size: u32, max: u32 },

    /// A range end is malformed.
    #[error("invalid range for key '{key}': {reason}")]
    InvalidRange { key: String, reason: String },

    /// The client gave up waiting for the store.
    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// The store cannot be reached right now.
    #[error("store unavailable: {reason}")]
    Unavailable { reason: String },

    /// The store rejected the request due to load or quota.
    #[error("resource exhausted: {reason}")]
    ResourceExhausted { reason: String },

    /// Internal store failure.
    #[error("internal store error: {reason}")]
    Internal { reason: String },

    /// The store-side deadline expired.
    #[error("deadline exceeded: {reason}")]
    DeadlineExceeded { reason: String },

    /// The store was not in a state to serve the request.
    #[error("failed precondition: {reason}")]
    FailedPrecondition { reason: String },

    /// The contacted member lost leadership (stale leader).
    #[error("not leader; current leader: {leader:?}; {reason}")]
    NotLeader { leader: Option<u64>, reason: String },

    /// The round trip was cancelled by the caller.
    #[error("request cancelled")]
    Cancelled,
}

impl KeyValueStoreError {
    /// Returns true for transient transport faults worth re-submitting.
    ///
    /// The request was not applied, or applying it again is safe because the
    /// transaction compares guard against a double commit.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            KeyValueStoreError::Unavailable { .. }
                | KeyValueStoreError::ResourceExhausted { .. }
                | KeyValueStoreError::Internal { .. }
                | KeyValueStoreError::DeadlineExceeded { .. }
                | KeyValueStoreError::FailedPrecondition { .. }
                | KeyValueStoreError::NotLeader { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kv_error_not_found_display() {
        let err = KeyValueStoreError::NotFound {
            key: "my-key".to_string(),
        };
        assert_eq!(err.to_string(), "key 'my-key' not found");
    }

    #[test]
    fn kv_error_not_leader_display() {
        let err = KeyValueStoreError::NotLeader {
            leader: Some(5),
            reason: "try again".to_string(),
        };
        assert_eq!(err.to_string(), "not leader; current leader: Some(5); try again");
    }

    #[test]
    fn kv_error_key_too_large_display() {
        let err = KeyValueStoreError::KeyTooLarge { size: 2048, max: 1024 };
        assert_eq!(err.to_string(), "key size 2048 exceeds maximum of 1024 bytes");
    }

    #[test]
    fn kv_error_batch_too_large_display() {
        let err = KeyValueStoreError::BatchTooLarge { size: 200, max: 128 };
        assert_eq!(err.to_string(), "batch size 200 exceeds maximum of 128 operations");
    }

    #[test]
    fn retryable_allow_list() {
        let retryable = [
            KeyValueStoreError::Unavailable { reason: "x".into() },
            KeyValueStoreError::ResourceExhausted { reason: "x".into() },
            KeyValueStoreError::Internal { reason: "x".into() },
            KeyValueStoreError::DeadlineExceeded { reason: "x".into() },
            KeyValueStoreError::FailedPrecondition { reason: "x".into() },
            KeyValueStoreError::NotLeader {
                leader: None,
                reason: "x".into(),
            },
        ];
        for err in retryable {
            assert!(err.is_retryable(), "{err} should be retryable");
        }

        let fatal = [
            KeyValueStoreError::EmptyKey,
            KeyValueStoreError::Failed { reason: "x".into() },
            KeyValueStoreError::Timeout { duration_ms: 1 },
            KeyValueStoreError::Cancelled,
            KeyValueStoreError::NotFound { key: "k".into() },
        ];
        for err in fatal {
            assert!(!err.is_retryable(), "{err} should not be retryable");
        }
    }

    #[test]
    fn kv_error_clone_and_eq() {
        let err = KeyValueStoreError::Unavailable { reason: "down".into() };
        assert_eq!(err.clone(), err);
        assert_ne!(err, KeyValueStoreError::EmptyKey);
    }
}
