use serde::Deserialize;
use serde::Serialize;

/// A stored key with its MVCC metadata.
///
/// A zero-valued `KeyValue` stands for an absent key: all revisions are `0`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
    /// Revision of the write that created the key (since its last deletion).
    pub create_revision: i64,
    /// Revision of the last write to the key.
    pub mod_revision: i64,
    /// Number of writes since creation, starting at 1.
    pub version: i64,
}

impl KeyValue {
    /// Create a key-value pair without revision metadata.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ..Self::default()
        }
    }
}

/// Header attached to every store response.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Store-wide revision at the time the request was served.
    ///
    /// Monotonic across the whole keyspace.
    pub revision: i64,
}
