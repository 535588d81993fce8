//! Compare conditions of the `IF` part of a transaction.

use std::cmp::Ordering;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::kv::KeyValue;
use crate::range::prefix_range_end;

/// Comparison target for transaction conditions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CompareTarget {
    Value,
    Version,
    CreateRevision,
    ModRevision,
}

/// Comparison operator for transaction conditions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Equal,
    NotEqual,
    Greater,
    Less,
}

impl CompareOp {
    /// Returns true if `actual.cmp(expected)` satisfies the operator.
    pub fn accepts(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Equal => ordering == Ordering::Equal,
            CompareOp::NotEqual => ordering != Ordering::Equal,
            CompareOp::Greater => ordering == Ordering::Greater,
            CompareOp::Less => ordering == Ordering::Less,
        }
    }
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CompareValue {
    /// Revision or version number.
    Int(i64),
    /// Stored value.
    Value(String),
}

/// A comparison condition for transactions.
///
/// With a `range_end`, every key in `[key, range_end)` must satisfy the
/// condition. An empty range is compared as a single absent key, so
/// `ModRevision == 0` holds and `ModRevision > 0` does not.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TxnCompare {
    pub key: String,
    pub range_end: Option<String>,
    pub target: CompareTarget,
    pub op: CompareOp,
    pub value: CompareValue,
}

impl TxnCompare {
    /// Compare the modification revision of `key`.
    pub fn mod_revision(key: impl Into<String>, op: CompareOp, revision: i64) -> Self {
        Self::int(key, CompareTarget::ModRevision, op, revision)
    }

    /// Compare the create revision of `key`.
    pub fn create_revision(key: impl Into<String>, op: CompareOp, revision: i64) -> Self {
        Self::int(key, CompareTarget::CreateRevision, op, revision)
    }

    /// Compare the version of `key`.
    pub fn version(key: impl Into<String>, op: CompareOp, version: i64) -> Self {
        Self::int(key, CompareTarget::Version, op, version)
    }

    /// Compare the stored value of `key`.
    pub fn value(key: impl Into<String>, op: CompareOp, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            range_end: None,
            target: CompareTarget::Value,
            op,
            value: CompareValue::Value(value.into()),
        }
    }

    fn int(key: impl Into<String>, target: CompareTarget, op: CompareOp, value: i64) -> Self {
        Self {
            key: key.into(),
            range_end: None,
            target,
            op,
            value: CompareValue::Int(value),
        }
    }

    /// Apply the condition to every key in `[key, range_end)`.
    pub fn with_range_end(mut self, range_end: Option<String>) -> Self {
        self.range_end = range_end;
        self
    }

    /// Apply the condition to every key starting with `key`.
    pub fn with_prefix(mut self) -> Self {
        self.range_end = Some(prefix_range_end(&self.key));
        self
    }

    /// Evaluate the condition against one key.
    ///
    /// Mismatched target and value kinds never match.
    pub fn matches(&self, kv: &KeyValue) -> bool {
        let ordering = match (self.target, &self.value) {
            (CompareTarget::Value, CompareValue::Value(expected)) => kv.value.as_str().cmp(expected.as_str()),
            (CompareTarget::Version, CompareValue::Int(expected)) => kv.version.cmp(expected),
            (CompareTarget::CreateRevision, CompareValue::Int(expected)) => kv.create_revision.cmp(expected),
            (CompareTarget::ModRevision, CompareValue::Int(expected)) => kv.mod_revision.cmp(expected),
            _ => return false,
        };
        self.op.accepts(ordering)
    }
}

impl fmt::Display for CompareTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareTarget::Value => "VALUE",
            CompareTarget::Version => "VERSION",
            CompareTarget::CreateRevision => "CREATE",
            CompareTarget::ModRevision => "MOD",
        };
        f.write_str(s)
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Equal => "EQUAL",
            CompareOp::NotEqual => "NOT_EQUAL",
            CompareOp::Greater => "GREATER",
            CompareOp::Less => "LESS",
        };
        f.write_str(s)
    }
}

impl fmt::Display for CompareValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompareValue::Int(v) => write!(f, "{v}"),
            CompareValue::Value(v) => write!(f, "{v:?}"),
        }
    }
}

/// Formats as `"key" MOD GREATER 0` or `["a/", "a0") MOD LESS 5`.
impl fmt::Display for TxnCompare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.range_end {
            Some(end) => write!(f, "[{:?}, {:?})", self.key, end)?,
            None => write!(f, "{:?}", self.key)?,
        }
        write!(f, " {} {} {}", self.target, self.op, self.value)
    }
}
