//! Error types for operations, transactions and atomic operations.

use std::fmt;
use std::time::Duration;

use kvop_core::KeyValueStoreError;
use snafu::Snafu;

/// Errors produced while building, executing or processing operations.
#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum OpError {
    /// Operations were composed incorrectly. Never retried.
    #[snafu(display("invalid operation composition: {message}"))]
    Usage {
        /// What was composed incorrectly.
        message: String,
    },

    /// A request factory failed while building a transaction.
    #[snafu(display("cannot create operation {path}: {source}"))]
    Build {
        /// Position of the failed operation, e.g. `[then][1]`.
        path: String,
        /// The factory error.
        source: Box<OpError>,
    },

    /// The store round trip failed.
    #[snafu(display("store request failed: {source}"))]
    Store {
        /// The underlying error.
        source: KeyValueStoreError,
    },

    /// The response does not match the request kind.
    #[snafu(display("unexpected response: expected {expected}, got {actual}"))]
    UnexpectedResponse {
        /// Expected response kind.
        expected: String,
        /// Received response kind.
        actual: String,
    },

    /// A single-key read returned several items.
    #[snafu(display("at most one result expected, found {found}"))]
    UnexpectedCount {
        /// Number of returned items.
        found: i64,
    },

    /// A required key does not exist.
    #[snafu(display("key \"{key}\" not found"))]
    NotFound {
        /// The missing key.
        key: String,
    },

    /// A key that must not exist already exists.
    #[snafu(display("key \"{key}\" already exists"))]
    AlreadyExists {
        /// The existing key.
        key: String,
    },

    /// Logical error reported by a caller's processor or factory.
    #[snafu(display("{message}"))]
    Custom {
        /// Error message.
        message: String,
    },

    /// A required lock is not held by this process.
    #[snafu(display("{phase}: lock is not locked"))]
    NotLocked {
        /// `read phase` or `write phase`.
        phase: String,
    },

    /// A required lock was taken over by another owner.
    #[snafu(display("{phase}: lock is locked by another session"))]
    Locked {
        /// `read phase` or `write phase`.
        phase: String,
    },

    /// The conflict retry budget ran out.
    #[snafu(display(
        "atomic update failed: revision has been modified between read and write, attempt {attempt}, elapsed time {elapsed:?}"
    ))]
    RevisionChanged {
        /// Number of attempts made.
        attempt: u32,
        /// Time spent in all attempts.
        elapsed: Duration,
    },

    /// Read factories kept registering further read levels.
    #[snafu(display("read phase exceeded the maximum of {max} nested read levels"))]
    ReadLevelExceeded {
        /// The level limit.
        max: u32,
    },

    /// The caller cancelled the operation.
    #[snafu(display("operation cancelled"))]
    Cancelled,

    /// Several errors at once.
    #[snafu(display("{errors}"))]
    Multiple {
        /// The collected errors, at least two.
        errors: MultiError,
    },
}

impl OpError {
    /// Create a logical error with a message.
    pub fn custom(message: impl Into<String>) -> Self {
        OpError::Custom {
            message: message.into(),
        }
    }

    /// Create a composition error with a message.
    pub fn usage(message: impl Into<String>) -> Self {
        OpError::Usage {
            message: message.into(),
        }
    }

    /// Returns true if the error is a lock ownership failure.
    pub fn is_lock_error(&self) -> bool {
        matches!(self, OpError::Locked { .. } | OpError::NotLocked { .. })
    }
}

impl From<KeyValueStoreError> for OpError {
    fn from(source: KeyValueStoreError) -> Self {
        OpError::Store { source }
    }
}

/// Container of errors collected from several processors or branches.
///
/// A single error formats as itself, several as a `- ` prefixed list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultiError {
    errors: Vec<OpError>,
}

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an error, flattening nested multi-errors.
    pub fn push(&mut self, error: OpError) {
        match error {
            OpError::Multiple { errors } => self.errors.extend(errors.errors),
            other => self.errors.push(other),
        }
    }

    /// Append every error of `other`.
    pub fn extend(&mut self, other: MultiError) {
        self.errors.extend(other.errors);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OpError> {
        self.errors.iter()
    }

    /// Returns true if any collected error matches the predicate.
    pub fn any(&self, predicate: impl Fn(&OpError) -> bool) -> bool {
        self.errors.iter().any(predicate)
    }

    /// Collapse into one error: `None` if empty, the error itself if single.
    pub fn into_error(mut self) -> Option<OpError> {
        match self.errors.len() {
            0 => None,
            1 => self.errors.pop(),
            _ => Some(OpError::Multiple { errors: self }),
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let [single] = self.errors.as_slice() {
            return write!(f, "{single}");
        }
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "- {err}")?;
        }
        Ok(())
    }
}

impl From<OpError> for MultiError {
    fn from(error: OpError) -> Self {
        let mut errors = MultiError::new();
        errors.push(error);
        errors
    }
}

impl IntoIterator for MultiError {
    type Item = OpError;
    type IntoIter = std::vec::IntoIter<OpError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}
