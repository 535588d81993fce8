//! Results of operations and their sub-operations.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use kvop_core::ResponseHeader;
use parking_lot::Mutex;

use crate::error::MultiError;
use crate::error::OpError;

/// Result type of operations whose response carries no value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoResult;

/// Shared location a processor writes a result into.
///
/// Factories and processors of one operation run at different times; the
/// slot is how a later step sees the value an earlier one produced.
pub type ResultSlot<R> = Arc<Mutex<R>>;

/// Create an empty result slot.
pub fn result_slot<R: Default>() -> ResultSlot<R> {
    Arc::new(Mutex::new(R::default()))
}

/// Typed result of one operation.
///
/// `value` starts as `R::default()` and is replaced by the mapper. Errors
/// accumulate, they do not short-circuit later processors.
#[derive(Debug)]
pub struct OpResult<R> {
    header: Option<ResponseHeader>,
    value: R,
    errors: MultiError,
}

impl<R: Default> OpResult<R> {
    /// Result of a completed round trip.
    pub fn new(header: ResponseHeader) -> Self {
        Self {
            header: Some(header),
            value: R::default(),
            errors: MultiError::new(),
        }
    }

    /// Result of a round trip that never completed.
    pub fn from_error(error: OpError) -> Self {
        Self {
            header: None,
            value: R::default(),
            errors: MultiError::from(error),
        }
    }
}

impl<R> OpResult<R> {
    /// Header of the round trip, `None` if it failed before a response.
    pub fn header(&self) -> Option<&ResponseHeader> {
        self.header.as_ref()
    }

    pub fn value(&self) -> &R {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut R {
        &mut self.value
    }

    pub fn set_value(&mut self, value: R) {
        self.value = value;
    }

    pub fn add_err(&mut self, error: OpError) {
        self.errors.push(error);
    }

    pub fn errors(&self) -> &MultiError {
        &self.errors
    }

    pub(crate) fn take_errors(&mut self) -> MultiError {
        std::mem::take(&mut self.errors)
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// The collected errors as one error, if any.
    pub fn err(&self) -> Option<OpError> {
        self.errors.clone().into_error()
    }

    /// The value, or the collected errors.
    pub fn into_result(self) -> Result<R, OpError> {
        match self.errors.into_error() {
            Some(err) => Err(err),
            None => Ok(self.value),
        }
    }

    pub(crate) fn into_parts(self) -> (Option<ResponseHeader>, R, MultiError) {
        (self.header, self.value, self.errors)
    }
}

/// Type-erased result of one sub-operation of a transaction.
///
/// Holds the operation's value (`R`) or, for a nested transaction, its
/// `TxnResult`. Callers downcast to the type they declared.
pub struct SubResult(Box<dyn Any + Send + Sync>);

impl SubResult {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        SubResult(Box::new(value))
    }

    pub fn is<T: Any>(&self) -> bool {
        self.0.is::<T>()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    pub fn downcast<T: Any>(self) -> Result<T, SubResult> {
        match self.0.downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(other) => Err(SubResult(other)),
        }
    }
}

impl fmt::Debug for SubResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SubResult(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_result_holds_default() {
        let result: OpResult<i64> = OpResult::new(ResponseHeader { revision: 3 });
        assert_eq!(*result.value(), 0);
        assert_eq!(result.header().map(|h| h.revision), Some(3));
        assert!(!result.has_errors());
    }

    #[test]
    fn errors_accumulate() {
        let mut result: OpResult<i64> = OpResult::new(ResponseHeader::default());
        result.set_value(5);
        result.add_err(OpError::custom("a"));
        result.add_err(OpError::custom("b"));
        assert_eq!(result.errors().len(), 2);
        assert_eq!(*result.value(), 5);
        assert_eq!(result.err().unwrap().to_string(), "- a\n- b");
        assert!(result.into_result().is_err());
    }

    #[test]
    fn from_error_has_no_header() {
        let result: OpResult<NoResult> = OpResult::from_error(OpError::Cancelled);
        assert!(result.header().is_none());
        assert_eq!(result.into_result(), Err(OpError::Cancelled));
    }

    #[test]
    fn sub_result_downcast() {
        let sub = SubResult::new(42_i64);
        assert!(sub.is::<i64>());
        assert_eq!(sub.downcast_ref::<i64>(), Some(&42));
        assert!(sub.downcast_ref::<String>().is_none());
        let sub = sub.downcast::<String>().unwrap_err();
        assert_eq!(sub.downcast::<i64>().unwrap(), 42);
    }

    #[test]
    fn result_slot_starts_default() {
        let slot = result_slot::<Vec<String>>();
        assert!(slot.lock().is_empty());
    }
}
