//! Typed operations.
//!
//! An operation pairs a request factory with a mapper that turns the store
//! response into a typed value, plus an ordered list of processors run on
//! the typed result. Operations are values: the `with_*` methods return a
//! new operation and leave the original untouched, so one operation can be
//! shared by several transactions.

use std::sync::Arc;

use kvop_core::KvClient;
use kvop_core::RequestOp;
use kvop_core::ResponseHeader;
use kvop_core::ResponseOp;

use crate::error::MultiError;
use crate::error::OpError;
use crate::result::OpResult;
use crate::result::ResultSlot;
use crate::result::SubResult;
use crate::retry::ExecuteOptions;
use crate::retry::execute_with_retry;
use crate::txn::LowLevelTxn;

/// Anything that can be turned into one store request and map its response back.
///
/// Implemented by [`TypedOp`] and [`TxnOp`](crate::TxnOp). Transactions
/// accept any `Op` as a sub-operation.
pub trait Op: Send + Sync {
    /// Build the low-level request together with the routing of its response.
    fn low_level(&self) -> Result<LowLevelOp, OpError>;
}

impl<T: Op + ?Sized> Op for Box<T> {
    fn low_level(&self) -> Result<LowLevelOp, OpError> {
        (**self).low_level()
    }
}

impl<T: Op + ?Sized> Op for Arc<T> {
    fn low_level(&self) -> Result<LowLevelOp, OpError> {
        (**self).low_level()
    }
}

/// A built request plus what to do with its response.
pub struct LowLevelOp {
    request: RequestOp,
    pub(crate) route: Route,
}

pub(crate) enum Route {
    /// Plain get/put/delete, its response goes to one typed result.
    Single(Arc<dyn Deliver>),
    /// Transaction, may be flattened into a parent.
    Txn(Arc<LowLevelTxn>),
}

impl LowLevelOp {
    pub(crate) fn new(request: RequestOp, route: Route) -> Self {
        Self { request, route }
    }

    pub fn request(&self) -> &RequestOp {
        &self.request
    }

    pub fn into_request(self) -> RequestOp {
        self.request
    }

    /// Returns true if the operation is a transaction.
    pub fn is_txn(&self) -> bool {
        matches!(self.route, Route::Txn(_))
    }

    pub(crate) fn into_parts(self) -> (RequestOp, Route) {
        (self.request, self.route)
    }
}

/// Maps a raw sub-response and runs the operation's processors.
pub(crate) trait Deliver: Send + Sync {
    fn deliver(&self, header: &ResponseHeader, response: ResponseOp) -> (SubResult, MultiError);
}

type RequestFactory = Arc<dyn Fn() -> Result<RequestOp, OpError> + Send + Sync>;
type ResponseMapper<R> = Arc<dyn Fn(&ResponseHeader, ResponseOp) -> Result<R, OpError> + Send + Sync>;

/// Callback run on the typed result of an operation.
pub type Processor<R> = Arc<dyn Fn(&mut OpResult<R>) + Send + Sync>;

/// A single store request with a typed result.
///
/// Processors run in registration order after every completed round trip,
/// even when an earlier step already recorded an error, so several
/// validators can each contribute to one aggregated error. They never run
/// when the round trip itself failed.
pub struct TypedOp<R> {
    factory: RequestFactory,
    mapper: ResponseMapper<R>,
    processors: Vec<Processor<R>>,
}

impl<R> Clone for TypedOp<R> {
    fn clone(&self) -> Self {
        Self {
            factory: self.factory.clone(),
            mapper: self.mapper.clone(),
            processors: self.processors.clone(),
        }
    }
}

impl<R: Default + Send + Sync + 'static> TypedOp<R> {
    /// Create an operation from a request factory and a response mapper.
    pub fn new<F, M>(factory: F, mapper: M) -> Self
    where
        F: Fn() -> Result<RequestOp, OpError> + Send + Sync + 'static,
        M: Fn(&ResponseHeader, ResponseOp) -> Result<R, OpError> + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
            mapper: Arc::new(mapper),
            processors: Vec::new(),
        }
    }

    /// Create an operation from a fixed request.
    pub fn from_request<M>(request: RequestOp, mapper: M) -> Self
    where
        M: Fn(&ResponseHeader, ResponseOp) -> Result<R, OpError> + Send + Sync + 'static,
    {
        Self::new(move || Ok(request.clone()), mapper)
    }

    /// Return a copy with `processor` appended.
    pub fn with_processor<P>(&self, processor: P) -> Self
    where
        P: Fn(&mut OpResult<R>) + Send + Sync + 'static,
    {
        let mut op = self.clone();
        op.processors.push(Arc::new(processor));
        op
    }

    /// Copy the value into `slot` after each round trip.
    pub fn with_result_to(&self, slot: ResultSlot<R>) -> Self
    where
        R: Clone,
    {
        self.with_processor(move |result| {
            *slot.lock() = result.value().clone();
        })
    }

    /// Call `f` with the value.
    pub fn with_on_result<F>(&self, f: F) -> Self
    where
        F: Fn(&R) + Send + Sync + 'static,
    {
        self.with_processor(move |result| f(result.value()))
    }

    /// Call `f` with the value and record the error it returns.
    pub fn with_on_result_or_err<F>(&self, f: F) -> Self
    where
        F: Fn(&R) -> Result<(), OpError> + Send + Sync + 'static,
    {
        self.with_processor(move |result| {
            if let Err(err) = f(result.value()) {
                result.add_err(err);
            }
        })
    }

    /// Record the error from `make_error` if the value is `R::default()`.
    pub fn with_empty_result_as_error<E>(&self, make_error: E) -> Self
    where
        R: PartialEq,
        E: Fn() -> OpError + Send + Sync + 'static,
    {
        self.with_processor(move |result| {
            if *result.value() == R::default() {
                result.add_err(make_error());
            }
        })
    }

    /// Record the error from `make_error` if the value is not `R::default()`.
    pub fn with_not_empty_result_as_error<E>(&self, make_error: E) -> Self
    where
        R: PartialEq,
        E: Fn() -> OpError + Send + Sync + 'static,
    {
        self.with_processor(move |result| {
            if *result.value() != R::default() {
                result.add_err(make_error());
            }
        })
    }

    /// Record the error returned by `validator`, if any.
    pub fn with_result_validator<V>(&self, validator: V) -> Self
    where
        V: Fn(&R) -> Result<(), OpError> + Send + Sync + 'static,
    {
        self.with_on_result_or_err(validator)
    }

    /// Build the request.
    pub fn request(&self) -> Result<RequestOp, OpError> {
        (self.factory)()
    }

    /// Map a response to the typed result and run the processors.
    pub fn map_response(&self, header: &ResponseHeader, response: ResponseOp) -> OpResult<R> {
        run_typed(&self.mapper, &self.processors, header, response)
    }

    /// Execute the operation as its own round trip.
    pub async fn execute(&self, client: &dyn KvClient, options: &ExecuteOptions) -> OpResult<R> {
        let request = match self.request() {
            Ok(request) => request,
            Err(err) => return OpResult::from_error(err),
        };
        match execute_with_retry(client, request, options).await {
            Ok(response) => self.map_response(&response.header, response.response),
            Err(err) => OpResult::from_error(err),
        }
    }

    /// Execute the operation and return the value or the collected errors.
    pub async fn execute_or_err(&self, client: &dyn KvClient, options: &ExecuteOptions) -> Result<R, OpError> {
        self.execute(client, options).await.into_result()
    }
}

impl<R: Default + Send + Sync + 'static> Op for TypedOp<R> {
    fn low_level(&self) -> Result<LowLevelOp, OpError> {
        let request = self.request()?;
        let deliver = TypedDeliver {
            mapper: self.mapper.clone(),
            processors: self.processors.clone(),
        };
        Ok(LowLevelOp::new(request, Route::Single(Arc::new(deliver))))
    }
}

struct TypedDeliver<R> {
    mapper: ResponseMapper<R>,
    processors: Vec<Processor<R>>,
}

impl<R: Default + Send + Sync + 'static> Deliver for TypedDeliver<R> {
    fn deliver(&self, header: &ResponseHeader, response: ResponseOp) -> (SubResult, MultiError) {
        let (_, value, errors) = run_typed(&self.mapper, &self.processors, header, response).into_parts();
        (SubResult::new(value), errors)
    }
}

fn run_typed<R: Default>(
    mapper: &ResponseMapper<R>,
    processors: &[Processor<R>],
    header: &ResponseHeader,
    response: ResponseOp,
) -> OpResult<R> {
    let mut result = OpResult::new(*header);
    match mapper(header, response) {
        Ok(value) => result.set_value(value),
        Err(err) => result.add_err(err),
    }
    for processor in processors {
        processor(&mut result);
    }
    result
}
