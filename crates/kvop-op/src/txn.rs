//! Transaction builder with flattening of merged sub-transactions.
//!
//! A [`TxnOp`] is an ordered list of parts (`when`, `then`, `then_txn`,
//! `or_else`, `merge`) compiled into one physical `IF`/`THEN`/`ELSE`
//! request. Merging a sub-transaction splices it into the parent:
//!
//! - its compares are appended to the parent `IF` (all AND together)
//! - its `THEN` operations are spliced contiguously into the parent `THEN`,
//!   the window `[start, end)` is remembered
//! - its `ELSE` operations are wrapped in a nested transaction
//!   `IF(sub compares) THEN() ELSE(sub else ops)` placed in the parent `ELSE`
//!
//! After the round trip the sub-transaction's own view is rebuilt from the
//! parent response. If the parent succeeded, every sub-transaction succeeded
//! with its window of `THEN` responses. If the parent failed, the nested
//! transaction tells whether the sub-transaction's own compares failed (its
//! `ELSE` ran) or held (the parent failed for another reason and both of its
//! branches were skipped, so it produces no result at all).

use std::ops::Deref;
use std::ops::DerefMut;
use std::ops::Range;
use std::sync::Arc;

use kvop_core::KvClient;
use kvop_core::RequestOp;
use kvop_core::ResponseHeader;
use kvop_core::ResponseOp;
use kvop_core::TxnCompare;
use kvop_core::TxnRequest;
use kvop_core::TxnResponse;

use crate::error::MultiError;
use crate::error::OpError;
use crate::op::Deliver;
use crate::op::LowLevelOp;
use crate::op::Op;
use crate::op::Route;
use crate::result::NoResult;
use crate::result::OpResult;
use crate::result::ResultSlot;
use crate::result::SubResult;
use crate::retry::ExecuteOptions;
use crate::retry::execute_with_retry;

/// Callback run on the result of a transaction.
pub type TxnProcessor<R> = Arc<dyn Fn(&mut TxnResult<R>) + Send + Sync>;

#[derive(Clone)]
enum TxnPart {
    If(TxnCompare),
    Then(Arc<dyn Op>),
    ThenTxn(Arc<dyn Op>),
    Else(Arc<dyn Op>),
    Merge(Arc<dyn Op>),
}

/// Builder of one physical transaction.
pub struct TxnOp<R = NoResult> {
    parts: Vec<TxnPart>,
    errors: Vec<OpError>,
    processors: Vec<TxnProcessor<R>>,
}

impl<R> Clone for TxnOp<R> {
    fn clone(&self) -> Self {
        Self {
            parts: self.parts.clone(),
            errors: self.errors.clone(),
            processors: self.processors.clone(),
        }
    }
}

impl<R: Default + Send + Sync + 'static> Default for TxnOp<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Default + Send + Sync + 'static> TxnOp<R> {
    pub fn new() -> Self {
        Self {
            parts: Vec::new(),
            errors: Vec::new(),
            processors: Vec::new(),
        }
    }

    /// Add a compare to the `IF` part.
    pub fn when(mut self, condition: TxnCompare) -> Self {
        self.parts.push(TxnPart::If(condition));
        self
    }

    /// Add several compares to the `IF` part.
    pub fn when_all(mut self, conditions: impl IntoIterator<Item = TxnCompare>) -> Self {
        self.parts.extend(conditions.into_iter().map(TxnPart::If));
        self
    }

    /// Add an operation to the `THEN` branch.
    ///
    /// The operation must not be a transaction, use [`then_txn`](Self::then_txn)
    /// or [`merge`](Self::merge) instead. This is checked when the
    /// transaction is built.
    pub fn then<O: Op + 'static>(mut self, op: O) -> Self {
        self.parts.push(TxnPart::Then(Arc::new(op)));
        self
    }

    /// Add a sub-transaction to the `THEN` branch as a nested transaction.
    pub fn then_txn<R2: Default + Send + Sync + 'static>(mut self, txn: TxnOp<R2>) -> Self {
        self.parts.push(TxnPart::ThenTxn(Arc::new(txn)));
        self
    }

    /// Add an operation to the `ELSE` branch.
    ///
    /// A transaction is placed as a nested transaction.
    pub fn or_else<O: Op + 'static>(mut self, op: O) -> Self {
        self.parts.push(TxnPart::Else(Arc::new(op)));
        self
    }

    /// Merge an operation or a sub-transaction into this transaction.
    ///
    /// A plain operation behaves like [`then`](Self::then). A transaction is
    /// flattened, see the module documentation.
    pub fn merge<O: Op + 'static>(mut self, op: O) -> Self {
        self.parts.push(TxnPart::Merge(Arc::new(op)));
        self
    }

    /// Record an error discovered while composing the transaction.
    ///
    /// It surfaces when the transaction is built, with factory errors.
    pub fn add_error(mut self, error: OpError) -> Self {
        self.errors.push(error);
        self
    }

    /// Append a processor run after each completed round trip.
    pub fn add_processor<P>(mut self, processor: P) -> Self
    where
        P: Fn(&mut TxnResult<R>) + Send + Sync + 'static,
    {
        self.processors.push(Arc::new(processor));
        self
    }

    /// Run `f` if the `IF` part held.
    pub fn on_succeeded<F>(self, f: F) -> Self
    where
        F: Fn(&mut TxnResult<R>) + Send + Sync + 'static,
    {
        self.add_processor(move |result| {
            if result.succeeded() {
                f(result);
            }
        })
    }

    /// Run `f` if the `IF` part failed.
    pub fn on_failed<F>(self, f: F) -> Self
    where
        F: Fn(&mut TxnResult<R>) + Send + Sync + 'static,
    {
        self.add_processor(move |result| {
            if !result.succeeded() {
                f(result);
            }
        })
    }

    /// Call `f` with the result.
    pub fn on_result<F>(self, f: F) -> Self
    where
        F: Fn(&TxnResult<R>) + Send + Sync + 'static,
    {
        self.add_processor(move |result| f(result))
    }

    /// Copy the value into `slot` after each round trip.
    pub fn set_result_to(self, slot: ResultSlot<R>) -> Self
    where
        R: Clone,
    {
        self.add_processor(move |result| {
            *slot.lock() = result.value().clone();
        })
    }

    /// Returns true if nothing was added.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty() && self.errors.is_empty() && self.processors.is_empty()
    }

    /// Build the physical transaction without executing it.
    pub fn request(&self) -> Result<TxnRequest, OpError> {
        Ok(self.compile()?.request)
    }

    /// Execute the transaction as its own round trip.
    pub async fn execute(&self, client: &dyn KvClient, options: &ExecuteOptions) -> TxnResult<R> {
        let compiled = match self.compile_typed() {
            Ok(compiled) => compiled,
            Err(err) => return TxnResult::from_error(err),
        };
        match compiled.execute(client, options).await {
            Ok(result) => result,
            Err(err) => TxnResult::from_error(err),
        }
    }

    /// Execute and return the value or the collected errors.
    pub async fn execute_or_err(&self, client: &dyn KvClient, options: &ExecuteOptions) -> Result<R, OpError> {
        self.execute(client, options).await.into_result()
    }

    pub(crate) fn compile_typed(&self) -> Result<CompiledTxn<R>, OpError> {
        Ok(CompiledTxn {
            low: self.compile()?,
            finish: TypedFinish {
                processors: self.processors.clone(),
            },
        })
    }

    fn compile(&self) -> Result<LowLevelTxn, OpError> {
        let mut request = TxnRequest::default();
        let mut then_routes = Vec::new();
        let mut else_routes = Vec::new();
        let mut errors = MultiError::new();
        for err in &self.errors {
            errors.push(err.clone());
        }

        let (mut then_n, mut then_txn_n, mut else_n, mut merge_n) = (0, 0, 0, 0);
        for part in &self.parts {
            match part {
                TxnPart::If(condition) => request.compare.push(condition.clone()),
                TxnPart::Then(op) => {
                    let path = format!("[then][{then_n}]");
                    then_n += 1;
                    match op.low_level().map(LowLevelOp::into_parts) {
                        Ok((op_request, Route::Single(deliver))) => {
                            then_routes.push(BranchRoute::Op {
                                index: request.success.len(),
                                deliver,
                            });
                            request.success.push(op_request);
                        }
                        Ok((_, Route::Txn(_))) => errors.push(OpError::usage(format!(
                            "operation {path} is a transaction, use then_txn or merge"
                        ))),
                        Err(err) => errors.push(build_error(path, err)),
                    }
                }
                TxnPart::ThenTxn(op) => {
                    let path = format!("[then_txn][{then_txn_n}]");
                    then_txn_n += 1;
                    match op.low_level().map(LowLevelOp::into_parts) {
                        Ok((op_request, route)) => {
                            then_routes.push(BranchRoute::placed(request.success.len(), route));
                            request.success.push(op_request);
                        }
                        Err(err) => errors.push(build_error(path, err)),
                    }
                }
                TxnPart::Else(op) => {
                    let path = format!("[else][{else_n}]");
                    else_n += 1;
                    match op.low_level().map(LowLevelOp::into_parts) {
                        Ok((op_request, route)) => {
                            else_routes.push(BranchRoute::placed(request.failure.len(), route));
                            request.failure.push(op_request);
                        }
                        Err(err) => errors.push(build_error(path, err)),
                    }
                }
                TxnPart::Merge(op) => {
                    let path = format!("[merge][{merge_n}]");
                    merge_n += 1;
                    match op.low_level().map(LowLevelOp::into_parts) {
                        Ok((op_request, Route::Single(deliver))) => {
                            then_routes.push(BranchRoute::Op {
                                index: request.success.len(),
                                deliver,
                            });
                            request.success.push(op_request);
                        }
                        Ok((_, Route::Txn(sub))) => {
                            request.compare.extend(sub.request.compare.iter().cloned());

                            let start = request.success.len();
                            request.success.extend(sub.request.success.iter().cloned());
                            then_routes.push(BranchRoute::MergedThen {
                                range: start..request.success.len(),
                                txn: sub.clone(),
                            });

                            else_routes.push(BranchRoute::MergedElse {
                                index: request.failure.len(),
                                txn: sub.clone(),
                            });
                            request.failure.push(RequestOp::txn(
                                sub.request.compare.clone(),
                                Vec::new(),
                                sub.request.failure.clone(),
                            ));
                        }
                        Err(err) => errors.push(build_error(path, err)),
                    }
                }
            }
        }

        if let Some(err) = errors.into_error() {
            return Err(err);
        }
        Ok(LowLevelTxn {
            request,
            then_routes,
            else_routes,
            finish: Arc::new(TypedFinish {
                processors: self.processors.clone(),
            }),
        })
    }
}

impl<R: Default + Send + Sync + 'static> Op for TxnOp<R> {
    fn low_level(&self) -> Result<LowLevelOp, OpError> {
        let low = self.compile()?;
        let request = RequestOp::Txn(low.request.clone());
        Ok(LowLevelOp::new(request, Route::Txn(Arc::new(low))))
    }
}

fn build_error(path: String, err: OpError) -> OpError {
    OpError::Build {
        path,
        source: Box::new(err),
    }
}

/// Result of a transaction.
///
/// Dereferences to the inner [`OpResult`] for the value and errors.
/// `sub_results` holds one entry per executed sub-operation in declaration
/// order. Merged sub-transactions contribute their own entries inline,
/// `then_txn` sub-transactions contribute their `TxnResult`.
#[derive(Debug)]
pub struct TxnResult<R> {
    result: OpResult<R>,
    succeeded: bool,
    raw: Option<TxnResponse>,
    sub_results: Vec<SubResult>,
}

impl<R: Default> TxnResult<R> {
    pub(crate) fn from_error(error: OpError) -> Self {
        Self {
            result: OpResult::from_error(error),
            succeeded: false,
            raw: None,
            sub_results: Vec::new(),
        }
    }
}

impl<R> TxnResult<R> {
    /// True if the `IF` part held.
    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    /// Raw responses of the branch that ran.
    pub fn raw(&self) -> Option<&TxnResponse> {
        self.raw.as_ref()
    }

    pub fn sub_results(&self) -> &[SubResult] {
        &self.sub_results
    }

    /// Value of the sub-operation at `index`, if it has type `T`.
    pub fn sub_result<T: std::any::Any>(&self, index: usize) -> Option<&T> {
        self.sub_results.get(index).and_then(SubResult::downcast_ref::<T>)
    }

    pub fn into_sub_results(self) -> Vec<SubResult> {
        self.sub_results
    }

    /// The value, or the collected errors.
    pub fn into_result(self) -> Result<R, OpError> {
        self.result.into_result()
    }
}

impl<R> Deref for TxnResult<R> {
    type Target = OpResult<R>;

    fn deref(&self) -> &Self::Target {
        &self.result
    }
}

impl<R> DerefMut for TxnResult<R> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.result
    }
}

/// A compiled transaction ready to be submitted.
pub(crate) struct CompiledTxn<R> {
    low: LowLevelTxn,
    finish: TypedFinish<R>,
}

impl<R: Default + Send + Sync + 'static> CompiledTxn<R> {
    pub(crate) fn request(&self) -> &TxnRequest {
        &self.low.request
    }

    /// Submit the transaction. `Err` means the round trip failed.
    pub(crate) async fn execute(&self, client: &dyn KvClient, options: &ExecuteOptions) -> Result<TxnResult<R>, OpError> {
        let response = execute_with_retry(client, RequestOp::Txn(self.low.request.clone()), options).await?;
        match response.response {
            ResponseOp::Txn(txn) => {
                let outcome = self.low.collect(&response.header, txn.succeeded, txn.responses);
                Ok(self.finish.run(outcome))
            }
            other => Err(OpError::UnexpectedResponse {
                expected: "txn".into(),
                actual: other.kind_name().into(),
            }),
        }
    }
}

/// Compiled, untyped form of a transaction with its response routing.
pub(crate) struct LowLevelTxn {
    request: TxnRequest,
    then_routes: Vec<BranchRoute>,
    else_routes: Vec<BranchRoute>,
    finish: Arc<dyn FinishTxn>,
}

enum BranchRoute {
    /// Plain operation at `index` of the branch.
    Op { index: usize, deliver: Arc<dyn Deliver> },
    /// Nested transaction at `index` of the branch.
    Nested { index: usize, txn: Arc<LowLevelTxn> },
    /// `THEN` operations of a merged sub-transaction.
    MergedThen { range: Range<usize>, txn: Arc<LowLevelTxn> },
    /// Nested `IF(sub) THEN() ELSE(sub else)` of a merged sub-transaction.
    MergedElse { index: usize, txn: Arc<LowLevelTxn> },
}

impl BranchRoute {
    fn placed(index: usize, route: Route) -> Self {
        match route {
            Route::Single(deliver) => BranchRoute::Op { index, deliver },
            Route::Txn(txn) => BranchRoute::Nested { index, txn },
        }
    }
}

/// Untyped view of one executed transaction, before its processors ran.
pub(crate) struct TxnOutcome {
    header: ResponseHeader,
    succeeded: bool,
    raw: TxnResponse,
    sub_results: Vec<SubResult>,
    errors: MultiError,
}

impl LowLevelTxn {
    /// Route the responses of the branch that ran to the sub-operations.
    fn collect(&self, header: &ResponseHeader, succeeded: bool, responses: Vec<ResponseOp>) -> TxnOutcome {
        let raw = TxnResponse {
            succeeded,
            responses: responses.clone(),
        };
        let mut slots: Vec<Option<ResponseOp>> = responses.into_iter().map(Some).collect();
        let mut sub_results = Vec::new();
        let mut errors = MultiError::new();
        let routes = if succeeded { &self.then_routes } else { &self.else_routes };

        for route in routes {
            match route {
                BranchRoute::Op { index, deliver } => match take_slot(&mut slots, *index) {
                    Ok(response) => {
                        let (value, errs) = deliver.deliver(header, response);
                        sub_results.push(value);
                        errors.extend(errs);
                    }
                    Err(err) => errors.push(err),
                },
                BranchRoute::Nested { index, txn } => match take_slot(&mut slots, *index).and_then(expect_txn) {
                    Ok(nested) => {
                        let outcome = txn.collect(header, nested.succeeded, nested.responses);
                        let (value, errs) = txn.finish.finish_nested(outcome);
                        sub_results.push(value);
                        errors.extend(errs);
                    }
                    Err(err) => errors.push(err),
                },
                BranchRoute::MergedThen { range, txn } => {
                    let window: Result<Vec<ResponseOp>, OpError> =
                        range.clone().map(|index| take_slot(&mut slots, index)).collect();
                    match window {
                        Ok(window) => {
                            let outcome = txn.collect(header, true, window);
                            let (values, errs) = txn.finish.finish_merged(outcome);
                            sub_results.extend(values);
                            errors.extend(errs);
                        }
                        Err(err) => errors.push(err),
                    }
                }
                BranchRoute::MergedElse { index, txn } => match take_slot(&mut slots, *index).and_then(expect_txn) {
                    // The sub-transaction's own compares held, both of its
                    // branches were skipped.
                    Ok(nested) if nested.succeeded => {}
                    Ok(nested) => {
                        let outcome = txn.collect(header, false, nested.responses);
                        let (values, errs) = txn.finish.finish_merged(outcome);
                        sub_results.extend(values);
                        errors.extend(errs);
                    }
                    Err(err) => errors.push(err),
                },
            }
        }

        TxnOutcome {
            header: *header,
            succeeded,
            raw,
            sub_results,
            errors,
        }
    }
}

fn take_slot(slots: &mut [Option<ResponseOp>], index: usize) -> Result<ResponseOp, OpError> {
    slots
        .get_mut(index)
        .and_then(Option::take)
        .ok_or_else(|| OpError::UnexpectedResponse {
            expected: format!("response at position {index}"),
            actual: "nothing".into(),
        })
}

fn expect_txn(response: ResponseOp) -> Result<TxnResponse, OpError> {
    match response {
        ResponseOp::Txn(txn) => Ok(txn),
        other => Err(OpError::UnexpectedResponse {
            expected: "txn".into(),
            actual: other.kind_name().into(),
        }),
    }
}

/// Runs the typed processors of a sub-transaction.
pub(crate) trait FinishTxn: Send + Sync {
    /// Result of a nested transaction, boxed as one sub-result.
    fn finish_nested(&self, outcome: TxnOutcome) -> (SubResult, MultiError);
    /// Result of a merged transaction, its sub-results go to the parent.
    fn finish_merged(&self, outcome: TxnOutcome) -> (Vec<SubResult>, MultiError);
}

struct TypedFinish<R> {
    processors: Vec<TxnProcessor<R>>,
}

impl<R: Default> TypedFinish<R> {
    fn run(&self, outcome: TxnOutcome) -> TxnResult<R> {
        let mut result = OpResult::new(outcome.header);
        for err in outcome.errors {
            result.add_err(err);
        }
        let mut txn = TxnResult {
            result,
            succeeded: outcome.succeeded,
            raw: Some(outcome.raw),
            sub_results: outcome.sub_results,
        };
        for processor in &self.processors {
            processor(&mut txn);
        }
        txn
    }
}

impl<R: Default + Send + Sync + 'static> FinishTxn for TypedFinish<R> {
    fn finish_nested(&self, outcome: TxnOutcome) -> (SubResult, MultiError) {
        let result = self.run(outcome);
        let errors = result.errors().clone();
        (SubResult::new(result), errors)
    }

    fn finish_merged(&self, outcome: TxnOutcome) -> (Vec<SubResult>, MultiError) {
        let mut result = self.run(outcome);
        let errors = result.result.take_errors();
        (result.sub_results, errors)
    }
}
