//! Atomic read/write operations with optimistic concurrency.
//!
//! An [`AtomicOp`] runs a read phase and a write phase:
//!
//! 1. Read factories run level by level through a [`TrackerKv`]. A factory
//!    may schedule further reads on its [`ReadScope`], they form the next
//!    level. The first read revision is remembered.
//! 2. Write factories build the write transaction. Its `IF` part holds the
//!    conditions synthesized from the tracked reads plus one ownership
//!    compare per required lock.
//! 3. If the `IF` part failed without any error, another writer changed the
//!    data in between. The whole cycle restarts with fresh reads after a
//!    backoff, until the retry budget is exhausted.
//!
//! Processors run after the write transaction committed, or when it
//! produced a logical error. They never run after a transport or build
//! error.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use kvop_constants::atomic::MAX_READ_LEVELS;
use kvop_core::KvClient;
use kvop_core::ResponseHeader;
use kvop_core::TxnCompare;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::error::MultiError;
use crate::error::OpError;
use crate::lock::DistributedMutex;
use crate::op::Op;
use crate::result::NoResult;
use crate::result::ResultSlot;
use crate::result::result_slot;
use crate::retry::Backoff;
use crate::retry::ExecuteOptions;
use crate::retry::sleep_or_cancel;
use crate::tracker::TrackerKv;
use crate::txn::TxnOp;
use crate::verified::write_conditions;

/// Factory of one read-phase operation, `None` if there is nothing to read.
pub type ReadFactory = Arc<dyn Fn(&mut ReadScope) -> Result<Option<Box<dyn Op>>, OpError> + Send + Sync>;

/// Factory of one write-phase operation, `None` if there is nothing to write.
pub type WriteFactory = Arc<dyn Fn() -> Result<Option<Box<dyn Op>>, OpError> + Send + Sync>;

/// Callback run on the result of an atomic operation.
pub type AtomicProcessor<R> = Arc<dyn Fn(&mut AtomicResult<R>) + Send + Sync>;

type MetaProcessor = Arc<dyn Fn(&mut AtomicMeta) + Send + Sync>;
type Reset = Arc<dyn Fn() + Send + Sync>;

/// Handle passed to read factories.
///
/// Reads registered on the scope run at the next read level, after every
/// read of the current level completed. The scope lives only while its
/// level's factories run.
pub struct ReadScope {
    level: u32,
    next: Vec<ReadFactory>,
}

impl ReadScope {
    fn new(level: u32) -> Self {
        Self {
            level,
            next: Vec::new(),
        }
    }

    /// Current read level, `0` for the reads registered on the operation.
    pub fn level(&self) -> u32 {
        self.level
    }

    /// Schedule a raw read factory for the next level.
    pub fn read_factory<F>(&mut self, factory: F) -> &mut Self
    where
        F: Fn(&mut ReadScope) -> Result<Option<Box<dyn Op>>, OpError> + Send + Sync + 'static,
    {
        self.next.push(Arc::new(factory));
        self
    }

    pub fn read<F, O>(&mut self, factory: F) -> &mut Self
    where
        F: Fn(&mut ReadScope) -> O + Send + Sync + 'static,
        O: Op + 'static,
    {
        self.read_factory(move |scope| Ok(Some(Box::new(factory(scope)) as Box<dyn Op>)))
    }

    pub fn read_op<O: Op + 'static>(&mut self, op: O) -> &mut Self {
        let op: Arc<dyn Op> = Arc::new(op);
        self.read_factory(move |_| Ok(Some(Box::new(op.clone()) as Box<dyn Op>)))
    }

    pub fn read_or_err<F, O>(&mut self, factory: F) -> &mut Self
    where
        F: Fn(&mut ReadScope) -> Result<O, OpError> + Send + Sync + 'static,
        O: Op + 'static,
    {
        self.read_factory(move |scope| Ok(Some(Box::new(factory(scope)?) as Box<dyn Op>)))
    }

    pub fn on_read<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut ReadScope) + Send + Sync + 'static,
    {
        self.read_factory(move |scope| {
            f(scope);
            Ok(None)
        })
    }

    pub fn on_read_or_err<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut ReadScope) -> Result<(), OpError> + Send + Sync + 'static,
    {
        self.read_factory(move |scope| f(scope).map(|()| None))
    }
}

/// Untyped parts of an atomic operation, shared by [`AtomicOp::add_from`].
#[derive(Clone)]
pub struct AtomicOpCore {
    client: Arc<dyn KvClient>,
    check_prefix_keys: bool,
    locks: Vec<Arc<dyn DistributedMutex>>,
    read_phase: Vec<ReadFactory>,
    write_phase: Vec<WriteFactory>,
    /// Processors of merged operations.
    processors: Vec<MetaProcessor>,
    /// Reset result slots of merged operations before each attempt.
    resets: Vec<Reset>,
}

impl AtomicOpCore {
    fn new(client: Arc<dyn KvClient>) -> Self {
        Self {
            client,
            check_prefix_keys: true,
            locks: Vec::new(),
            read_phase: Vec::new(),
            write_phase: Vec::new(),
            processors: Vec::new(),
            resets: Vec::new(),
        }
    }

    /// Returns true if there is nothing to read, write or lock.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty() && self.read_phase.is_empty() && self.write_phase.is_empty()
    }

    pub fn read_phase_len(&self) -> usize {
        self.read_phase.len()
    }

    pub fn write_phase_len(&self) -> usize {
        self.write_phase.len()
    }

    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    pub fn check_prefix_keys(&self) -> bool {
        self.check_prefix_keys
    }

    /// Ownership compares of the required locks.
    ///
    /// Fails with [`OpError::NotLocked`] if a lock is not held locally.
    fn lock_conditions(&self, phase: &str) -> Result<Vec<TxnCompare>, OpError> {
        let mut conditions = Vec::with_capacity(self.locks.len());
        for lock in &self.locks {
            match lock.is_owner() {
                Some(condition) if lock.is_locked() => conditions.push(condition),
                _ => {
                    debug!(phase, lock = ?lock.owned_key(), "required lock is not locked");
                    return Err(OpError::NotLocked { phase: phase.into() });
                }
            }
        }
        Ok(conditions)
    }

    /// Sub-transaction asserting lock ownership, `None` without locks.
    fn lock_guard(&self, phase: &'static str) -> Result<Option<TxnOp<NoResult>>, OpError> {
        let conditions = self.lock_conditions(phase)?;
        if conditions.is_empty() {
            return Ok(None);
        }
        Ok(Some(TxnOp::new().when_all(conditions).on_failed(move |r| {
            debug!(phase, "required lock is locked by another session");
            r.add_err(OpError::Locked { phase: phase.into() });
        })))
    }
}

/// Metadata of an atomic operation result, shared by merged processors.
#[derive(Debug, Default)]
struct AtomicMeta {
    header: Option<ResponseHeader>,
    succeeded: bool,
    attempts: u32,
    elapsed: Duration,
    max_ops_in_txn: usize,
    errors: MultiError,
}

/// Result of [`AtomicOp::execute`].
pub struct AtomicResult<R> {
    meta: AtomicMeta,
    value: R,
}

impl<R> AtomicResult<R> {
    pub fn value(&self) -> &R {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut R {
        &mut self.value
    }

    pub fn set_value(&mut self, value: R) {
        self.value = value;
    }

    /// Header of the write transaction response.
    pub fn header(&self) -> Option<&ResponseHeader> {
        self.meta.header.as_ref()
    }

    /// True if the write transaction committed.
    pub fn succeeded(&self) -> bool {
        self.meta.succeeded
    }

    /// Number of read/write attempts.
    pub fn attempts(&self) -> u32 {
        self.meta.attempts
    }

    /// Time spent in all attempts.
    pub fn elapsed(&self) -> Duration {
        self.meta.elapsed
    }

    /// Largest compare, then or else list of the submitted write transactions.
    pub fn max_ops_in_txn(&self) -> usize {
        self.meta.max_ops_in_txn
    }

    pub fn add_err(&mut self, error: OpError) {
        self.meta.errors.push(error);
    }

    pub fn errors(&self) -> &MultiError {
        &self.meta.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.meta.errors.is_empty()
    }

    /// The collected errors as one error, `None` if there are none.
    pub fn err(&self) -> Option<OpError> {
        self.meta.errors.clone().into_error()
    }

    /// The value, or the collected errors.
    pub fn into_result(self) -> Result<R, OpError> {
        match self.meta.errors.into_error() {
            Some(err) => Err(err),
            None => Ok(self.value),
        }
    }
}

impl<R: fmt::Debug> fmt::Debug for AtomicResult<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicResult")
            .field("value", &self.value)
            .field("succeeded", &self.meta.succeeded)
            .field("attempts", &self.meta.attempts)
            .field("elapsed", &self.meta.elapsed)
            .field("max_ops_in_txn", &self.meta.max_ops_in_txn)
            .field("errors", &self.meta.errors)
            .finish()
    }
}

/// Outcome of one read/write attempt.
enum Attempt {
    /// The write transaction committed or reported a logical error.
    Done { header: ResponseHeader, succeeded: bool, errors: MultiError },
    /// The write transaction lost the race.
    Conflict,
}

/// Read phase followed by one conditional write transaction.
///
/// ```
/// use kvop_core::DeterministicKvStore;
/// use kvop_op::AtomicOp;
/// use kvop_op::ExecuteOptions;
/// use kvop_op::Key;
///
/// # tokio_test_block(async {
/// let store = DeterministicKvStore::new();
/// let counter = Key::new("counter");
/// let current = kvop_op::result_slot::<Option<kvop_core::KeyValue>>();
///
/// let op = AtomicOp::<()>::new(store.clone())
///     .read_op(counter.get().with_result_to(current.clone()))
///     .write(move || {
///         let next = match current.lock().as_ref() {
///             Some(kv) => kv.value.parse::<u64>().unwrap_or(0) + 1,
///             None => 1,
///         };
///         Key::new("counter").put(next.to_string())
///     });
///
/// assert!(op.execute(&ExecuteOptions::default()).await.succeeded());
/// assert!(op.execute(&ExecuteOptions::default()).await.succeeded());
/// assert_eq!(store.get_kv("counter").unwrap().value, "2");
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
/// # }
/// ```
pub struct AtomicOp<R = NoResult> {
    core: AtomicOpCore,
    result: ResultSlot<R>,
    processors: Vec<AtomicProcessor<R>>,
}

impl<R: Default + Send + Sync + 'static> AtomicOp<R> {
    pub fn new(client: Arc<dyn KvClient>) -> Self {
        Self {
            core: AtomicOpCore::new(client),
            result: result_slot(),
            processors: Vec::new(),
        }
    }

    pub fn core(&self) -> &AtomicOpCore {
        &self.core
    }

    /// Slot holding the value of the current attempt.
    ///
    /// Factories and operation processors may write into it. It is reset to
    /// `R::default()` before each attempt.
    pub fn result_slot(&self) -> ResultSlot<R> {
        self.result.clone()
    }

    /// Do not check that each key returned by a range read still exists.
    ///
    /// Modification of a key in an observed range is always detected. The
    /// per-key check additionally detects deletion of a key from the range,
    /// at the cost of one compare per returned key.
    pub fn skip_prefix_keys_check(mut self) -> Self {
        self.core.check_prefix_keys = false;
        self
    }

    /// Commit only while `lock` is owned by this process.
    pub fn require_lock<M: DistributedMutex + 'static>(mut self, lock: M) -> Self {
        self.core.locks.push(Arc::new(lock));
        self
    }

    /// Merge reads, writes, locks and processors of another atomic operation.
    ///
    /// Processors of `other` run before the processors of this operation.
    pub fn add_from<R2: Default + Send + Sync + 'static>(mut self, other: &AtomicOp<R2>) -> Self {
        self.core.locks.extend(other.core.locks.iter().cloned());
        self.core.read_phase.extend(other.core.read_phase.iter().cloned());
        self.core.write_phase.extend(other.core.write_phase.iter().cloned());
        self.core.resets.extend(other.core.resets.iter().cloned());

        let slot = other.result.clone();
        let reset_slot = slot.clone();
        self.core.resets.push(Arc::new(move || *reset_slot.lock() = R2::default()));

        let nested = other.core.processors.clone();
        let processors = other.processors.clone();
        self.core.processors.push(Arc::new(move |meta: &mut AtomicMeta| {
            for processor in &nested {
                processor(meta);
            }
            let mut result = AtomicResult {
                meta: std::mem::take(meta),
                value: std::mem::take(&mut *slot.lock()),
            };
            for processor in &processors {
                processor(&mut result);
            }
            *meta = result.meta;
            *slot.lock() = result.value;
        }));
        self
    }

    /// Add a raw read factory.
    pub fn read_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&mut ReadScope) -> Result<Option<Box<dyn Op>>, OpError> + Send + Sync + 'static,
    {
        self.core.read_phase.push(Arc::new(factory));
        self
    }

    pub fn read<F, O>(self, factory: F) -> Self
    where
        F: Fn(&mut ReadScope) -> O + Send + Sync + 'static,
        O: Op + 'static,
    {
        self.read_factory(move |scope| Ok(Some(Box::new(factory(scope)) as Box<dyn Op>)))
    }

    pub fn read_op<O: Op + 'static>(self, op: O) -> Self {
        let op: Arc<dyn Op> = Arc::new(op);
        self.read_factory(move |_| Ok(Some(Box::new(op.clone()) as Box<dyn Op>)))
    }

    pub fn read_or_err<F, O>(self, factory: F) -> Self
    where
        F: Fn(&mut ReadScope) -> Result<O, OpError> + Send + Sync + 'static,
        O: Op + 'static,
    {
        self.read_factory(move |scope| Ok(Some(Box::new(factory(scope)?) as Box<dyn Op>)))
    }

    pub fn on_read<F>(self, f: F) -> Self
    where
        F: Fn(&mut ReadScope) + Send + Sync + 'static,
    {
        self.read_factory(move |scope| {
            f(scope);
            Ok(None)
        })
    }

    pub fn on_read_or_err<F>(self, f: F) -> Self
    where
        F: Fn(&mut ReadScope) -> Result<(), OpError> + Send + Sync + 'static,
    {
        self.read_factory(move |scope| f(scope).map(|()| None))
    }

    /// Add a raw write factory.
    pub fn write_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Result<Option<Box<dyn Op>>, OpError> + Send + Sync + 'static,
    {
        self.core.write_phase.push(Arc::new(factory));
        self
    }

    pub fn write<F, O>(self, factory: F) -> Self
    where
        F: Fn() -> O + Send + Sync + 'static,
        O: Op + 'static,
    {
        self.write_factory(move || Ok(Some(Box::new(factory()) as Box<dyn Op>)))
    }

    pub fn write_op<O: Op + 'static>(self, op: O) -> Self {
        let op: Arc<dyn Op> = Arc::new(op);
        self.write_factory(move || Ok(Some(Box::new(op.clone()) as Box<dyn Op>)))
    }

    pub fn write_or_err<F, O>(self, factory: F) -> Self
    where
        F: Fn() -> Result<O, OpError> + Send + Sync + 'static,
        O: Op + 'static,
    {
        self.write_factory(move || Ok(Some(Box::new(factory()?) as Box<dyn Op>)))
    }

    pub fn on_write<F>(self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.write_factory(move || {
            f();
            Ok(None)
        })
    }

    pub fn on_write_or_err<F>(self, f: F) -> Self
    where
        F: Fn() -> Result<(), OpError> + Send + Sync + 'static,
    {
        self.write_factory(move || f().map(|()| None))
    }

    /// Append a processor run on the final result.
    pub fn add_processor<P>(mut self, processor: P) -> Self
    where
        P: Fn(&mut AtomicResult<R>) + Send + Sync + 'static,
    {
        self.processors.push(Arc::new(processor));
        self
    }

    pub fn on_result<F>(self, f: F) -> Self
    where
        F: Fn(&AtomicResult<R>) + Send + Sync + 'static,
    {
        self.add_processor(move |result| f(result))
    }

    /// Execute, retrying with fresh reads after lost races.
    pub async fn execute(&self, options: &ExecuteOptions) -> AtomicResult<R> {
        self.run(options, true).await
    }

    /// Execute one read/write attempt.
    ///
    /// A lost race is reported as `succeeded() == false` without an error.
    pub async fn execute_without_retry(&self, options: &ExecuteOptions) -> AtomicResult<R> {
        self.run(options, false).await
    }

    /// Execute and return the value or the collected errors.
    pub async fn execute_or_err(&self, options: &ExecuteOptions) -> Result<R, OpError> {
        self.execute(options).await.into_result()
    }

    async fn run(&self, options: &ExecuteOptions, retry: bool) -> AtomicResult<R> {
        let mut backoff = Backoff::new(options.retry);
        let mut max_ops_in_txn = 0;
        loop {
            debug!(attempt = backoff.attempts(), "atomic operation attempt");
            let outcome = self.attempt(options, &mut max_ops_in_txn).await;
            let mut meta = AtomicMeta {
                attempts: backoff.attempts(),
                elapsed: backoff.elapsed(),
                max_ops_in_txn,
                ..AtomicMeta::default()
            };
            match outcome {
                Ok(Attempt::Done {
                    header,
                    succeeded,
                    errors,
                }) => {
                    meta.header = Some(header);
                    meta.succeeded = succeeded;
                    meta.errors = errors;
                    return self.finish(meta);
                }
                Ok(Attempt::Conflict) if !retry => return self.result(meta),
                Ok(Attempt::Conflict) => match backoff.next_delay() {
                    Some(delay) => {
                        debug!(
                            attempt = meta.attempts,
                            backoff_ms = delay.as_millis() as u64,
                            "write transaction lost the race, retrying"
                        );
                        if let Err(err) = sleep_or_cancel(delay, &options.cancel).await {
                            meta.errors.push(err);
                            return self.result(meta);
                        }
                    }
                    None => {
                        warn!(
                            attempts = meta.attempts,
                            elapsed_ms = meta.elapsed.as_millis() as u64,
                            "atomic operation retry budget exhausted"
                        );
                        meta.errors.push(OpError::RevisionChanged {
                            attempt: meta.attempts,
                            elapsed: meta.elapsed,
                        });
                        return self.result(meta);
                    }
                },
                Err(err) => {
                    meta.errors.push(err);
                    return self.result(meta);
                }
            }
        }
    }

    /// Result without running processors.
    fn result(&self, meta: AtomicMeta) -> AtomicResult<R> {
        AtomicResult {
            meta,
            value: std::mem::take(&mut *self.result.lock()),
        }
    }

    /// Result after merged and own processors ran.
    fn finish(&self, mut meta: AtomicMeta) -> AtomicResult<R> {
        for processor in &self.core.processors {
            processor(&mut meta);
        }
        let mut result = self.result(meta);
        for processor in &self.processors {
            processor(&mut result);
        }
        result
    }

    fn reset(&self) {
        *self.result.lock() = R::default();
        for reset in &self.core.resets {
            reset();
        }
    }

    async fn attempt(&self, options: &ExecuteOptions, max_ops_in_txn: &mut usize) -> Result<Attempt, OpError> {
        self.reset();
        let tracker = TrackerKv::new(self.core.client.clone());
        let read_revision = self.read_phase(&tracker, options).await?;

        let operations = tracker.operations();
        let conditions = write_conditions(&operations, read_revision, self.core.check_prefix_keys)?;
        trace!(
            tracked = operations.len(),
            conditions = conditions.len(),
            read_revision,
            "synthesized write conditions"
        );

        let mut txn = TxnOp::<NoResult>::new().when_all(conditions);
        for factory in &self.core.write_phase {
            if let Some(op) = factory()? {
                txn = txn.merge(op);
            }
        }
        if let Some(guard) = self.core.lock_guard("write phase")? {
            txn = txn.merge(guard);
        }

        let compiled = txn.compile_typed()?;
        *max_ops_in_txn = (*max_ops_in_txn).max(compiled.request().max_list_len());
        let mut result = compiled.execute(self.core.client.as_ref(), options).await?;

        let errors = result.take_errors();
        if !result.succeeded() && errors.is_empty() {
            return Ok(Attempt::Conflict);
        }
        let header = result.header().copied().unwrap_or_default();
        Ok(Attempt::Done {
            header,
            succeeded: result.succeeded(),
            errors,
        })
    }

    /// Run all read levels, return the first read revision.
    async fn read_phase(&self, tracker: &TrackerKv, options: &ExecuteOptions) -> Result<i64, OpError> {
        let mut factories = self.core.read_phase.clone();
        let mut read_revision = None;
        let mut level = 0;
        loop {
            let lock_guard = if level == 0 {
                self.core.lock_guard("read phase")?
            } else {
                None
            };
            if factories.is_empty() && lock_guard.is_none() {
                break;
            }
            if level >= MAX_READ_LEVELS {
                return Err(OpError::ReadLevelExceeded { max: MAX_READ_LEVELS });
            }

            let mut scope = ReadScope::new(level);
            let mut txn = TxnOp::<NoResult>::new();
            for factory in &factories {
                if let Some(op) = factory(&mut scope)? {
                    txn = txn.merge(op);
                }
            }
            if let Some(guard) = lock_guard {
                txn = txn.merge(guard);
            }

            if !txn.is_empty() {
                let result = txn.execute(tracker, options).await;
                if let Some(err) = result.err() {
                    return Err(err);
                }
                if let Some(header) = result.header() {
                    read_revision.get_or_insert(header.revision);
                }
            }
            trace!(level, tracked = tracker.len(), "read level completed");

            factories = scope.next;
            level += 1;
        }
        Ok(read_revision.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use kvop_core::DeterministicKvStore;
    use kvop_core::KeyValue;
    use kvop_core::RequestOp;

    use super::*;
    use crate::key::Key;
    use crate::key::Prefix;
    use crate::retry::RetryConfig;

    fn fast_options() -> ExecuteOptions {
        ExecuteOptions::default().with_retry(RetryConfig {
            initial_interval_ms: 1,
            max_interval_ms: 2,
            max_elapsed_ms: 5_000,
        })
    }

    #[tokio::test]
    async fn empty_operation_succeeds() {
        let store = DeterministicKvStore::new();
        let result = AtomicOp::<NoResult>::new(store.clone()).execute(&fast_options()).await;
        assert!(result.succeeded());
        assert_eq!(result.attempts(), 1);
        assert!(result.err().is_none());
        assert_eq!(store.revision(), 0);
    }

    #[tokio::test]
    async fn nested_read_levels() {
        let store = DeterministicKvStore::new();
        store.apply(RequestOp::put("pointer", "target/1")).unwrap();
        store.apply(RequestOp::put("target/1", "payload")).unwrap();

        let pointer = result_slot::<Option<KeyValue>>();
        let target = result_slot::<Option<KeyValue>>();
        let levels = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let op = AtomicOp::<NoResult>::new(store.clone())
            .read({
                let pointer = pointer.clone();
                let target = target.clone();
                let levels = levels.clone();
                move |scope| {
                    levels.lock().push(scope.level());
                    let found = pointer.clone();
                    let target = target.clone();
                    let levels = levels.clone();
                    scope.read(move |scope| {
                        levels.lock().push(scope.level());
                        let key = found.lock().as_ref().map(|kv| kv.value.clone()).unwrap_or_default();
                        Key::new(key).get().with_result_to(target.clone())
                    });
                    Key::new("pointer").get().with_result_to(pointer.clone())
                }
            })
            .write({
                let target = target.clone();
                move || {
                    let value = target.lock().as_ref().map(|kv| kv.value.clone()).unwrap_or_default();
                    Key::new("copy").put(value)
                }
            });

        let result = op.execute(&fast_options()).await;
        assert!(result.succeeded(), "{:?}", result.err());
        assert_eq!(*levels.lock(), vec![0, 1]);
        assert_eq!(store.get_kv("copy").unwrap().value, "payload");
    }

    #[tokio::test]
    async fn put_at_nested_read_level_commits() {
        let store = DeterministicKvStore::new();
        store.apply(RequestOp::put("a", "1")).unwrap();

        let op = AtomicOp::<NoResult>::new(store.clone())
            .read(|scope| {
                scope.read(|_| Key::new("marker").put("x"));
                Key::new("a").get()
            })
            .write_op(Key::new("b").put("1"));

        let result = op.execute(&fast_options()).await;
        assert!(result.succeeded(), "{:?}", result.err());
        assert_eq!(result.attempts(), 1);
        assert_eq!(store.get_kv("marker").unwrap().value, "x");
        assert_eq!(store.get_kv("b").unwrap().value, "1");

        // A concurrent write to the marker after the read phase is still a conflict.
        let interfered = Arc::new(AtomicUsize::new(0));
        let op = AtomicOp::<NoResult>::new(store.clone())
            .read(|scope| {
                scope.read(|_| Key::new("marker").put("y"));
                Key::new("a").get()
            })
            .on_write({
                let store = store.clone();
                let interfered = interfered.clone();
                move || {
                    if interfered.fetch_add(1, Ordering::SeqCst) == 0 {
                        store.apply(RequestOp::put("marker", "z")).unwrap();
                    }
                }
            })
            .write_op(Key::new("b").put("2"));
        let result = op.execute_without_retry(&fast_options()).await;
        assert!(!result.succeeded());
        assert!(result.err().is_none());
        assert_eq!(store.get_kv("b").unwrap().value, "1");
    }

    #[tokio::test]
    async fn read_level_limit() {
        fn recurse(scope: &mut ReadScope) {
            scope.on_read(recurse);
        }
        let store = DeterministicKvStore::new();
        let result = AtomicOp::<NoResult>::new(store.clone()).on_read(recurse).execute(&fast_options()).await;
        assert_eq!(result.err(), Some(OpError::ReadLevelExceeded { max: MAX_READ_LEVELS }));
        assert!(!result.succeeded());
    }

    #[tokio::test]
    async fn factory_error_aborts_without_processors() {
        let store = DeterministicKvStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let op = AtomicOp::<NoResult>::new(store.clone())
            .on_read_or_err(|_| Err(OpError::custom("read failed")))
            .write_op(Key::new("k").put("v"))
            .on_result({
                let calls = calls.clone();
                move |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                }
            });

        let result = op.execute(&fast_options()).await;
        assert_eq!(result.err(), Some(OpError::custom("read failed")));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(store.get_kv("k").is_none());
    }

    #[tokio::test]
    async fn write_logical_error_runs_processors_without_retry() {
        let store = DeterministicKvStore::new();
        store.apply(RequestOp::put("k", "v")).unwrap();
        let op = AtomicOp::<String>::new(store.clone())
            .write_op(Key::new("k").put_if_not_exists("x").on_failed(|r| {
                r.add_err(OpError::AlreadyExists { key: "k".into() });
            }))
            .add_processor(|r| r.set_value("processed".into()));

        let result = op.execute(&fast_options()).await;
        assert_eq!(result.attempts(), 1);
        assert_eq!(result.value(), "processed");
        assert_eq!(result.err(), Some(OpError::AlreadyExists { key: "k".into() }));
    }

    #[tokio::test]
    async fn add_from_runs_merged_processors_first() {
        let store = DeterministicKvStore::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let inner = AtomicOp::<i64>::new(store.clone())
            .read_op(Prefix::new("p/").count().with_result_to(Default::default()))
            .write_op(Key::new("p/a").put("1"))
            .add_processor({
                let order = order.clone();
                move |r| {
                    r.set_value(7);
                    order.lock().push("inner");
                }
            });
        let inner_slot = inner.result_slot();

        let outer = AtomicOp::<NoResult>::new(store.clone())
            .write_op(Key::new("p/b").put("2"))
            .add_from(&inner)
            .add_processor({
                let order = order.clone();
                move |_| order.lock().push("outer")
            });
        assert_eq!(outer.core().write_phase_len(), 2);

        let result = outer.execute(&fast_options()).await;
        assert!(result.succeeded());
        assert_eq!(*order.lock(), vec!["inner", "outer"]);
        assert_eq!(*inner_slot.lock(), 7);
        assert!(store.get_kv("p/a").is_some());
        assert!(store.get_kv("p/b").is_some());
        assert!(result.max_ops_in_txn() >= 2);
    }
}
