//! Required-lock behavior of atomic operations.

mod support;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use kvop::prelude::*;
use support::fast_options;

async fn locked_mutex(store: &Arc<DeterministicKvStore>, key: &str) -> Arc<KvMutex> {
    let mutex = Arc::new(KvMutex::new(store.clone(), key, "node-1"));
    assert!(mutex.try_lock(&fast_options()).await.unwrap());
    mutex
}

#[tokio::test]
async fn test_write_commits_while_lock_is_owned() {
    let store = DeterministicKvStore::new();
    let mutex = locked_mutex(&store, "locks/job").await;

    let op = AtomicOp::<NoResult>::new(store.clone())
        .require_lock(mutex.clone())
        .read_op(Key::new("job/state").get())
        .write_op(Key::new("job/state").put("running"));
    let result = op.execute(&fast_options()).await;
    assert!(result.succeeded(), "{:?}", result.err());
    assert_eq!(store.get_kv("job/state").unwrap().value, "running");
    assert!(mutex.unlock(&fast_options()).await.unwrap());
}

#[tokio::test]
async fn test_lock_not_held_locally_fails_immediately() {
    let store = DeterministicKvStore::new();
    let mutex = Arc::new(KvMutex::new(store.clone(), "locks/job", "node-1"));

    let op = AtomicOp::<NoResult>::new(store.clone())
        .require_lock(mutex)
        .write_op(Key::new("job/state").put("running"));
    let result = op.execute(&fast_options()).await;
    match result.err() {
        Some(OpError::NotLocked { phase }) => assert_eq!(phase, "read phase"),
        other => panic!("expected NotLocked, got {other:?}"),
    }
    assert_eq!(result.attempts(), 1);
    assert_eq!(store.revision(), 0);
}

#[tokio::test]
async fn test_lock_lost_before_write_is_not_success() {
    let store = DeterministicKvStore::new();
    let mutex = locked_mutex(&store, "locks/job").await;
    let released = Arc::new(AtomicBool::new(false));

    let op = AtomicOp::<NoResult>::new(store.clone())
        .require_lock(mutex.clone())
        .read_op(Key::new("job/state").get())
        .on_write({
            let store = store.clone();
            let released = released.clone();
            move || {
                // Another process releases the lock between read and write.
                if !released.swap(true, Ordering::SeqCst) {
                    store.apply(RequestOp::delete("locks/job")).unwrap();
                }
            }
        })
        .write_op(Key::new("job/state").put("running"));

    let result = op.execute(&fast_options()).await;
    assert!(!result.succeeded());
    assert_eq!(result.attempts(), 1);
    match result.err() {
        Some(err @ OpError::Locked { .. }) => {
            assert!(err.is_lock_error());
            assert_eq!(err.to_string(), "write phase: lock is locked by another session");
        }
        other => panic!("expected Locked, got {other:?}"),
    }
    assert!(store.get_kv("job/state").is_none());
}

#[tokio::test]
async fn test_lock_taken_over_before_read() {
    let store = DeterministicKvStore::new();
    let mutex = locked_mutex(&store, "locks/job").await;
    store.apply(RequestOp::delete("locks/job")).unwrap();
    store.apply(RequestOp::put("locks/job", "node-2")).unwrap();

    let op = AtomicOp::<NoResult>::new(store.clone())
        .require_lock(mutex)
        .read_op(Key::new("job/state").get())
        .write_op(Key::new("job/state").put("running"));
    let result = op.execute(&fast_options()).await;
    assert_eq!(result.err(), Some(OpError::Locked { phase: "read phase".into() }));
    assert!(store.get_kv("job/state").is_none());
}
