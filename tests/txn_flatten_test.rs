//! Merging sub-transactions into one physical transaction must give every
//! sub-transaction the result it would have produced on its own.

mod support;

use std::sync::Arc;

use kvop::op::ResultSlot;
use kvop::prelude::*;
use support::fast_options;

const SUB_TXNS: usize = 3;

fn sub_key(i: usize) -> String {
    format!("sub/{i}")
}

/// Create `sub/{i}` if the sub-transaction `i` should fail its `IF`.
fn prepare(failing: u32) -> Arc<DeterministicKvStore> {
    let store = DeterministicKvStore::new();
    for i in 0..SUB_TXNS {
        if failing & (1 << i) != 0 {
            store.apply(RequestOp::put(sub_key(i), format!("old{i}"))).unwrap();
        }
    }
    store
}

fn value_at(r: &TxnResult<String>, index: usize) -> Option<String> {
    r.sub_result::<Option<KeyValue>>(index)
        .and_then(|kv| kv.as_ref())
        .map(|kv| kv.value.clone())
}

fn sub_txn(i: usize, slot: ResultSlot<String>) -> TxnOp<String> {
    let key = Key::new(sub_key(i));
    TxnOp::new()
        .when(TxnCompare::mod_revision(sub_key(i), CompareOp::Equal, 0))
        .then(key.put(format!("new{i}")))
        .then(key.get())
        .or_else(key.get())
        .on_succeeded(|r| {
            let value = value_at(r, 1);
            r.set_value(format!("then:{value:?}"));
        })
        .on_failed(|r| {
            let value = value_at(r, 0);
            r.set_value(format!("else:{value:?}"));
        })
        .set_result_to(slot)
}

#[tokio::test]
async fn test_flatten_preserves_branches() {
    for failing in 0..(1u32 << SUB_TXNS) {
        let mut expected = Vec::new();
        for i in 0..SUB_TXNS {
            let store = prepare(failing);
            let slot = result_slot::<String>();
            let standalone = sub_txn(i, slot.clone()).execute(&store, &fast_options()).await;
            assert!(standalone.err().is_none());
            expected.push(slot.lock().clone());
        }

        let store = prepare(failing);
        let revision = store.revision();
        let slots: Vec<ResultSlot<String>> = (0..SUB_TXNS).map(|_| result_slot::<String>()).collect();
        let mut merged = TxnOp::<NoResult>::new();
        for (i, slot) in slots.iter().enumerate() {
            merged = merged.merge(sub_txn(i, slot.clone()));
        }
        let result = merged.execute(&store, &fast_options()).await;
        assert!(result.err().is_none(), "failing={failing:#b}: {:?}", result.err());

        if failing == 0 {
            assert!(result.succeeded());
            assert_eq!(result.sub_results().len(), 2 * SUB_TXNS);
            for (i, slot) in slots.iter().enumerate() {
                assert_eq!(*slot.lock(), expected[i], "failing={failing:#b}, sub={i}");
                assert_eq!(store.get_kv(&sub_key(i)).unwrap().value, format!("new{i}"));
            }
        } else {
            assert!(!result.succeeded());
            for (i, slot) in slots.iter().enumerate() {
                if failing & (1 << i) != 0 {
                    assert_eq!(*slot.lock(), expected[i], "failing={failing:#b}, sub={i}");
                    assert!(slot.lock().starts_with("else:"));
                } else {
                    // Both branches of this sub-transaction were skipped.
                    assert_eq!(*slot.lock(), "", "failing={failing:#b}, sub={i}");
                }
            }
            assert_eq!(store.revision(), revision);
        }
    }
}

#[tokio::test]
async fn test_then_txn_keeps_nested_result() {
    let store = prepare(0b010);
    let slots: Vec<ResultSlot<String>> = (0..2).map(|_| result_slot::<String>()).collect();
    let txn = TxnOp::<NoResult>::new()
        .then_txn(sub_txn(0, slots[0].clone()))
        .then_txn(sub_txn(1, slots[1].clone()));

    let result = txn.execute(&store, &fast_options()).await;
    assert!(result.succeeded());
    assert_eq!(result.sub_results().len(), 2);

    let first = result.sub_result::<TxnResult<String>>(0).unwrap();
    assert!(first.succeeded());
    assert_eq!(first.value(), r#"then:Some("new0")"#);

    let second = result.sub_result::<TxnResult<String>>(1).unwrap();
    assert!(!second.succeeded());
    assert_eq!(*slots[1].lock(), r#"else:Some("old1")"#);
}

#[tokio::test]
async fn test_sibling_errors_are_aggregated() {
    let store = DeterministicKvStore::new();
    let txn = TxnOp::<NoResult>::new()
        .then(Key::new("a").get_or_err())
        .then(Key::new("b").get_or_err())
        .then(Prefix::new("c/").count().with_result_validator(|count| {
            if *count == 0 {
                Err(OpError::custom("prefix c/ is empty"))
            } else {
                Ok(())
            }
        }));

    let result = txn.execute(&store, &fast_options()).await;
    assert!(result.succeeded());
    assert_eq!(result.errors().len(), 3);
    assert_eq!(
        result.err().map(|e| e.to_string()).unwrap_or_default(),
        "- key \"a\" not found\n- key \"b\" not found\n- prefix c/ is empty"
    );
}
