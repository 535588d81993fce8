//! Conflict conditions synthesized from tracked read-phase operations.
//!
//! Every tracked operation becomes an expectation about the store state at
//! write time:
//!
//! - a get or put that saw at least one key expects the key/range to still
//!   exist, unchanged since the first read revision (a put: since its own
//!   revision)
//! - a delete, or a get that saw nothing, expects the key/range to still be
//!   absent
//!
//! The expectations are written as `mod_revision` compares for the `IF`
//! part of the write transaction. Any concurrent modification of what the
//! read phase observed makes the write transaction fail.

use kvop_core::CompareOp;
use kvop_core::TxnCompare;

use crate::error::OpError;
use crate::tracker::TrackedOp;
use crate::tracker::TrackedOpKind;

/// What the write phase expects about one tracked key or range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    /// The key/range exists and was not modified after the read.
    MustExist,
    /// The key/range does not exist.
    MustNotExist,
}

/// Classify one tracked operation.
///
/// A negative count cannot come from a well-behaved store and is reported
/// as a usage error instead of being ignored.
pub fn classify(op: &TrackedOp) -> Result<Expectation, OpError> {
    match (op.kind, op.count) {
        (_, count) if count < 0 => Err(OpError::usage(format!(
            "unexpected {:?} of \"{}\" with negative count {count}",
            op.kind, op.key
        ))),
        (TrackedOpKind::Delete, _) => Ok(Expectation::MustNotExist),
        (TrackedOpKind::Get | TrackedOpKind::Put, 0) => Ok(Expectation::MustNotExist),
        (TrackedOpKind::Get | TrackedOpKind::Put, _) => Ok(Expectation::MustExist),
    }
}

/// Drop operations fully covered by a wider operation of the same kind.
///
/// `ops` must be sorted as returned by
/// [`TrackerKv::operations`](crate::tracker::TrackerKv::operations), so a
/// covering range always precedes the ranges it covers. Operations on the
/// identical key/range are all kept.
pub fn collapse_covered(ops: &[TrackedOp]) -> Vec<&TrackedOp> {
    let mut kept: Vec<&TrackedOp> = Vec::with_capacity(ops.len());
    for op in ops {
        let covered = kept.iter().any(|wide| {
            wide.kind == op.kind && !(wide.key == op.key && wide.range_end == op.range_end) && wide.covers(op)
        });
        if !covered {
            kept.push(op);
        }
    }
    kept
}

/// Newest mod revision the key/range may carry at write time.
///
/// Reads are checked against the first read revision. A put made by the
/// read phase itself, possibly at a later read level, gave the key the
/// revision of its own response.
pub fn observed_revision(op: &TrackedOp, read_revision: i64) -> i64 {
    match op.kind {
        TrackedOpKind::Put => op.revision.max(read_revision),
        TrackedOpKind::Get | TrackedOpKind::Delete => read_revision,
    }
}

/// Build the `IF` conditions of the write transaction.
///
/// `read_revision` is the header revision of the first read. With
/// `check_prefix_keys`, every key returned by a range read must also still
/// exist, which detects deletion of one key inside an observed prefix.
pub fn write_conditions(
    ops: &[TrackedOp],
    read_revision: i64,
    check_prefix_keys: bool,
) -> Result<Vec<TxnCompare>, OpError> {
    let mut conditions = Vec::new();
    for op in collapse_covered(ops) {
        match classify(op)? {
            Expectation::MustExist => {
                let observed = observed_revision(op, read_revision);
                conditions.push(
                    TxnCompare::mod_revision(op.key.clone(), CompareOp::Greater, 0).with_range_end(op.range_end.clone()),
                );
                conditions.push(
                    TxnCompare::mod_revision(op.key.clone(), CompareOp::Less, observed.saturating_add(1))
                        .with_range_end(op.range_end.clone()),
                );
                if check_prefix_keys && op.is_range() {
                    for kv in &op.kvs {
                        conditions.push(TxnCompare::mod_revision(kv.key.clone(), CompareOp::Greater, 0));
                    }
                }
            }
            Expectation::MustNotExist => {
                conditions.push(
                    TxnCompare::mod_revision(op.key.clone(), CompareOp::Equal, 0).with_range_end(op.range_end.clone()),
                );
            }
        }
    }
    Ok(conditions)
}
