//! Request, response and error types of the MVCC key-value store contract.
//!
//! The store is etcd-shaped: every key carries a monotonically increasing
//! modification revision (`0` means absent), every response carries the
//! store-wide header revision, and a single `Txn` request evaluates a list of
//! compares and runs either its success or failure operations.
//!
//! This crate has no async or network dependencies; it only describes values.

mod compare;
mod error;
mod kv;
mod range;
mod request;
mod response;
pub mod validation;

pub use compare::CompareOp;
pub use compare::CompareTarget;
pub use compare::CompareValue;
pub use compare::TxnCompare;
pub use error::KeyValueStoreError;
pub use kv::KeyValue;
pub use kv::ResponseHeader;
pub use range::key_in_range;
pub use range::prefix_range_end;
pub use request::DeleteRequest;
pub use request::GetRequest;
pub use request::PutRequest;
pub use request::RequestOp;
pub use request::TxnRequest;
pub use response::DeleteResponse;
pub use response::GetResponse;
pub use response::OpResponse;
pub use response::PutResponse;
pub use response::ResponseOp;
pub use response::TxnResponse;
pub use validation::validate_request;
