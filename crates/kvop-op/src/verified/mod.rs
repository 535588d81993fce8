//! Pure functions behind the atomic operation loop.
//!
//! All functions are deterministic: no I/O, randomness and time are passed
//! in as explicit parameters. The imperative shell in [`crate::atomic`] and
//! [`crate::retry`] owns the clock, the random source and the store.
//!
//! # Module Organization
//!
//! - [`backoff`]: Randomized exponential backoff steps
//! - [`conditions`]: Conflict conditions synthesized from tracked reads

pub mod backoff;
pub mod conditions;

pub use backoff::BackoffStep;
pub use backoff::compute_backoff_step;
pub use conditions::Expectation;
pub use conditions::classify;
pub use conditions::collapse_covered;
pub use conditions::observed_revision;
pub use conditions::write_conditions;
