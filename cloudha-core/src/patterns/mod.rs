//! Reusable control-flow combinators
//!
//! Every bounded loop in the failover engine goes through one of these:
//! [`retry`] for operations that may fail transiently, [`poll_until`] for
//! waiting on an external condition.

pub mod poll;
pub mod retry;

pub use poll::{poll_until, PollConfig, PollLimit, PollOutcome};
pub use retry::{retry, BackoffStrategy, RetryConfig};
