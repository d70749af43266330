//! Error handling for cloud failover
//!
//! All fallible operations return [`FailoverResult`]. The taxonomy follows the
//! way a failover run reacts to a failure:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Fatal before any cloud call │  Election        │  Cloud      │
//! │  • ConfigurationError        │  • NoInstances   │  • Transient│
//! │  • InvalidResourceId         │  • NoEligible    │  • CloudApi │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Coordination                │  Infrastructure                │
//! │  • LockTimeout               │  • Storage / Database / Json   │
//! │  • Timeout                   │  • Device / Io / Internal      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Only rate-limit class cloud failures and timeouts are retried; see
//! [`FailoverError::is_transient`].

pub mod types;
pub mod constructors;
pub mod conversions;

pub use types::{format_errors, FailoverError, FailoverResult, Result};
