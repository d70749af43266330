//! Primary election and cloud network reconciliation for BIG-IP HA clusters
//!
//! The crate discovers cluster members, elects one primary, and points cloud
//! routes and NIC IP configurations at the device that owns the active
//! traffic groups. [`failover::FailoverStateMachine`] drives a run end to
//! end; [`provider::CloudProvider`] is the surface the HA framework calls.

pub mod error;
pub mod types;
pub mod config;
pub mod observability;
pub mod clock;
pub mod patterns;
pub mod ip;
pub mod resource_id;
pub mod storage;
pub mod cloud;
pub mod device;
pub mod license;
pub mod context;
pub mod topology;
pub mod election;
pub mod validation;
pub mod reconcile;
pub mod lock;
pub mod run_status;
pub mod failover;
pub mod provider;

// Test helpers are exposed for integration tests
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use context::ProviderContext;
pub use error::{FailoverError, FailoverResult};
pub use failover::{run_failover, FailoverPhase, FailoverReport, FailoverStateMachine};
pub use provider::{CloudProvider, ManagedCloudProvider};
pub use topology::TopologyOptions;
pub use types::{InstanceMap, InstanceRecord};
