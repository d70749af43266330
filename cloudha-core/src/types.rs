//! Data model shared by the election and reconciliation engines

use crate::cloud::{NicUpdate, RouteParams};
use crate::ip::compare_ipv4;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Duration;

/// Registry namespace holding one record per instance
pub const INSTANCES_NAMESPACE: &str = "instances";
/// Registry namespace holding the failover run record
pub const FAILOVER_NAMESPACE: &str = "failover";
/// Key of the singleton failover run record
pub const FAILOVER_STATE_KEY: &str = "failover_state";

/// Instances keyed by instance id
///
/// Ordered so that every traversal is deterministic.
pub type InstanceMap = BTreeMap<String, InstanceRecord>;

/// Sentinel for "never completed a configuration sync"
pub fn never() -> DateTime<Utc> {
    DateTime::<Utc>::default()
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InstanceStatus {
    #[default]
    Ok,
    Other(String),
}

impl From<String> for InstanceStatus {
    fn from(value: String) -> Self {
        if value == "OK" {
            InstanceStatus::Ok
        } else {
            InstanceStatus::Other(value)
        }
    }
}

impl From<InstanceStatus> for String {
    fn from(value: InstanceStatus) -> Self {
        match value {
            InstanceStatus::Ok => "OK".to_string(),
            InstanceStatus::Other(s) => s,
        }
    }
}

/// One cluster member as seen by the cloud inventory and the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstanceRecord {
    pub instance_id: String,
    pub private_ip: String,
    pub mgmt_ip: String,
    pub public_ip: Option<String>,
    pub hostname: Option<String>,
    pub is_primary: bool,
    pub provider_visible: bool,
    pub version_ok: bool,
    pub external: bool,
    pub last_backup: DateTime<Utc>,
    pub status: InstanceStatus,
    /// Free-form status metadata written by the instance itself
    pub primary_status: Option<serde_json::Value>,
    pub last_update: Option<DateTime<Utc>>,
}

impl Default for InstanceRecord {
    fn default() -> Self {
        Self {
            instance_id: String::new(),
            private_ip: String::new(),
            mgmt_ip: String::new(),
            public_ip: None,
            hostname: None,
            is_primary: false,
            provider_visible: false,
            version_ok: false,
            external: false,
            last_backup: never(),
            status: InstanceStatus::Ok,
            primary_status: None,
            last_update: None,
        }
    }
}

impl InstanceRecord {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            ..Default::default()
        }
    }

    /// Minimum gate for being considered in an election
    pub fn is_eligible(&self) -> bool {
        self.version_ok && self.provider_visible
    }

    /// Whether this instance has ever completed a configuration sync
    pub fn has_running_config(&self) -> bool {
        self.last_backup != never()
    }

    /// Age of the record, measured from its latest write or backup
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        let reference = match self.last_update {
            Some(updated) if updated > self.last_backup => updated,
            _ => self.last_backup,
        };
        (now - reference).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_expired(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        self.age(now) >= stale_after
    }
}

/// Compare instance ids numerically when both are integers, lexically otherwise
pub fn compare_instance_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Order by private IP, then instance id, so ties never depend on map order
pub fn compare_by_private_ip(a: &InstanceRecord, b: &InstanceRecord) -> Ordering {
    compare_ipv4(&a.private_ip, &b.private_ip)
        .then_with(|| compare_instance_ids(&a.instance_id, &b.instance_id))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    #[default]
    Succeeded,
    Failed,
    Running,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Succeeded => "SUCCEEDED",
            RunStatus::Failed => "FAILED",
            RunStatus::Running => "RUNNING",
        };
        f.write_str(s)
    }
}

/// Persisted outcome of the most recent failover run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FailoverRunRecord {
    pub status: RunStatus,
    pub time_stamp: DateTime<Utc>,
    /// NIC mutations computed by the last run, written before they are applied
    pub desired_configuration: Option<NetworkMutationPlan>,
}

impl Default for FailoverRunRecord {
    fn default() -> Self {
        Self {
            status: RunStatus::Succeeded,
            time_stamp: never(),
            desired_configuration: None,
        }
    }
}

impl FailoverRunRecord {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.time_stamp).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_unsettled(&self) -> bool {
        matches!(self.status, RunStatus::Running | RunStatus::Failed)
    }
}

/// New IP-configuration set for one NIC
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NicMutation {
    pub resource_group: String,
    pub nic_name: String,
    pub update: NicUpdate,
}

/// NIC mutations for one run; every disassociation lands before any association
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkMutationPlan {
    pub disassociate: Vec<NicMutation>,
    pub associate: Vec<NicMutation>,
}

impl NetworkMutationPlan {
    pub fn is_empty(&self) -> bool {
        self.disassociate.is_empty() && self.associate.is_empty()
    }
}

/// A route whose next hop must be repointed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteUpdate {
    pub resource_group: String,
    pub route_table: String,
    pub route_name: String,
    pub params: RouteParams,
}

/// Address summary of a node behind a resource id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDescriptor {
    pub id: String,
    pub private_ip: Option<String>,
    pub public_ip: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeResourceType {
    ScaleSet,
    ResourceGroup,
}

impl std::str::FromStr for NodeResourceType {
    type Err = crate::error::FailoverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scale-set" | "scaleSet" | "vmss" => Ok(NodeResourceType::ScaleSet),
            "resource-group" | "resourceGroup" => Ok(NodeResourceType::ResourceGroup),
            other => Err(crate::error::FailoverError::configuration(
                "resource_type",
                format!("unknown resource type '{}'", other),
            )),
        }
    }
}
