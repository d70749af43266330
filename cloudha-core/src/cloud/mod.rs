//! Cloud inventory collaborator
//!
//! The failover engine only needs a narrow view of the cloud: listings of
//! instances, NICs, public IPs and route tables, plus two mutations. The
//! descriptors here are already-parsed; vendor wire formats stay inside the
//! adapters.

use crate::error::FailoverResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod arm;

pub use arm::ArmCloudInventory;

/// Next hop type for routes pointed at an appliance
pub const NEXT_HOP_VIRTUAL_APPLIANCE: &str = "VirtualAppliance";

/// Where the managed instances live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceScope {
    pub resource_group: String,
    pub scale_set: Option<String>,
}

impl ResourceScope {
    pub fn new(resource_group: impl Into<String>, scale_set: Option<String>) -> Self {
        Self {
            resource_group: resource_group.into(),
            scale_set,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceDescriptor {
    /// Machine id within the group
    pub instance_id: String,
    /// Stable unique id assigned by the provider
    pub vm_id: Option<String>,
    pub name: String,
    pub resource_group: String,
    pub power_state: Option<String>,
    pub provisioning_state: Option<String>,
    /// Ids of the NICs attached to this instance, primary first
    pub nic_ids: Vec<String>,
    /// Pre-resolved addresses, used when NIC listings do not cover the instance
    pub private_ip: Option<String>,
    pub public_ip: Option<String>,
    pub tags: BTreeMap<String, String>,
}

impl InstanceDescriptor {
    pub fn is_deallocated(&self) -> bool {
        let deallocating = |state: &Option<String>| {
            state
                .as_deref()
                .map(|s| s.to_ascii_lowercase().contains("deallocat"))
                .unwrap_or(false)
        };
        deallocating(&self.power_state) || deallocating(&self.provisioning_state)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpConfiguration {
    pub name: String,
    pub private_ip: String,
    pub subnet_id: String,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub public_ip_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NicDescriptor {
    pub id: String,
    pub name: String,
    pub resource_group: String,
    pub location: String,
    pub virtual_machine_id: Option<String>,
    pub primary: bool,
    pub provisioning_state: Option<String>,
    pub ip_configurations: Vec<IpConfiguration>,
    pub tags: BTreeMap<String, String>,
}

impl NicDescriptor {
    pub fn has_address(&self, address: &str) -> bool {
        self.ip_configurations.iter().any(|c| c.private_ip == address)
    }

    pub fn primary_configuration(&self) -> Option<&IpConfiguration> {
        self.ip_configurations
            .iter()
            .find(|c| c.primary)
            .or_else(|| self.ip_configurations.first())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublicIpDescriptor {
    pub id: String,
    pub name: String,
    pub resource_group: String,
    pub ip_address: Option<String>,
    /// IP configuration this address is bound to, if any
    pub ip_configuration_id: Option<String>,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteDescriptor {
    pub name: String,
    pub address_prefix: String,
    pub next_hop_type: String,
    pub next_hop_ip: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteTableDescriptor {
    pub id: String,
    pub name: String,
    pub resource_group: String,
    pub tags: BTreeMap<String, String>,
    pub routes: Vec<RouteDescriptor>,
}

/// Replacement IP-configuration set for a NIC
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NicUpdate {
    pub location: String,
    pub ip_configurations: Vec<IpConfiguration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteParams {
    pub address_prefix: String,
    pub next_hop_type: String,
    pub next_hop_ip_address: String,
}

#[async_trait]
pub trait CloudInventory: Send + Sync {
    async fn list_instances(&self, scope: &ResourceScope) -> FailoverResult<Vec<InstanceDescriptor>>;

    /// Instances outside the managed group, found by tag
    async fn list_instances_by_tag(
        &self,
        key: &str,
        value: &str,
    ) -> FailoverResult<Vec<InstanceDescriptor>>;

    async fn list_nics(&self, scope: &ResourceScope) -> FailoverResult<Vec<NicDescriptor>>;

    async fn list_public_ips(&self, scope: &ResourceScope) -> FailoverResult<Vec<PublicIpDescriptor>>;

    async fn list_route_tables(&self) -> FailoverResult<Vec<RouteTableDescriptor>>;

    async fn update_nic(
        &self,
        resource_group: &str,
        nic_name: &str,
        update: &NicUpdate,
    ) -> FailoverResult<()>;

    async fn update_route(
        &self,
        resource_group: &str,
        route_table: &str,
        route_name: &str,
        params: &RouteParams,
    ) -> FailoverResult<()>;
}
