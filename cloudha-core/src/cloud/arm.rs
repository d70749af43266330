//! Azure Resource Manager adapter for [`CloudInventory`]
//!
//! Thin REST mapping only. Credentials arrive as an opaque bearer token.

use super::{
    CloudInventory, InstanceDescriptor, IpConfiguration, NicDescriptor, NicUpdate,
    PublicIpDescriptor, ResourceScope, RouteDescriptor, RouteParams, RouteTableDescriptor,
};
use crate::config::CloudConfig;
use crate::error::{FailoverError, FailoverResult};
use crate::resource_id::ResourceId;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, trace};

const COMPUTE_API_VERSION: &str = "2023-03-01";
const NETWORK_API_VERSION: &str = "2023-04-01";
const SCALE_SET_NETWORK_API_VERSION: &str = "2018-10-01";
const RESOURCES_API_VERSION: &str = "2021-04-01";

pub struct ArmCloudInventory {
    client: reqwest::Client,
    endpoint: String,
    subscription_id: String,
    token: String,
}

#[derive(Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(rename = "nextLink")]
    next_link: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct SubResource {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArmVm {
    name: String,
    #[serde(default)]
    instance_id: Option<String>,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    #[serde(default)]
    properties: ArmVmProperties,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct ArmVmProperties {
    vm_id: Option<String>,
    provisioning_state: Option<String>,
    instance_view: Option<ArmInstanceView>,
    network_profile: Option<ArmNetworkProfile>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ArmInstanceView {
    statuses: Vec<ArmStatus>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ArmStatus {
    code: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct ArmNetworkProfile {
    network_interfaces: Vec<SubResource>,
}

#[derive(Deserialize)]
struct ArmNic {
    id: String,
    name: String,
    #[serde(default)]
    location: String,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    #[serde(default)]
    properties: ArmNicProperties,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct ArmNicProperties {
    primary: Option<bool>,
    provisioning_state: Option<String>,
    virtual_machine: Option<SubResource>,
    ip_configurations: Vec<ArmIpConfiguration>,
}

#[derive(Deserialize, Serialize)]
struct ArmIpConfiguration {
    name: String,
    properties: ArmIpConfigurationProperties,
}

#[derive(Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct ArmIpConfigurationProperties {
    #[serde(rename = "privateIPAddress")]
    private_ip_address: String,
    #[serde(rename = "privateIPAllocationMethod", skip_serializing_if = "Option::is_none")]
    private_ip_allocation_method: Option<String>,
    subnet: Option<ArmId>,
    primary: Option<bool>,
    #[serde(rename = "publicIPAddress", skip_serializing_if = "Option::is_none")]
    public_ip_address: Option<ArmId>,
}

#[derive(Deserialize, Serialize, Default)]
struct ArmId {
    #[serde(default)]
    id: String,
}

#[derive(Deserialize)]
struct ArmPublicIp {
    id: String,
    name: String,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    #[serde(default)]
    properties: ArmPublicIpProperties,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct ArmPublicIpProperties {
    ip_address: Option<String>,
    ip_configuration: Option<SubResource>,
}

#[derive(Deserialize)]
struct ArmRouteTable {
    id: String,
    name: String,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    #[serde(default)]
    properties: ArmRouteTableProperties,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ArmRouteTableProperties {
    routes: Vec<ArmRoute>,
}

#[derive(Deserialize)]
struct ArmRoute {
    name: String,
    #[serde(default)]
    properties: ArmRouteProperties,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct ArmRouteProperties {
    address_prefix: String,
    next_hop_type: String,
    next_hop_ip_address: Option<String>,
}

#[derive(Deserialize)]
struct ArmGenericResource {
    id: String,
    #[serde(rename = "type", default)]
    resource_type: String,
}

impl ArmCloudInventory {
    pub fn new(config: &CloudConfig) -> FailoverResult<Self> {
        let token = config.access_token.clone().ok_or_else(|| {
            FailoverError::configuration("cloud.access_token", "a management API token is required")
        })?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| FailoverError::configuration("cloud", format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.management_endpoint.trim_end_matches('/').to_string(),
            subscription_id: config.subscription_id.clone(),
            token,
        })
    }

    fn group_url(&self, resource_group: &str, provider_path: &str, api_version: &str) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/{}?api-version={}",
            self.endpoint, self.subscription_id, resource_group, provider_path, api_version
        )
    }

    async fn send(&self, operation: &str, request: reqwest::RequestBuilder) -> FailoverResult<reqwest::Response> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| transport_error(operation, e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(FailoverError::from_cloud_status(operation, status.as_u16(), body))
    }

    async fn get_json<T: DeserializeOwned>(&self, operation: &str, url: &str) -> FailoverResult<T> {
        trace!(url, "GET");
        let response = self.send(operation, self.client.get(url)).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| FailoverError::CloudApi {
                operation: operation.to_string(),
                status: None,
                message: format!("invalid response body: {}", e),
            })
    }

    /// Follow `nextLink` pages until exhausted
    async fn get_all<T: DeserializeOwned>(&self, operation: &str, url: String) -> FailoverResult<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(url);
        while let Some(url) = next {
            let page: ListResponse<T> = self.get_json(operation, &url).await?;
            items.extend(page.value);
            next = page.next_link;
        }
        Ok(items)
    }

    async fn put_json<B: Serialize + ?Sized>(&self, operation: &str, url: &str, body: &B) -> FailoverResult<()> {
        trace!(url, "PUT");
        self.send(operation, self.client.put(url).json(body)).await?;
        Ok(())
    }
}

fn transport_error(operation: &str, err: reqwest::Error) -> FailoverError {
    if err.is_timeout() {
        FailoverError::Timeout {
            operation: operation.to_string(),
            duration: std::time::Duration::ZERO,
        }
    } else {
        FailoverError::CloudApi {
            operation: operation.to_string(),
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

fn convert_vm(vm: ArmVm, resource_group: &str) -> InstanceDescriptor {
    let props = vm.properties;
    let power_state = props.instance_view.as_ref().and_then(|view| {
        view.statuses
            .iter()
            .find(|s| s.code.starts_with("PowerState/"))
            .map(|s| s.code.clone())
    });
    let nic_ids = props
        .network_profile
        .map(|p| p.network_interfaces.into_iter().map(|n| n.id).collect())
        .unwrap_or_default();

    InstanceDescriptor {
        instance_id: vm.instance_id.unwrap_or_else(|| vm.name.clone()),
        vm_id: props.vm_id,
        name: vm.name,
        resource_group: resource_group.to_string(),
        power_state,
        provisioning_state: props.provisioning_state,
        nic_ids,
        private_ip: None,
        public_ip: None,
        tags: vm.tags,
    }
}

fn convert_nic(nic: ArmNic) -> NicDescriptor {
    let resource_group = ResourceId::parse(&nic.id)
        .map(|id| id.resource_group)
        .unwrap_or_default();
    let ip_configurations = nic
        .properties
        .ip_configurations
        .into_iter()
        .map(|c| IpConfiguration {
            name: c.name,
            private_ip: c.properties.private_ip_address,
            subnet_id: c.properties.subnet.map(|s| s.id).unwrap_or_default(),
            primary: c.properties.primary.unwrap_or(false),
            public_ip_id: c.properties.public_ip_address.map(|p| p.id),
        })
        .collect();

    NicDescriptor {
        id: nic.id,
        name: nic.name,
        resource_group,
        location: nic.location,
        virtual_machine_id: nic.properties.virtual_machine.map(|v| v.id),
        primary: nic.properties.primary.unwrap_or(false),
        provisioning_state: nic.properties.provisioning_state,
        ip_configurations,
        tags: nic.tags,
    }
}

fn convert_public_ip(ip: ArmPublicIp) -> PublicIpDescriptor {
    let resource_group = ResourceId::parse(&ip.id)
        .map(|id| id.resource_group)
        .unwrap_or_default();
    PublicIpDescriptor {
        id: ip.id,
        name: ip.name,
        resource_group,
        ip_address: ip.properties.ip_address,
        ip_configuration_id: ip.properties.ip_configuration.map(|c| c.id),
        tags: ip.tags,
    }
}

#[async_trait]
impl CloudInventory for ArmCloudInventory {
    async fn list_instances(&self, scope: &ResourceScope) -> FailoverResult<Vec<InstanceDescriptor>> {
        let url = match &scope.scale_set {
            Some(scale_set) => format!(
                "{}&$expand=instanceView",
                self.group_url(
                    &scope.resource_group,
                    &format!("Microsoft.Compute/virtualMachineScaleSets/{}/virtualMachines", scale_set),
                    COMPUTE_API_VERSION,
                )
            ),
            None => self.group_url(
                &scope.resource_group,
                "Microsoft.Compute/virtualMachines",
                COMPUTE_API_VERSION,
            ),
        };
        let vms: Vec<ArmVm> = self.get_all("list_instances", url).await?;
        debug!(count = vms.len(), "listed instances");
        Ok(vms
            .into_iter()
            .map(|vm| convert_vm(vm, &scope.resource_group))
            .collect())
    }

    async fn list_instances_by_tag(
        &self,
        key: &str,
        value: &str,
    ) -> FailoverResult<Vec<InstanceDescriptor>> {
        let url = format!(
            "{}/subscriptions/{}/resources?$filter=tagName eq '{}' and tagValue eq '{}'&api-version={}",
            self.endpoint, self.subscription_id, key, value, RESOURCES_API_VERSION
        );
        let resources: Vec<ArmGenericResource> = self.get_all("list_tagged_resources", url).await?;

        let mut instances = Vec::new();
        for resource in resources
            .iter()
            .filter(|r| r.resource_type.eq_ignore_ascii_case("Microsoft.Network/networkInterfaces"))
        {
            let nic_url = format!("{}{}?api-version={}", self.endpoint, resource.id, NETWORK_API_VERSION);
            let nic = convert_nic(self.get_json::<ArmNic>("get_tagged_nic", &nic_url).await?);

            let Some(config) = nic.primary_configuration().cloned() else {
                continue;
            };
            let public_ip = match &config.public_ip_id {
                Some(id) => {
                    let ip_url = format!("{}{}?api-version={}", self.endpoint, id, NETWORK_API_VERSION);
                    self.get_json::<ArmPublicIp>("get_tagged_public_ip", &ip_url)
                        .await?
                        .properties
                        .ip_address
                }
                None => None,
            };
            let instance_id = nic
                .virtual_machine_id
                .as_deref()
                .and_then(|id| ResourceId::parse(id).ok())
                .and_then(|id| id.leaf_name().map(String::from))
                .unwrap_or_else(|| nic.name.clone());

            instances.push(InstanceDescriptor {
                instance_id,
                vm_id: None,
                name: nic.name.clone(),
                resource_group: nic.resource_group.clone(),
                power_state: None,
                provisioning_state: nic.provisioning_state.clone(),
                nic_ids: vec![nic.id.clone()],
                private_ip: Some(config.private_ip),
                public_ip,
                tags: nic.tags.clone(),
            });
        }
        Ok(instances)
    }

    async fn list_nics(&self, scope: &ResourceScope) -> FailoverResult<Vec<NicDescriptor>> {
        let url = match &scope.scale_set {
            Some(scale_set) => self.group_url(
                &scope.resource_group,
                &format!("Microsoft.Compute/virtualMachineScaleSets/{}/networkInterfaces", scale_set),
                SCALE_SET_NETWORK_API_VERSION,
            ),
            None => self.group_url(
                &scope.resource_group,
                "Microsoft.Network/networkInterfaces",
                NETWORK_API_VERSION,
            ),
        };
        let nics: Vec<ArmNic> = self.get_all("list_nics", url).await?;
        Ok(nics.into_iter().map(convert_nic).collect())
    }

    async fn list_public_ips(&self, scope: &ResourceScope) -> FailoverResult<Vec<PublicIpDescriptor>> {
        let url = match &scope.scale_set {
            Some(scale_set) => self.group_url(
                &scope.resource_group,
                &format!("Microsoft.Compute/virtualMachineScaleSets/{}/publicIPAddresses", scale_set),
                SCALE_SET_NETWORK_API_VERSION,
            ),
            None => self.group_url(
                &scope.resource_group,
                "Microsoft.Network/publicIPAddresses",
                NETWORK_API_VERSION,
            ),
        };
        let ips: Vec<ArmPublicIp> = self.get_all("list_public_ips", url).await?;
        Ok(ips.into_iter().map(convert_public_ip).collect())
    }

    async fn list_route_tables(&self) -> FailoverResult<Vec<RouteTableDescriptor>> {
        let url = format!(
            "{}/subscriptions/{}/providers/Microsoft.Network/routeTables?api-version={}",
            self.endpoint, self.subscription_id, NETWORK_API_VERSION
        );
        let tables: Vec<ArmRouteTable> = self.get_all("list_route_tables", url).await?;
        Ok(tables
            .into_iter()
            .map(|table| {
                let resource_group = ResourceId::parse(&table.id)
                    .map(|id| id.resource_group)
                    .unwrap_or_default();
                RouteTableDescriptor {
                    id: table.id,
                    name: table.name,
                    resource_group,
                    tags: table.tags,
                    routes: table
                        .properties
                        .routes
                        .into_iter()
                        .map(|r| RouteDescriptor {
                            name: r.name,
                            address_prefix: r.properties.address_prefix,
                            next_hop_type: r.properties.next_hop_type,
                            next_hop_ip: r.properties.next_hop_ip_address,
                        })
                        .collect(),
                }
            })
            .collect())
    }

    async fn update_nic(
        &self,
        resource_group: &str,
        nic_name: &str,
        update: &NicUpdate,
    ) -> FailoverResult<()> {
        let url = self.group_url(
            resource_group,
            &format!("Microsoft.Network/networkInterfaces/{}", nic_name),
            NETWORK_API_VERSION,
        );
        let ip_configurations: Vec<ArmIpConfiguration> = update
            .ip_configurations
            .iter()
            .map(|c| ArmIpConfiguration {
                name: c.name.clone(),
                properties: ArmIpConfigurationProperties {
                    private_ip_address: c.private_ip.clone(),
                    private_ip_allocation_method: Some("Static".to_string()),
                    subnet: Some(ArmId { id: c.subnet_id.clone() }),
                    primary: Some(c.primary),
                    public_ip_address: c.public_ip_id.clone().map(|id| ArmId { id }),
                },
            })
            .collect();
        let body = serde_json::json!({
            "location": update.location,
            "properties": { "ipConfigurations": ip_configurations },
        });
        self.put_json("update_nic", &url, &body).await
    }

    async fn update_route(
        &self,
        resource_group: &str,
        route_table: &str,
        route_name: &str,
        params: &RouteParams,
    ) -> FailoverResult<()> {
        let url = self.group_url(
            resource_group,
            &format!("Microsoft.Network/routeTables/{}/routes/{}", route_table, route_name),
            NETWORK_API_VERSION,
        );
        let body = serde_json::json!({
            "properties": {
                "addressPrefix": params.address_prefix,
                "nextHopType": params.next_hop_type,
                "nextHopIpAddress": params.next_hop_ip_address,
            }
        });
        self.put_json("update_route", &url, &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_scale_set_vm() {
        let vm: ArmVm = serde_json::from_value(serde_json::json!({
            "name": "ss_1",
            "instanceId": "1",
            "properties": {
                "vmId": "0c9b2e5b-1c4e-4e59-8d3a-3b1e0e4e9a01",
                "provisioningState": "Succeeded",
                "instanceView": { "statuses": [
                    { "code": "ProvisioningState/succeeded" },
                    { "code": "PowerState/deallocated" }
                ]},
                "networkProfile": { "networkInterfaces": [ { "id": "/nic/1" } ] }
            }
        }))
        .unwrap();

        let instance = convert_vm(vm, "rg1");
        assert_eq!(instance.instance_id, "1");
        assert_eq!(instance.power_state.as_deref(), Some("PowerState/deallocated"));
        assert!(instance.is_deallocated());
        assert_eq!(instance.nic_ids, vec!["/nic/1".to_string()]);
    }

    #[test]
    fn test_convert_nic() {
        let nic: ArmNic = serde_json::from_value(serde_json::json!({
            "id": "/subscriptions/s/resourceGroups/rg1/providers/Microsoft.Network/networkInterfaces/bigip-ext0",
            "name": "bigip-ext0",
            "location": "westus",
            "properties": {
                "ipConfigurations": [{
                    "name": "primary",
                    "properties": {
                        "privateIPAddress": "10.0.1.4",
                        "subnet": { "id": "/subnet/ext" },
                        "primary": true,
                        "publicIPAddress": { "id": "/pip/1" }
                    }
                }]
            }
        }))
        .unwrap();

        let nic = convert_nic(nic);
        assert_eq!(nic.resource_group, "rg1");
        assert_eq!(nic.ip_configurations[0].private_ip, "10.0.1.4");
        assert_eq!(nic.ip_configurations[0].public_ip_id.as_deref(), Some("/pip/1"));
        assert!(nic.ip_configurations[0].primary);
    }
}
