//! In-memory collaborators and fixtures for tests

use crate::cloud::{
    CloudInventory, InstanceDescriptor, IpConfiguration, NicDescriptor, NicUpdate, PublicIpDescriptor,
    ResourceScope, RouteParams, RouteTableDescriptor,
};
use crate::device::{
    DeviceClient, GLOBAL_SETTINGS_PATH, SELF_IPS_PATH, TRAFFIC_GROUP_STATS_PATH, VIRTUAL_ADDRESSES_PATH,
};
use crate::error::{FailoverError, FailoverResult};
use crate::storage::Registry;
use crate::types::{InstanceMap, InstanceRecord, NicMutation};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryRegistry {
    namespaces: Mutex<BTreeMap<String, BTreeMap<String, Value>>>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    /// Writes still allowed before every `put` fails
    write_budget: Mutex<Option<usize>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later `put` fail
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every later `get` and `list` fail
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Allow `writes` more successful `put`s, then fail the rest
    pub fn fail_writes_after(&self, writes: usize) {
        *lock(&self.write_budget) = Some(writes);
    }

    fn check_read(&self, operation: &str) -> FailoverResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(FailoverError::storage(
                operation,
                std::io::Error::new(std::io::ErrorKind::Other, "registry unavailable"),
            ));
        }
        Ok(())
    }

    fn check_write(&self) -> FailoverResult<()> {
        let exhausted = match lock(&self.write_budget).as_mut() {
            Some(0) => true,
            Some(left) => {
                *left -= 1;
                false
            }
            None => false,
        };
        if exhausted || self.fail_writes.load(Ordering::SeqCst) {
            return Err(FailoverError::storage(
                "put",
                std::io::Error::new(std::io::ErrorKind::Other, "registry unavailable"),
            ));
        }
        Ok(())
    }

    pub fn keys(&self, namespace: &str) -> Vec<String> {
        lock(&self.namespaces)
            .get(namespace)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn list(&self, namespace: &str) -> FailoverResult<Vec<(String, Value)>> {
        self.check_read("list")?;
        Ok(lock(&self.namespaces)
            .get(namespace)
            .map(|ns| ns.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn get(&self, namespace: &str, key: &str) -> FailoverResult<Option<Value>> {
        self.check_read("get")?;
        Ok(lock(&self.namespaces)
            .get(namespace)
            .and_then(|ns| ns.get(key).cloned()))
    }

    async fn put(&self, namespace: &str, key: &str, value: &Value) -> FailoverResult<()> {
        self.check_write()?;
        lock(&self.namespaces)
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> FailoverResult<()> {
        if let Some(ns) = lock(&self.namespaces).get_mut(namespace) {
            ns.remove(key);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Cloud
// ---------------------------------------------------------------------------

/// One observed mutation, in the order the mock saw it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudCall {
    NicIssued { nic: String },
    NicCommitted { nic: String, addresses: Vec<String> },
    RouteCommitted { table: String, route: String, next_hop: String },
}

#[derive(Debug, Clone, Copy)]
struct Failure {
    /// `None` fails forever
    remaining: Option<u32>,
    transient: bool,
}

#[derive(Debug, Default)]
struct MockCloudState {
    instances: Vec<InstanceDescriptor>,
    external: Vec<InstanceDescriptor>,
    nics: Vec<NicDescriptor>,
    public_ips: Vec<PublicIpDescriptor>,
    route_tables: Vec<RouteTableDescriptor>,
    calls: Vec<CloudCall>,
    failures: HashMap<String, Failure>,
    attempts: HashMap<String, u32>,
}

/// Cloud inventory that records mutations and applies them to its own state
#[derive(Debug, Default)]
pub struct MockCloud {
    state: Mutex<MockCloudState>,
    list_calls: AtomicUsize,
}

impl MockCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instances(self, instances: Vec<InstanceDescriptor>) -> Self {
        lock(&self.state).instances = instances;
        self
    }

    pub fn with_external(self, external: Vec<InstanceDescriptor>) -> Self {
        lock(&self.state).external = external;
        self
    }

    pub fn with_nics(self, nics: Vec<NicDescriptor>) -> Self {
        lock(&self.state).nics = nics;
        self
    }

    pub fn with_public_ips(self, public_ips: Vec<PublicIpDescriptor>) -> Self {
        lock(&self.state).public_ips = public_ips;
        self
    }

    pub fn with_route_tables(self, tables: Vec<RouteTableDescriptor>) -> Self {
        lock(&self.state).route_tables = tables;
        self
    }

    /// Fail updates of the NIC or route named `target`
    ///
    /// Transient failures look like rate limiting; others are hard API errors.
    pub fn fail_updates(&self, target: &str, times: Option<u32>, transient: bool) {
        lock(&self.state).failures.insert(
            target.to_string(),
            Failure {
                remaining: times,
                transient,
            },
        );
    }

    pub fn calls(&self) -> Vec<CloudCall> {
        lock(&self.state).calls.clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.state).calls.clear();
    }

    pub fn attempts(&self, target: &str) -> u32 {
        lock(&self.state).attempts.get(target).copied().unwrap_or(0)
    }

    /// Number of listing calls of any kind
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn nic(&self, name: &str) -> Option<NicDescriptor> {
        lock(&self.state).nics.iter().find(|n| n.name == name).cloned()
    }

    fn check_failure(&self, operation: &str, target: &str) -> FailoverResult<()> {
        let mut state = lock(&self.state);
        *state.attempts.entry(target.to_string()).or_default() += 1;
        let Some(failure) = state.failures.get_mut(target) else {
            return Ok(());
        };
        match failure.remaining {
            Some(0) => return Ok(()),
            Some(ref mut n) => *n -= 1,
            None => {}
        }
        let status = if failure.transient { 429 } else { 409 };
        Err(FailoverError::from_cloud_status(
            operation,
            status,
            format!("injected failure for {}", target),
        ))
    }

    fn listed<T: Clone>(&self, pick: impl FnOnce(&MockCloudState) -> &Vec<T>) -> Vec<T> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        pick(&lock(&self.state)).clone()
    }
}

#[async_trait]
impl CloudInventory for MockCloud {
    async fn list_instances(&self, _scope: &ResourceScope) -> FailoverResult<Vec<InstanceDescriptor>> {
        Ok(self.listed(|s| &s.instances))
    }

    async fn list_instances_by_tag(&self, _key: &str, _value: &str) -> FailoverResult<Vec<InstanceDescriptor>> {
        Ok(self.listed(|s| &s.external))
    }

    async fn list_nics(&self, _scope: &ResourceScope) -> FailoverResult<Vec<NicDescriptor>> {
        Ok(self.listed(|s| &s.nics))
    }

    async fn list_public_ips(&self, _scope: &ResourceScope) -> FailoverResult<Vec<PublicIpDescriptor>> {
        Ok(self.listed(|s| &s.public_ips))
    }

    async fn list_route_tables(&self) -> FailoverResult<Vec<RouteTableDescriptor>> {
        Ok(self.listed(|s| &s.route_tables))
    }

    async fn update_nic(&self, _resource_group: &str, nic_name: &str, update: &NicUpdate) -> FailoverResult<()> {
        lock(&self.state).calls.push(CloudCall::NicIssued {
            nic: nic_name.to_string(),
        });
        // Let sibling updates interleave the way concurrent requests would
        tokio::task::yield_now().await;
        self.check_failure("update_nic", nic_name)?;

        let mut state = lock(&self.state);
        if let Some(nic) = state.nics.iter_mut().find(|n| n.name == nic_name) {
            nic.ip_configurations = update.ip_configurations.clone();
        }
        state.calls.push(CloudCall::NicCommitted {
            nic: nic_name.to_string(),
            addresses: update.ip_configurations.iter().map(|c| c.private_ip.clone()).collect(),
        });
        Ok(())
    }

    async fn update_route(
        &self,
        _resource_group: &str,
        route_table: &str,
        route_name: &str,
        params: &RouteParams,
    ) -> FailoverResult<()> {
        tokio::task::yield_now().await;
        self.check_failure("update_route", route_name)?;

        let mut state = lock(&self.state);
        if let Some(route) = state
            .route_tables
            .iter_mut()
            .filter(|t| t.name == route_table)
            .flat_map(|t| t.routes.iter_mut())
            .find(|r| r.name == route_name)
        {
            route.next_hop_type = params.next_hop_type.clone();
            route.next_hop_ip = Some(params.next_hop_ip_address.clone());
        }
        state.calls.push(CloudCall::RouteCommitted {
            table: route_table.to_string(),
            route: route_name.to_string(),
            next_hop: params.next_hop_ip_address.clone(),
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Device
// ---------------------------------------------------------------------------

/// Scripted device-side state for one host
#[derive(Debug, Clone, Default)]
pub struct DeviceFixture {
    pub hostname: String,
    pub active_groups: Vec<String>,
    /// `(name, address, floating, traffic group)`
    pub self_ips: Vec<(String, String, bool, String)>,
    /// `(address, traffic group)`
    pub virtual_addresses: Vec<(String, String)>,
}

impl DeviceFixture {
    pub fn new(hostname: &str) -> Self {
        Self {
            hostname: hostname.to_string(),
            ..Default::default()
        }
    }

    pub fn active(mut self, group: &str) -> Self {
        self.active_groups.push(group.to_string());
        self
    }

    pub fn self_ip(mut self, name: &str, address: &str) -> Self {
        self.self_ips.push((
            name.to_string(),
            address.to_string(),
            false,
            "/Common/traffic-group-local-only".to_string(),
        ));
        self
    }

    pub fn floating_ip(mut self, name: &str, address: &str, group: &str) -> Self {
        self.self_ips
            .push((name.to_string(), address.to_string(), true, group.to_string()));
        self
    }

    pub fn virtual_address(mut self, address: &str, group: &str) -> Self {
        self.virtual_addresses.push((address.to_string(), group.to_string()));
        self
    }

    fn responses(&self) -> Vec<(&'static str, Value)> {
        let stats: serde_json::Map<String, Value> = self
            .active_groups
            .iter()
            .enumerate()
            .map(|(i, group)| {
                (
                    format!("entry-{}", i),
                    json!({ "nestedStats": { "entries": {
                        "deviceName": { "description": format!("/Common/{}", self.hostname) },
                        "failoverState": { "description": "active" },
                        "trafficGroup": { "description": group },
                    }}}),
                )
            })
            .collect();
        let self_ips: Vec<Value> = self
            .self_ips
            .iter()
            .map(|(name, address, floating, group)| {
                json!({
                    "name": name,
                    "address": address,
                    "floating": if *floating { "enabled" } else { "disabled" },
                    "trafficGroup": group,
                })
            })
            .collect();
        let virtuals: Vec<Value> = self
            .virtual_addresses
            .iter()
            .map(|(address, group)| json!({ "address": address, "trafficGroup": group }))
            .collect();

        vec![
            (GLOBAL_SETTINGS_PATH, json!({ "hostname": self.hostname })),
            (TRAFFIC_GROUP_STATS_PATH, json!({ "entries": stats })),
            (SELF_IPS_PATH, json!({ "items": self_ips })),
            (VIRTUAL_ADDRESSES_PATH, json!({ "items": virtuals })),
        ]
    }
}

/// Device client answering from scripted per-host responses
#[derive(Debug, Default)]
pub struct MockDevice {
    responses: Mutex<HashMap<(String, String), Value>>,
    unreachable: Mutex<Vec<String>>,
    requests: AtomicUsize,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(self, host: &str, fixture: DeviceFixture) -> Self {
        {
            let mut responses = lock(&self.responses);
            for (path, value) in fixture.responses() {
                responses.insert((host.to_string(), path.to_string()), value);
            }
        }
        self
    }

    pub fn with_hostname(self, host: &str, hostname: &str) -> Self {
        lock(&self.responses).insert(
            (host.to_string(), GLOBAL_SETTINGS_PATH.to_string()),
            json!({ "hostname": hostname }),
        );
        self
    }

    pub fn unreachable(self, host: &str) -> Self {
        self.set_reachable(host, false);
        self
    }

    pub fn set_reachable(&self, host: &str, reachable: bool) {
        let mut unreachable = lock(&self.unreachable);
        unreachable.retain(|h| h != host);
        if !reachable {
            unreachable.push(host.to_string());
        }
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceClient for MockDevice {
    async fn list(&self, host: &str, path: &str) -> FailoverResult<Value> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if lock(&self.unreachable).iter().any(|h| h == host) {
            return Err(FailoverError::device(host, path, "connection refused"));
        }
        lock(&self.responses)
            .get(&(host.to_string(), path.to_string()))
            .cloned()
            .ok_or_else(|| FailoverError::device(host, path, "HTTP 404"))
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// An eligible, provider-visible instance record
pub fn instance(id: &str, ip: &str) -> InstanceRecord {
    InstanceRecord {
        instance_id: id.to_string(),
        private_ip: ip.to_string(),
        mgmt_ip: ip.to_string(),
        provider_visible: true,
        version_ok: true,
        ..Default::default()
    }
}

pub fn instance_map(records: Vec<InstanceRecord>) -> InstanceMap {
    records.into_iter().map(|r| (r.instance_id.clone(), r)).collect()
}

pub fn ip_config(name: &str, ip: &str, primary: bool) -> IpConfiguration {
    IpConfiguration {
        name: name.to_string(),
        private_ip: ip.to_string(),
        subnet_id: "/subscriptions/sub-test/resourceGroups/rg-test/providers/Microsoft.Network/virtualNetworks/vnet/subnets/ext"
            .to_string(),
        primary,
        public_ip_id: None,
    }
}

pub fn nic(name: &str, configs: Vec<IpConfiguration>) -> NicDescriptor {
    NicDescriptor {
        id: format!(
            "/subscriptions/sub-test/resourceGroups/rg-test/providers/Microsoft.Network/networkInterfaces/{}",
            name
        ),
        name: name.to_string(),
        resource_group: "rg-test".to_string(),
        location: "westus".to_string(),
        primary: true,
        ip_configurations: configs,
        ..Default::default()
    }
}

/// A running VM whose primary NIC is `nic`
pub fn vm(instance_id: &str, nic: &NicDescriptor) -> InstanceDescriptor {
    InstanceDescriptor {
        instance_id: instance_id.to_string(),
        name: format!("bigip-{}", instance_id),
        resource_group: "rg-test".to_string(),
        power_state: Some("PowerState/running".to_string()),
        provisioning_state: Some("Succeeded".to_string()),
        nic_ids: vec![nic.id.clone()],
        ..Default::default()
    }
}

/// A NIC mutation whose configurations carry `ips`, the first one primary
pub fn nic_mutation(nic_name: &str, ips: &[&str]) -> NicMutation {
    NicMutation {
        resource_group: "rg-test".to_string(),
        nic_name: nic_name.to_string(),
        update: NicUpdate {
            location: "westus".to_string(),
            ip_configurations: ips
                .iter()
                .enumerate()
                .map(|(i, ip)| ip_config(&format!("ipconfig{}", i), ip, i == 0))
                .collect(),
        },
    }
}
