//! Topology snapshot builder
//!
//! Merges the live cloud inventory with the durable registry into a single
//! [`InstanceMap`]. Registry-only entries survive only when they are an
//! unexpired primary, so a brief inventory gap does not unseat the current
//! primary. Everything else the cloud no longer reports is queued as stale.

use crate::clock::Clock;
use crate::cloud::{InstanceDescriptor, NicDescriptor, PublicIpDescriptor};
use crate::device::{fetch_hostname, DeviceClient};
use crate::error::FailoverError;
use crate::patterns::retry::{retry, RetryConfig};
use crate::types::{compare_instance_ids, InstanceMap, InstanceRecord};
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Already-fetched cloud listings
#[derive(Debug, Clone, Default)]
pub struct CloudSnapshot {
    pub instances: Vec<InstanceDescriptor>,
    pub nics: Vec<NicDescriptor>,
    pub public_ips: Vec<PublicIpDescriptor>,
    /// Instances found through the external tag search
    pub external: Vec<InstanceDescriptor>,
}

#[derive(Debug, Clone, Default)]
pub struct TopologyOptions {
    /// `(key, value)` tag selecting instances outside the managed group
    pub external_tag: Option<(String, String)>,
    /// Revoke licenses of purged instances
    pub license_pool: bool,
    /// Delete stale registry entries after building
    pub purge_stale: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub instances: InstanceMap,
    /// Registry entries the cloud no longer reports, queued for deletion
    pub stale: Vec<InstanceRecord>,
}

pub struct TopologyBuilder<'a> {
    device: &'a dyn DeviceClient,
    clock: &'a dyn Clock,
    primary_stale_after: Duration,
    hostname_policy: RetryConfig,
    hostname_timeout: Duration,
}

impl<'a> TopologyBuilder<'a> {
    pub fn new(device: &'a dyn DeviceClient, clock: &'a dyn Clock, primary_stale_after: Duration) -> Self {
        Self {
            device,
            clock,
            primary_stale_after,
            hostname_policy: RetryConfig::for_device_reads(2, Duration::from_millis(500))
                .with_operation_name("hostname_backfill"),
            hostname_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_hostname_policy(mut self, policy: RetryConfig, timeout: Duration) -> Self {
        self.hostname_policy = policy;
        self.hostname_timeout = timeout;
        self
    }

    pub async fn build(
        &self,
        cloud: &CloudSnapshot,
        registry: &InstanceMap,
        options: &TopologyOptions,
    ) -> Topology {
        let index = AddressIndex::new(&cloud.nics, &cloud.public_ips);

        let mut instances = InstanceMap::new();
        for descriptor in &cloud.instances {
            let record = merge_descriptor(descriptor, registry.get(&descriptor.instance_id), &index, false);
            instances.insert(descriptor.instance_id.clone(), record);
        }

        if options.external_tag.is_some() {
            for descriptor in &cloud.external {
                let record = merge_descriptor(descriptor, registry.get(&descriptor.instance_id), &index, true);
                let colliding: Vec<String> = instances
                    .iter()
                    .filter(|(key, existing)| {
                        **key != descriptor.instance_id
                            && !existing.external
                            && !record.private_ip.is_empty()
                            && existing.private_ip == record.private_ip
                    })
                    .map(|(key, _)| key.clone())
                    .collect();
                for key in colliding {
                    debug!(replaced = %key, by = %descriptor.instance_id, "external instance replaces internal entry");
                    instances.remove(&key);
                }
                instances.insert(descriptor.instance_id.clone(), record);
            }
        }

        let now = self.clock.now();
        let mut stale = Vec::new();
        for (key, entry) in registry {
            if instances.contains_key(key) {
                continue;
            }
            if entry.is_primary && !entry.is_expired(now, self.primary_stale_after) {
                debug!(instance_id = %key, "keeping registry-only primary");
                let mut kept = entry.clone();
                kept.instance_id = key.clone();
                kept.provider_visible = false;
                instances.insert(key.clone(), kept);
            } else {
                debug!(instance_id = %key, "registry entry no longer in inventory");
                stale.push(entry.clone());
            }
        }

        self.backfill_hostnames(&mut instances).await;
        let removed = dedup_instances(&mut instances);
        if !removed.is_empty() {
            debug!(removed = ?removed, "removed duplicate instance entries");
        }

        info!(
            instances = instances.len(),
            stale = stale.len(),
            "built instance topology"
        );
        Topology { instances, stale }
    }

    /// Best-effort: a failed fetch leaves the hostname empty
    async fn backfill_hostnames(&self, instances: &mut InstanceMap) {
        let targets: Vec<(String, String)> = instances
            .iter()
            .filter(|(_, r)| r.hostname.is_none() && !r.mgmt_ip.is_empty())
            .map(|(k, r)| (k.clone(), r.mgmt_ip.clone()))
            .collect();

        let fetches = targets.into_iter().map(|(key, host)| async move {
            let result = retry(self.clock, &self.hostname_policy, || async {
                match tokio::time::timeout(self.hostname_timeout, fetch_hostname(self.device, &host)).await {
                    Ok(fetched) => fetched,
                    Err(_) => Err(FailoverError::Timeout {
                        operation: format!("hostname fetch from {}", host),
                        duration: self.hostname_timeout,
                    }),
                }
            })
            .await;
            (key, result)
        });

        for (key, result) in join_all(fetches).await {
            match result {
                Ok(hostname) => {
                    if let Some(record) = instances.get_mut(&key) {
                        record.hostname = Some(hostname);
                    }
                }
                Err(e) => warn!(instance_id = %key, "could not fetch hostname: {}", e),
            }
        }
    }
}

/// Lookup from instance NICs to their addresses
pub(crate) struct AddressIndex<'a> {
    nics: HashMap<String, &'a NicDescriptor>,
    public_ips: HashMap<String, &'a str>,
}

impl<'a> AddressIndex<'a> {
    pub(crate) fn new(nics: &'a [NicDescriptor], public_ips: &'a [PublicIpDescriptor]) -> Self {
        Self {
            nics: nics.iter().map(|n| (n.id.to_ascii_lowercase(), n)).collect(),
            public_ips: public_ips
                .iter()
                .filter_map(|ip| {
                    let config = ip.ip_configuration_id.as_ref()?.to_ascii_lowercase();
                    Some((config, ip.ip_address.as_deref()?))
                })
                .collect(),
        }
    }

    /// Private and public address of an instance's primary IP configuration
    ///
    /// Addresses already on the descriptor take precedence.
    pub(crate) fn resolve(&self, descriptor: &InstanceDescriptor) -> (Option<String>, Option<String>) {
        let primary = descriptor
            .nic_ids
            .iter()
            .filter_map(|id| self.nics.get(&id.to_ascii_lowercase()).copied())
            .max_by_key(|nic| nic.primary)
            .and_then(|nic| nic.primary_configuration().map(|c| (nic, c)));

        let private_ip = descriptor
            .private_ip
            .clone()
            .or_else(|| primary.map(|(_, c)| c.private_ip.clone()))
            .filter(|ip| !ip.is_empty());
        let public_ip = descriptor.public_ip.clone().or_else(|| {
            primary.and_then(|(nic, config)| {
                let config_id = format!("{}/ipConfigurations/{}", nic.id, config.name).to_ascii_lowercase();
                self.public_ips.get(&config_id).map(|ip| ip.to_string())
            })
        });
        (private_ip, public_ip)
    }
}

fn merge_descriptor(
    descriptor: &InstanceDescriptor,
    registered: Option<&InstanceRecord>,
    index: &AddressIndex<'_>,
    external: bool,
) -> InstanceRecord {
    let mut record = registered.cloned().unwrap_or_default();
    record.instance_id = descriptor.instance_id.clone();
    record.provider_visible = !descriptor.is_deallocated();
    record.external = external;

    let (private_ip, public_ip) = index.resolve(descriptor);
    if let Some(ip) = private_ip {
        record.mgmt_ip = ip.clone();
        record.private_ip = ip;
    }
    if public_ip.is_some() {
        record.public_ip = public_ip;
    }
    record
}

fn is_unique_id(key: &str) -> bool {
    uuid::Uuid::parse_str(key).is_ok()
}

/// Drop entries that describe the same instance under two ids
///
/// Within a group sharing a private IP the provider-visible entry wins, then
/// the one keyed by a unique id, then the lowest id.
pub fn dedup_instances(instances: &mut InstanceMap) -> Vec<String> {
    let mut by_ip: BTreeMap<&str, Vec<&String>> = BTreeMap::new();
    for (key, record) in instances.iter() {
        if !record.private_ip.is_empty() {
            by_ip.entry(record.private_ip.as_str()).or_default().push(key);
        }
    }

    let mut removed = Vec::new();
    for (_, mut keys) in by_ip.into_iter().filter(|(_, keys)| keys.len() > 1) {
        keys.sort_by(|a, b| {
            let ra = &instances[*a];
            let rb = &instances[*b];
            rb.provider_visible
                .cmp(&ra.provider_visible)
                .then_with(|| is_unique_id(b).cmp(&is_unique_id(a)))
                .then_with(|| compare_instance_ids(a, b))
        });
        removed.extend(keys.into_iter().skip(1).cloned());
    }

    for key in &removed {
        instances.remove(key);
    }
    removed
}

