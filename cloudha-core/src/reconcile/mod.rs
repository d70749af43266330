//! Network reconciliation
//!
//! Planning is pure: given the device's view of which groups are active and
//! the cloud's NICs, route tables and public IPs, compute the mutations that
//! point the cloud at this device. Applying goes through [`NetworkApplier`],
//! which isolates failures per item and never starts an association before
//! every disassociation in the batch has settled.

use crate::clock::Clock;
use crate::cloud::{CloudInventory, NicDescriptor, PublicIpDescriptor, RouteTableDescriptor};
use crate::config::ReconcileConfig;
use crate::device::DeviceState;
use crate::error::{FailoverError, FailoverResult};
use crate::patterns::retry::{retry, RetryConfig};
use crate::types::{NetworkMutationPlan, NicMutation, RouteUpdate};
use futures::future::join_all;
use ipnet::IpNet;
use tracing::{debug, info, warn};

pub mod nics;
pub mod routes;

pub use nics::{plan_nics, NicAddressSets, PublicIpTags};
pub use routes::{plan_routes, tag_matches_groups};

/// Cloud state the planner works from
#[derive(Debug, Clone, Default)]
pub struct CloudNetwork {
    pub nics: Vec<NicDescriptor>,
    pub route_tables: Vec<RouteTableDescriptor>,
    pub public_ips: Vec<PublicIpDescriptor>,
}

/// Everything one run needs to change
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    pub routes: Vec<RouteUpdate>,
    pub nics: NetworkMutationPlan,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty() && self.nics.is_empty()
    }
}

/// Plan route and NIC mutations that make this device the traffic owner
///
/// `desired_next_hop` is the address routes should point at. When it is
/// unknown, routes are left untouched and only NICs are planned.
pub fn reconcile(
    config: &ReconcileConfig,
    device: &DeviceState,
    desired_next_hop: Option<&str>,
    network: &CloudNetwork,
) -> FailoverResult<ReconcilePlan> {
    let managed: Vec<IpNet> = config
        .managed_routes
        .iter()
        .map(|r| {
            r.parse::<IpNet>().map_err(|e| {
                FailoverError::configuration("reconcile.managed_routes", format!("'{}': {}", r, e))
            })
        })
        .collect::<FailoverResult<_>>()?;

    let routes = match desired_next_hop {
        Some(next_hop) => plan_routes(
            &network.route_tables,
            &device.active_groups,
            &managed,
            &config.route_group_tag,
            next_hop,
        ),
        None => {
            warn!("no next hop address on this device; skipping route updates");
            Vec::new()
        }
    };

    let addresses = NicAddressSets {
        local: device.local_addresses(),
        active: device.floating_addresses(true),
        inactive: device.floating_addresses(false),
    };
    let tags = PublicIpTags {
        private_ip: &config.public_ip_private_tag,
        subnet_id: &config.public_ip_subnet_tag,
    };
    let nics = plan_nics(
        &network.nics,
        &addresses,
        &network.public_ips,
        &tags,
        config.nic_suffix_len,
    );

    info!(
        routes = routes.len(),
        disassociate = nics.disassociate.len(),
        associate = nics.associate.len(),
        "computed network plan"
    );
    Ok(ReconcilePlan { routes, nics })
}

/// Applies planned mutations with bounded retry on rate limiting
pub struct NetworkApplier<'a> {
    cloud: &'a dyn CloudInventory,
    clock: &'a dyn Clock,
    policy: RetryConfig,
}

impl<'a> NetworkApplier<'a> {
    pub fn new(cloud: &'a dyn CloudInventory, clock: &'a dyn Clock, config: &ReconcileConfig) -> Self {
        Self {
            cloud,
            clock,
            policy: RetryConfig::for_cloud_mutations(config.max_retries, config.retry_interval),
        }
    }

    /// Apply routes and NICs concurrently, reporting every failed item
    pub async fn apply(&self, plan: &ReconcilePlan) -> FailoverResult<()> {
        let (routes, nics) = tokio::join!(self.apply_routes(&plan.routes), self.apply_nics(&plan.nics));
        let errors: Vec<FailoverError> = [routes, nics].into_iter().filter_map(Result::err).collect();
        match FailoverError::from_batch("network reconciliation", errors) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    pub async fn apply_routes(&self, updates: &[RouteUpdate]) -> FailoverResult<()> {
        let results = join_all(updates.iter().map(|u| self.update_route(u))).await;
        let errors = results.into_iter().filter_map(Result::err).collect();
        match FailoverError::from_batch("route updates", errors) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// All disassociations settle before any association is issued
    ///
    /// If a disassociation fails its address may still be bound to the old
    /// NIC, so associations are skipped and the run is left for replay.
    pub async fn apply_nics(&self, plan: &NetworkMutationPlan) -> FailoverResult<()> {
        self.apply_nic_batch("NIC disassociation", &plan.disassociate).await?;
        self.apply_nic_batch("NIC association", &plan.associate).await
    }

    async fn apply_nic_batch(&self, context: &str, batch: &[NicMutation]) -> FailoverResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        debug!(count = batch.len(), "{}", context);
        let results = join_all(batch.iter().map(|m| self.update_nic(m))).await;
        let errors = results.into_iter().filter_map(Result::err).collect();
        match FailoverError::from_batch(context, errors) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn update_route(&self, update: &RouteUpdate) -> FailoverResult<()> {
        let policy = self
            .policy
            .clone()
            .with_operation_name(format!("update route {}/{}", update.route_table, update.route_name));
        retry(self.clock, &policy, || {
            self.cloud.update_route(
                &update.resource_group,
                &update.route_table,
                &update.route_name,
                &update.params,
            )
        })
        .await
        .map_err(|e| {
            warn!(route_table = %update.route_table, route = %update.route_name, "route update failed: {}", e);
            e
        })?;
        info!(
            route_table = %update.route_table,
            route = %update.route_name,
            next_hop = %update.params.next_hop_ip_address,
            "route updated"
        );
        Ok(())
    }

    async fn update_nic(&self, mutation: &NicMutation) -> FailoverResult<()> {
        let policy = self
            .policy
            .clone()
            .with_operation_name(format!("update NIC {}", mutation.nic_name));
        retry(self.clock, &policy, || {
            self.cloud
                .update_nic(&mutation.resource_group, &mutation.nic_name, &mutation.update)
        })
        .await
        .map_err(|e| {
            warn!(nic = %mutation.nic_name, "NIC update failed: {}", e);
            e
        })?;
        info!(
            nic = %mutation.nic_name,
            configurations = mutation.update.ip_configurations.len(),
            "NIC updated"
        );
        Ok(())
    }
}
