//! Provider interface exposed to the HA framework

use crate::cloud::ResourceScope;
use crate::context::ProviderContext;
use crate::election;
use crate::error::{FailoverError, FailoverResult};
use crate::patterns::retry::RetryConfig;
use crate::resource_id::ResourceId;
use crate::topology::{AddressIndex, CloudSnapshot, TopologyBuilder, TopologyOptions};
use crate::types::{InstanceMap, InstanceRecord, NodeDescriptor, NodeResourceType, INSTANCES_NAMESPACE};
use crate::validation;
use async_trait::async_trait;
use tracing::{debug, info, warn};

#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Unified view of cluster members
    async fn get_instances(&self, options: &TopologyOptions) -> FailoverResult<InstanceMap>;

    async fn elect_primary(&self, instances: &InstanceMap) -> FailoverResult<String>;

    async fn is_valid_primary(&self, instance_id: &str, instances: &InstanceMap) -> FailoverResult<bool>;

    /// Record `instance_id` as the primary and demote every other record
    async fn primary_elected(&self, instance_id: &str) -> FailoverResult<()>;

    async fn put_instance(&self, instance_id: &str, record: InstanceRecord) -> FailoverResult<()>;

    async fn get_nodes_by_resource_id(
        &self,
        resource_id: &str,
        resource_type: NodeResourceType,
    ) -> FailoverResult<Vec<NodeDescriptor>>;
}

/// [`CloudProvider`] over the collaborators of a [`ProviderContext`]
pub struct ManagedCloudProvider {
    ctx: ProviderContext,
}

impl ManagedCloudProvider {
    pub fn new(ctx: ProviderContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &ProviderContext {
        &self.ctx
    }

    /// Topology options taken from the election config
    pub fn default_options(&self) -> FailoverResult<TopologyOptions> {
        let election = &self.ctx.config.election;
        Ok(TopologyOptions {
            external_tag: election.external_tag_pair()?,
            license_pool: election.license_pool,
            purge_stale: election.purge_stale,
        })
    }

    /// Registry records keyed by instance id; unreadable records are skipped
    async fn registry_instances(&self) -> FailoverResult<InstanceMap> {
        let entries = self.ctx.registry.list(INSTANCES_NAMESPACE).await?;
        let mut instances = InstanceMap::new();
        for (key, value) in entries {
            match serde_json::from_value::<InstanceRecord>(value) {
                Ok(mut record) => {
                    if record.instance_id.is_empty() {
                        record.instance_id = key.clone();
                    }
                    instances.insert(key, record);
                }
                Err(e) => warn!(instance_id = %key, "skipping unreadable registry record: {}", e),
            }
        }
        Ok(instances)
    }

    async fn write_record(&self, instance_id: &str, mut record: InstanceRecord) -> FailoverResult<()> {
        record.instance_id = instance_id.to_string();
        record.last_update = Some(self.ctx.clock.now());
        let value = serde_json::to_value(&record)?;
        self.ctx.registry.put(INSTANCES_NAMESPACE, instance_id, &value).await
    }

    async fn purge(&self, stale: &[InstanceRecord], revoke_licenses: bool) -> FailoverResult<()> {
        let keys: Vec<String> = stale.iter().map(|r| r.instance_id.clone()).collect();
        info!(instances = ?keys, "purging stale registry entries");
        self.ctx.registry.delete_many(INSTANCES_NAMESPACE, &keys).await?;
        if revoke_licenses {
            self.ctx.licenses.revoke(stale).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl CloudProvider for ManagedCloudProvider {
    async fn get_instances(&self, options: &TopologyOptions) -> FailoverResult<InstanceMap> {
        let ctx = &self.ctx;
        let scope = ctx.instance_scope();
        let (instances, nics, public_ips) = tokio::try_join!(
            ctx.cloud.list_instances(&scope),
            ctx.cloud.list_nics(&scope),
            ctx.cloud.list_public_ips(&scope),
        )?;
        let external = match &options.external_tag {
            Some((key, value)) => ctx.cloud.list_instances_by_tag(key, value).await?,
            None => Vec::new(),
        };
        let snapshot = CloudSnapshot {
            instances,
            nics,
            public_ips,
            external,
        };
        let registry = self.registry_instances().await?;

        let hostname_policy = RetryConfig::for_device_reads(
            ctx.config.device.hostname_retries,
            ctx.config.device.hostname_retry_interval,
        )
        .with_operation_name("hostname_backfill");
        let topology = TopologyBuilder::new(
            ctx.device.as_ref(),
            ctx.clock.as_ref(),
            ctx.config.registry.primary_stale_after,
        )
        .with_hostname_policy(hostname_policy, ctx.config.device.request_timeout)
        .build(&snapshot, &registry, options)
        .await;

        if options.purge_stale && !topology.stale.is_empty() {
            self.purge(&topology.stale, options.license_pool).await?;
        }
        Ok(topology.instances)
    }

    async fn elect_primary(&self, instances: &InstanceMap) -> FailoverResult<String> {
        election::elect_primary(instances)
    }

    async fn is_valid_primary(&self, instance_id: &str, instances: &InstanceMap) -> FailoverResult<bool> {
        validation::is_valid_primary(self.ctx.device.as_ref(), instance_id, instances).await
    }

    async fn primary_elected(&self, instance_id: &str) -> FailoverResult<()> {
        let registered = self.registry_instances().await?;
        for (key, mut record) in registered {
            let should_be_primary = key == instance_id;
            if record.is_primary == should_be_primary {
                continue;
            }
            debug!(instance_id = %key, primary = should_be_primary, "updating primary flag");
            record.is_primary = should_be_primary;
            self.write_record(&key, record).await?;
        }
        info!(instance_id, "recorded elected primary");
        Ok(())
    }

    async fn put_instance(&self, instance_id: &str, record: InstanceRecord) -> FailoverResult<()> {
        self.write_record(instance_id, record).await
    }

    async fn get_nodes_by_resource_id(
        &self,
        resource_id: &str,
        resource_type: NodeResourceType,
    ) -> FailoverResult<Vec<NodeDescriptor>> {
        let parsed = ResourceId::parse(resource_id)?;
        let scope = match resource_type {
            NodeResourceType::ScaleSet => {
                if !parsed.is_type("virtualMachineScaleSets") {
                    return Err(FailoverError::InvalidResourceId {
                        id: resource_id.to_string(),
                        reason: "not a scale set".to_string(),
                    });
                }
                ResourceScope::new(&parsed.resource_group, parsed.name.clone())
            }
            NodeResourceType::ResourceGroup => ResourceScope::new(&parsed.resource_group, None),
        };

        let cloud = &self.ctx.cloud;
        let (instances, nics, public_ips) = tokio::try_join!(
            cloud.list_instances(&scope),
            cloud.list_nics(&scope),
            cloud.list_public_ips(&scope),
        )?;
        let index = AddressIndex::new(&nics, &public_ips);

        let nodes: Vec<NodeDescriptor> = instances
            .iter()
            .map(|instance| {
                let (private_ip, public_ip) = index.resolve(instance);
                NodeDescriptor {
                    id: instance.instance_id.clone(),
                    private_ip,
                    public_ip,
                }
            })
            .collect();
        debug!(resource_id, nodes = nodes.len(), "resolved nodes");
        Ok(nodes)
    }
}
