//! CloudProvider operations over in-memory collaborators

use async_trait::async_trait;
use cloudha_core::clock::{Clock, MockClock};
use cloudha_core::cloud::PublicIpDescriptor;
use cloudha_core::config::FailoverConfig;
use cloudha_core::error::{FailoverError, FailoverResult};
use cloudha_core::license::LicenseRevoker;
use cloudha_core::storage::Registry;
use cloudha_core::test_helpers::{instance, instance_map, ip_config, nic, vm, MemoryRegistry, MockCloud, MockDevice};
use cloudha_core::types::{InstanceRecord, NodeResourceType, INSTANCES_NAMESPACE};
use cloudha_core::{CloudProvider, ManagedCloudProvider, ProviderContext, TopologyOptions};
use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct RecordingRevoker {
    revoked: Mutex<Vec<String>>,
}

#[async_trait]
impl LicenseRevoker for RecordingRevoker {
    async fn revoke(&self, instances: &[InstanceRecord]) -> FailoverResult<()> {
        self.revoked
            .lock()
            .unwrap()
            .extend(instances.iter().map(|r| r.instance_id.clone()));
        Ok(())
    }
}

struct Fixture {
    provider: ManagedCloudProvider,
    registry: Arc<MemoryRegistry>,
    revoker: Arc<RecordingRevoker>,
    clock: Arc<MockClock>,
}

fn fixture(cloud: MockCloud, device: MockDevice) -> Fixture {
    let registry = Arc::new(MemoryRegistry::new());
    let revoker = Arc::new(RecordingRevoker::default());
    let clock = Arc::new(MockClock::default());
    let ctx = ProviderContext::new(
        FailoverConfig::test(),
        Arc::new(cloud),
        registry.clone(),
        Arc::new(device),
    )
    .with_clock(clock.clone())
    .with_license_revoker(revoker.clone());

    Fixture {
        provider: ManagedCloudProvider::new(ctx),
        registry,
        revoker,
        clock,
    }
}

fn two_vm_cloud() -> MockCloud {
    let nic0 = nic("bigip0-mgmt", vec![ip_config("ipconfig1", "10.0.0.4", true)]);
    let nic1 = nic("bigip1-mgmt", vec![ip_config("ipconfig1", "10.0.0.5", true)]);
    let public_ip = PublicIpDescriptor {
        id: "/subscriptions/sub-test/resourceGroups/rg-test/providers/Microsoft.Network/publicIPAddresses/pip0"
            .to_string(),
        name: "pip0".to_string(),
        resource_group: "rg-test".to_string(),
        ip_address: Some("52.1.2.3".to_string()),
        ip_configuration_id: Some(format!("{}/ipConfigurations/ipconfig1", nic0.id)),
        tags: Default::default(),
    };
    MockCloud::new()
        .with_instances(vec![vm("0", &nic0), vm("1", &nic1)])
        .with_nics(vec![nic0, nic1])
        .with_public_ips(vec![public_ip])
}

async fn seed(registry: &MemoryRegistry, record: &InstanceRecord) {
    registry
        .put(INSTANCES_NAMESPACE, &record.instance_id, &serde_json::to_value(record).unwrap())
        .await
        .unwrap();
}

async fn stored(registry: &MemoryRegistry, id: &str) -> InstanceRecord {
    let value = registry.get(INSTANCES_NAMESPACE, id).await.unwrap().unwrap();
    serde_json::from_value(value).unwrap()
}

#[tokio::test]
async fn test_get_instances_purges_stale_and_revokes_licenses() {
    let f = fixture(two_vm_cloud(), MockDevice::new());
    seed(&f.registry, &instance("0", "10.0.0.4")).await;
    seed(&f.registry, &instance("gone", "10.0.0.99")).await;

    let options = TopologyOptions {
        purge_stale: true,
        license_pool: true,
        ..Default::default()
    };
    let instances = f.provider.get_instances(&options).await.unwrap();

    assert_eq!(instances.keys().collect::<Vec<_>>(), vec!["0", "1"]);
    assert_eq!(instances["0"].public_ip.as_deref(), Some("52.1.2.3"));
    assert!(instances["0"].version_ok);
    assert_eq!(f.registry.keys(INSTANCES_NAMESPACE), vec!["0".to_string()]);
    assert_eq!(*f.revoker.revoked.lock().unwrap(), vec!["gone".to_string()]);
}

#[tokio::test]
async fn test_get_instances_keeps_stale_without_purge() {
    let f = fixture(two_vm_cloud(), MockDevice::new());
    seed(&f.registry, &instance("gone", "10.0.0.99")).await;

    f.provider.get_instances(&TopologyOptions::default()).await.unwrap();

    assert_eq!(f.registry.keys(INSTANCES_NAMESPACE), vec!["gone".to_string()]);
    assert!(f.revoker.revoked.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_primary_elected_demotes_others() {
    let f = fixture(MockCloud::new(), MockDevice::new());
    let mut old_primary = instance("0", "10.0.0.4");
    old_primary.is_primary = true;
    seed(&f.registry, &old_primary).await;
    seed(&f.registry, &instance("1", "10.0.0.5")).await;

    f.provider.primary_elected("1").await.unwrap();

    assert!(!stored(&f.registry, "0").await.is_primary);
    let winner = stored(&f.registry, "1").await;
    assert!(winner.is_primary);
    assert_eq!(winner.last_update, Some(f.clock.now()));
}

#[tokio::test]
async fn test_put_instance_stamps_last_update() {
    let f = fixture(MockCloud::new(), MockDevice::new());
    let mut record = instance("ignored", "10.0.0.4");
    record.hostname = Some("bigip0".to_string());

    f.provider.put_instance("0", record).await.unwrap();

    let written = stored(&f.registry, "0").await;
    assert_eq!(written.instance_id, "0");
    assert_eq!(written.hostname.as_deref(), Some("bigip0"));
    assert_eq!(written.last_update, Some(f.clock.now()));
}

#[tokio::test]
async fn test_is_valid_primary_compares_live_hostname() {
    let device = MockDevice::new()
        .with_hostname("10.0.0.4", "bigip0")
        .with_hostname("10.0.0.5", "someone-else");
    let f = fixture(MockCloud::new(), device);

    let mut zero = instance("0", "10.0.0.4");
    zero.hostname = Some("bigip0".to_string());
    let mut one = instance("1", "10.0.0.5");
    one.hostname = Some("bigip1".to_string());
    let instances = instance_map(vec![zero, one]);

    assert!(f.provider.is_valid_primary("0", &instances).await.unwrap());
    assert!(!f.provider.is_valid_primary("1", &instances).await.unwrap());
    assert!(!f.provider.is_valid_primary("missing", &instances).await.unwrap());
}

#[tokio::test]
async fn test_is_valid_primary_surfaces_device_errors() {
    let f = fixture(MockCloud::new(), MockDevice::new().unreachable("10.0.0.4"));
    let mut zero = instance("0", "10.0.0.4");
    zero.hostname = Some("bigip0".to_string());

    let err = f
        .provider
        .is_valid_primary("0", &instance_map(vec![zero]))
        .await
        .unwrap_err();
    assert!(matches!(err, FailoverError::Device { .. }));
}

#[tokio::test]
async fn test_get_nodes_by_resource_id() {
    let f = fixture(two_vm_cloud(), MockDevice::new());
    let scale_set =
        "/subscriptions/sub-test/resourceGroups/rg-test/providers/Microsoft.Compute/virtualMachineScaleSets/ss-test";

    let nodes = f
        .provider
        .get_nodes_by_resource_id(scale_set, NodeResourceType::ScaleSet)
        .await
        .unwrap();

    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[0].id, "0");
    assert_eq!(nodes[0].private_ip.as_deref(), Some("10.0.0.4"));
    assert_eq!(nodes[0].public_ip.as_deref(), Some("52.1.2.3"));
    assert_eq!(nodes[1].public_ip, None);
}

#[tokio::test]
async fn test_get_nodes_rejects_mismatched_resource() {
    let f = fixture(two_vm_cloud(), MockDevice::new());
    let group = "/subscriptions/sub-test/resourceGroups/rg-test";

    let err = f
        .provider
        .get_nodes_by_resource_id(group, NodeResourceType::ScaleSet)
        .await
        .unwrap_err();
    assert!(matches!(err, FailoverError::InvalidResourceId { .. }));

    let nodes = f
        .provider
        .get_nodes_by_resource_id(group, NodeResourceType::ResourceGroup)
        .await
        .unwrap();
    assert_eq!(nodes.len(), 2);

    assert!(f
        .provider
        .get_nodes_by_resource_id("not/an/id", NodeResourceType::ResourceGroup)
        .await
        .is_err());
}
