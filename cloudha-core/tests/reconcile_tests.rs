//! Applying network plans against a recording cloud

use cloudha_core::clock::{Clock, MockClock};
use cloudha_core::cloud::{RouteDescriptor, RouteTableDescriptor, NEXT_HOP_VIRTUAL_APPLIANCE};
use cloudha_core::config::ReconcileConfig;
use cloudha_core::device::{DeviceState, SelfIp, VirtualAddress};
use cloudha_core::error::FailoverError;
use cloudha_core::reconcile::{reconcile, CloudNetwork, NetworkApplier, ReconcilePlan};
use cloudha_core::test_helpers::{ip_config, nic, CloudCall, MockCloud};
use pretty_assertions::assert_eq;
use std::time::Duration;

fn reconcile_config() -> ReconcileConfig {
    ReconcileConfig {
        managed_routes: vec!["192.168.10.0/24".to_string()],
        max_retries: 3,
        retry_interval: Duration::from_millis(1),
        ..Default::default()
    }
}

fn device_state() -> DeviceState {
    DeviceState {
        hostname: "bigip0".to_string(),
        active_groups: ["/Common/traffic-group-1".to_string()].into_iter().collect(),
        self_ips: vec![SelfIp {
            name: "/Common/ext-self".to_string(),
            address: "10.0.1.4/24".to_string(),
            floating: Some("disabled".to_string()),
            traffic_group: Some("/Common/traffic-group-local-only".to_string()),
        }],
        virtual_addresses: vec![VirtualAddress {
            address: "10.0.1.10".to_string(),
            traffic_group: Some("/Common/traffic-group-1".to_string()),
        }],
    }
}

fn route_table(next_hop: &str) -> RouteTableDescriptor {
    RouteTableDescriptor {
        id: "/subscriptions/sub-test/resourceGroups/rg-test/providers/Microsoft.Network/routeTables/rt-int"
            .to_string(),
        name: "rt-int".to_string(),
        resource_group: "rg-test".to_string(),
        tags: [("f5_ha".to_string(), "traffic-group-1".to_string())]
            .into_iter()
            .collect(),
        routes: vec![RouteDescriptor {
            name: "default-out".to_string(),
            address_prefix: "192.168.10.0/24".to_string(),
            next_hop_type: NEXT_HOP_VIRTUAL_APPLIANCE.to_string(),
            next_hop_ip: Some(next_hop.to_string()),
        }],
    }
}

/// Peer holds the floating address; it must move to this device
fn swap_network() -> CloudNetwork {
    CloudNetwork {
        nics: vec![
            nic("bigip-ext0", vec![ip_config("self", "10.0.1.4", true)]),
            nic(
                "bigip-ext1",
                vec![ip_config("self", "10.0.1.5", true), ip_config("vip", "10.0.1.10", false)],
            ),
        ],
        route_tables: vec![route_table("10.0.1.5")],
        public_ips: Vec::new(),
    }
}

fn planned() -> ReconcilePlan {
    let device = device_state();
    let next_hop = device.next_hop(None);
    reconcile(&reconcile_config(), &device, next_hop.as_deref(), &swap_network()).unwrap()
}

#[test]
fn test_swap_plan() {
    let plan = planned();

    assert_eq!(plan.routes.len(), 1);
    assert_eq!(plan.routes[0].params.next_hop_ip_address, "10.0.1.4");
    assert_eq!(plan.nics.disassociate.len(), 1);
    assert_eq!(plan.nics.disassociate[0].nic_name, "bigip-ext1");
    assert_eq!(plan.nics.associate.len(), 1);
    assert_eq!(plan.nics.associate[0].nic_name, "bigip-ext0");
}

#[tokio::test]
async fn test_disassociation_commits_before_association_is_issued() {
    let network = swap_network();
    let cloud = MockCloud::new()
        .with_nics(network.nics.clone())
        .with_route_tables(network.route_tables.clone());
    let config = reconcile_config();

    NetworkApplier::new(&cloud, &MockClock::default(), &config).apply(&planned()).await.unwrap();

    let calls = cloud.calls();
    let committed_removal = calls
        .iter()
        .position(|c| matches!(c, CloudCall::NicCommitted { nic, .. } if nic == "bigip-ext1"))
        .unwrap();
    let issued_addition = calls
        .iter()
        .position(|c| matches!(c, CloudCall::NicIssued { nic } if nic == "bigip-ext0"))
        .unwrap();
    assert!(committed_removal < issued_addition, "calls: {:?}", calls);

    let mine = cloud.nic("bigip-ext0").unwrap();
    assert!(mine.has_address("10.0.1.10"));
    assert!(!cloud.nic("bigip-ext1").unwrap().has_address("10.0.1.10"));
    assert!(calls.iter().any(|c| matches!(
        c,
        CloudCall::RouteCommitted { route, next_hop, .. } if route == "default-out" && next_hop == "10.0.1.4"
    )));
}

#[tokio::test]
async fn test_rate_limited_update_is_retried() {
    let network = swap_network();
    let cloud = MockCloud::new()
        .with_nics(network.nics.clone())
        .with_route_tables(network.route_tables.clone());
    cloud.fail_updates("bigip-ext1", Some(2), true);
    let clock = MockClock::default();
    let started = clock.now();

    NetworkApplier::new(&cloud, &clock, &reconcile_config())
        .apply(&planned())
        .await
        .unwrap();

    assert_eq!(cloud.attempts("bigip-ext1"), 3);
    assert_eq!(cloud.attempts("bigip-ext0"), 1);
    assert_eq!(clock.now() - started, chrono::Duration::milliseconds(2));
}

#[tokio::test]
async fn test_failed_disassociation_skips_associations_but_not_routes() {
    let network = swap_network();
    let cloud = MockCloud::new()
        .with_nics(network.nics.clone())
        .with_route_tables(network.route_tables.clone());
    cloud.fail_updates("bigip-ext1", None, false);

    let err = NetworkApplier::new(&cloud, &MockClock::default(), &reconcile_config())
        .apply(&planned())
        .await
        .unwrap_err();

    assert!(matches!(err, FailoverError::CloudApi { status: Some(409), .. }));
    assert_eq!(cloud.attempts("bigip-ext1"), 1);
    assert_eq!(cloud.attempts("bigip-ext0"), 0);
    assert!(cloud
        .calls()
        .iter()
        .any(|c| matches!(c, CloudCall::RouteCommitted { .. })));
}

#[tokio::test]
async fn test_route_failures_are_isolated() {
    let mut table = route_table("10.0.1.5");
    table.routes.push(RouteDescriptor {
        name: "second".to_string(),
        address_prefix: "192.168.10.0/24".to_string(),
        next_hop_type: NEXT_HOP_VIRTUAL_APPLIANCE.to_string(),
        next_hop_ip: Some("10.0.1.5".to_string()),
    });
    let network = CloudNetwork {
        nics: Vec::new(),
        route_tables: vec![table],
        public_ips: Vec::new(),
    };
    let cloud = MockCloud::new().with_route_tables(network.route_tables.clone());
    cloud.fail_updates("default-out", None, false);

    let device = device_state();
    let plan = reconcile(&reconcile_config(), &device, Some("10.0.1.4"), &network).unwrap();
    assert_eq!(plan.routes.len(), 2);

    let result = NetworkApplier::new(&cloud, &MockClock::default(), &reconcile_config()).apply(&plan).await;

    assert!(result.is_err());
    let committed: Vec<CloudCall> = cloud.calls();
    assert_eq!(
        committed,
        vec![CloudCall::RouteCommitted {
            table: "rt-int".to_string(),
            route: "second".to_string(),
            next_hop: "10.0.1.4".to_string(),
        }]
    );
}
