//! Property-based tests for primary election

use chrono::{TimeZone, Utc};
use cloudha_core::election::elect_primary;
use cloudha_core::error::FailoverError;
use cloudha_core::types::{InstanceMap, InstanceRecord};
use proptest::prelude::*;
use std::net::Ipv4Addr;

// Strategy for one instance record with random gates and addresses
fn instance_strategy() -> impl Strategy<Value = InstanceRecord> {
    (
        0u32..50,
        any::<u32>(),
        any::<bool>(),
        any::<bool>(),
        prop::bool::weighted(0.2),
        prop::option::of(1_600_000_000i64..1_700_000_000),
    )
        .prop_map(|(id, ip, visible, version_ok, external, backup)| {
            let address = Ipv4Addr::from(ip).to_string();
            let mut record = InstanceRecord::new(id.to_string());
            record.private_ip = address.clone();
            record.mgmt_ip = address;
            record.provider_visible = visible;
            record.version_ok = version_ok;
            record.external = external;
            if let Some(secs) = backup {
                record.last_backup = Utc.timestamp_opt(secs, 0).unwrap();
            }
            record
        })
}

fn instance_map_strategy() -> impl Strategy<Value = InstanceMap> {
    prop::collection::vec(instance_strategy(), 0..12)
        .prop_map(|records| records.into_iter().map(|r| (r.instance_id.clone(), r)).collect())
}

proptest! {
    #[test]
    fn election_is_deterministic(instances in instance_map_strategy()) {
        let first = elect_primary(&instances).ok();
        let second = elect_primary(&instances).ok();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn winner_is_always_eligible(instances in instance_map_strategy()) {
        match elect_primary(&instances) {
            Ok(winner) => {
                let record = &instances[&winner];
                prop_assert!(record.version_ok);
                prop_assert!(record.provider_visible);
            }
            Err(FailoverError::NoInstances) => prop_assert!(instances.is_empty()),
            Err(FailoverError::NoEligiblePrimary { .. }) => {
                prop_assert!(instances.values().all(|r| !r.is_eligible()));
            }
            Err(other) => prop_assert!(false, "unexpected error: {}", other),
        }
    }

    #[test]
    fn configured_winner_when_any_candidate_is_configured(instances in instance_map_strategy()) {
        if let Ok(winner) = elect_primary(&instances) {
            let any_configured = instances
                .values()
                .any(|r| r.is_eligible() && r.has_running_config());
            if any_configured {
                prop_assert!(instances[&winner].has_running_config());
            }
        }
    }
}
