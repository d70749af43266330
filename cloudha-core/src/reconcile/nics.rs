//! NIC IP-configuration planning
//!
//! "My" NICs carry one of this device's own self-IPs. Each is paired with
//! the peer NIC whose name shares its stem. Active floating addresses move
//! from the peer to me and inactive ones go back. The plan lists every
//! removal separately from every addition so the applier can finish all
//! removals first.

use crate::cloud::{IpConfiguration, NicDescriptor, NicUpdate, PublicIpDescriptor};
use crate::types::{NetworkMutationPlan, NicMutation};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};

/// Addresses that decide which configurations move where
#[derive(Debug, Clone, Default)]
pub struct NicAddressSets {
    /// Non-floating self-IPs of this device
    pub local: BTreeSet<String>,
    /// Floating addresses of groups active here
    pub active: BTreeSet<String>,
    /// Floating addresses of groups active elsewhere
    pub inactive: BTreeSet<String>,
}

/// Tag names identifying where an orphaned public IP belongs
#[derive(Debug, Clone)]
pub struct PublicIpTags<'a> {
    pub private_ip: &'a str,
    pub subnet_id: &'a str,
}

fn nic_stem(name: &str, suffix_len: usize) -> &str {
    if suffix_len == 0 {
        return name;
    }
    match name.char_indices().rev().nth(suffix_len - 1) {
        Some((start, _)) => &name[..start],
        None => "",
    }
}

fn is_mine(nic: &NicDescriptor, local: &BTreeSet<String>) -> bool {
    nic.ip_configurations.iter().any(|c| local.contains(&c.private_ip))
}

fn movable(configs: &[IpConfiguration], wanted: &BTreeSet<String>) -> Vec<IpConfiguration> {
    configs
        .iter()
        .filter(|c| !c.primary && wanted.contains(&c.private_ip))
        .cloned()
        .collect()
}

fn without(configs: &[IpConfiguration], removed: &[IpConfiguration]) -> Vec<IpConfiguration> {
    configs
        .iter()
        .filter(|c| !removed.iter().any(|r| r.private_ip == c.private_ip))
        .cloned()
        .collect()
}

fn mutation(nic: &NicDescriptor, configs: Vec<IpConfiguration>) -> NicMutation {
    NicMutation {
        resource_group: nic.resource_group.clone(),
        nic_name: nic.name.clone(),
        update: NicUpdate {
            location: nic.location.clone(),
            ip_configurations: configs,
        },
    }
}

/// Compute the NIC mutations that hand active floating addresses to this device
pub fn plan_nics(
    nics: &[NicDescriptor],
    addresses: &NicAddressSets,
    public_ips: &[PublicIpDescriptor],
    tags: &PublicIpTags<'_>,
    suffix_len: usize,
) -> NetworkMutationPlan {
    let mut sorted: Vec<&NicDescriptor> = nics.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let (mine, others): (Vec<&NicDescriptor>, Vec<&NicDescriptor>) =
        sorted.into_iter().partition(|nic| is_mine(nic, &addresses.local));

    let mut disassociate = Vec::new();
    // Final configuration set per NIC receiving addresses, keyed by NIC name
    let mut associate: BTreeMap<String, NicMutation> = BTreeMap::new();

    for my_nic in &mine {
        let stem = nic_stem(&my_nic.name, suffix_len);
        let Some(their_nic) = others
            .iter()
            .find(|n| n.name != my_nic.name && nic_stem(&n.name, suffix_len) == stem)
        else {
            trace!(nic = %my_nic.name, "no peer NIC");
            continue;
        };

        let to_me = movable(&their_nic.ip_configurations, &addresses.active);
        let to_them = movable(&my_nic.ip_configurations, &addresses.inactive);
        if to_me.is_empty() && to_them.is_empty() {
            trace!(nic = %my_nic.name, peer = %their_nic.name, "NIC pair already converged");
            continue;
        }
        debug!(
            nic = %my_nic.name,
            peer = %their_nic.name,
            to_me = to_me.len(),
            to_them = to_them.len(),
            "NIC pair needs addresses moved"
        );

        let my_kept = without(&my_nic.ip_configurations, &to_them);
        let their_kept = without(&their_nic.ip_configurations, &to_me);

        if !to_me.is_empty() {
            disassociate.push(mutation(their_nic, their_kept.clone()));
            let mut configs = my_kept.clone();
            configs.extend(to_me);
            associate.insert(my_nic.name.clone(), mutation(my_nic, configs));
        }
        if !to_them.is_empty() {
            disassociate.push(mutation(my_nic, my_kept));
            let mut configs = their_kept;
            configs.extend(to_them);
            associate.insert(their_nic.name.clone(), mutation(their_nic, configs));
        }
    }

    attach_orphaned_public_ips(&mine, addresses, public_ips, tags, &mut associate);

    NetworkMutationPlan {
        disassociate,
        associate: associate.into_values().collect(),
    }
}

/// Bind unattached public IPs tagged for an active floating address to my NIC
fn attach_orphaned_public_ips(
    mine: &[&NicDescriptor],
    addresses: &NicAddressSets,
    public_ips: &[PublicIpDescriptor],
    tags: &PublicIpTags<'_>,
    associate: &mut BTreeMap<String, NicMutation>,
) {
    for public_ip in public_ips.iter().filter(|p| p.ip_configuration_id.is_none()) {
        let (Some(private_ip), Some(subnet_id)) = (
            public_ip.tags.get(tags.private_ip),
            public_ip.tags.get(tags.subnet_id),
        ) else {
            continue;
        };
        if !addresses.active.contains(private_ip) {
            continue;
        }
        let in_subnet = |c: &IpConfiguration| c.subnet_id.eq_ignore_ascii_case(subnet_id);
        let Some(nic) = mine
            .iter()
            .find(|n| n.ip_configurations.iter().any(in_subnet))
        else {
            debug!(public_ip = %public_ip.name, subnet = %subnet_id, "no local NIC in tagged subnet");
            continue;
        };

        let entry = associate
            .entry(nic.name.clone())
            .or_insert_with(|| mutation(nic, nic.ip_configurations.clone()));
        let configs = &mut entry.update.ip_configurations;
        match configs.iter_mut().find(|c| &c.private_ip == private_ip) {
            Some(existing) if existing.public_ip_id.is_some() => continue,
            Some(existing) => existing.public_ip_id = Some(public_ip.id.clone()),
            None => configs.push(IpConfiguration {
                name: format!("{}-ipconfig", public_ip.name),
                private_ip: private_ip.clone(),
                subnet_id: subnet_id.clone(),
                primary: false,
                public_ip_id: Some(public_ip.id.clone()),
            }),
        }
        debug!(public_ip = %public_ip.name, nic = %nic.name, private_ip = %private_ip, "attaching orphaned public IP");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str, ip: &str, primary: bool) -> IpConfiguration {
        IpConfiguration {
            name: name.to_string(),
            private_ip: ip.to_string(),
            subnet_id: "/subnets/ext".to_string(),
            primary,
            public_ip_id: None,
        }
    }

    fn nic(name: &str, configs: Vec<IpConfiguration>) -> NicDescriptor {
        NicDescriptor {
            id: format!("/nics/{}", name),
            name: name.to_string(),
            resource_group: "rg".to_string(),
            location: "westus".to_string(),
            ip_configurations: configs,
            ..Default::default()
        }
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    const TAGS: PublicIpTags<'static> = PublicIpTags {
        private_ip: "f5_privateIp",
        subnet_id: "f5_extSubnetId",
    };

    #[test]
    fn test_nic_stem() {
        assert_eq!(nic_stem("bigip-ext0", 1), "bigip-ext");
        assert_eq!(nic_stem("bigip-ext12", 2), "bigip-ext");
        assert_eq!(nic_stem("a", 3), "");
        assert_eq!(nic_stem("bigip", 0), "bigip");
    }

    #[test]
    fn test_swap_moves_active_and_returns_inactive() {
        let nics = vec![
            nic(
                "ext0",
                vec![config("self", "10.0.1.4", true), config("vip-b", "10.0.1.11", false)],
            ),
            nic(
                "ext1",
                vec![config("self", "10.0.1.5", true), config("vip-a", "10.0.1.10", false)],
            ),
        ];
        let addresses = NicAddressSets {
            local: set(&["10.0.1.4"]),
            active: set(&["10.0.1.10"]),
            inactive: set(&["10.0.1.11"]),
        };

        let plan = plan_nics(&nics, &addresses, &[], &TAGS, 1);

        assert_eq!(plan.disassociate.len(), 2);
        let their_removal = &plan.disassociate[0];
        assert_eq!(their_removal.nic_name, "ext1");
        assert_eq!(their_removal.update.ip_configurations, vec![config("self", "10.0.1.5", true)]);
        let my_removal = &plan.disassociate[1];
        assert_eq!(my_removal.nic_name, "ext0");
        assert_eq!(my_removal.update.ip_configurations, vec![config("self", "10.0.1.4", true)]);

        let mine = plan.associate.iter().find(|m| m.nic_name == "ext0").unwrap();
        let ips: Vec<&str> = mine.update.ip_configurations.iter().map(|c| c.private_ip.as_str()).collect();
        assert_eq!(ips, vec!["10.0.1.4", "10.0.1.10"]);
        let theirs = plan.associate.iter().find(|m| m.nic_name == "ext1").unwrap();
        let ips: Vec<&str> = theirs.update.ip_configurations.iter().map(|c| c.private_ip.as_str()).collect();
        assert_eq!(ips, vec!["10.0.1.5", "10.0.1.11"]);
    }

    #[test]
    fn test_converged_pair_is_empty() {
        let nics = vec![
            nic("ext0", vec![config("self", "10.0.1.4", true), config("vip", "10.0.1.10", false)]),
            nic("ext1", vec![config("self", "10.0.1.5", true)]),
        ];
        let addresses = NicAddressSets {
            local: set(&["10.0.1.4"]),
            active: set(&["10.0.1.10"]),
            inactive: BTreeSet::new(),
        };
        assert!(plan_nics(&nics, &addresses, &[], &TAGS, 1).is_empty());
    }

    #[test]
    fn test_primary_configuration_never_moves() {
        let nics = vec![
            nic("ext0", vec![config("self", "10.0.1.4", true)]),
            nic("ext1", vec![config("self", "10.0.1.10", true)]),
        ];
        let addresses = NicAddressSets {
            local: set(&["10.0.1.4"]),
            active: set(&["10.0.1.10"]),
            inactive: BTreeSet::new(),
        };
        assert!(plan_nics(&nics, &addresses, &[], &TAGS, 1).is_empty());
    }

    #[test]
    fn test_orphaned_public_ip_attaches_to_my_nic() {
        let nics = vec![
            nic("ext0", vec![config("self", "10.0.1.4", true), config("vip", "10.0.1.10", false)]),
            nic("ext1", vec![config("self", "10.0.1.5", true)]),
        ];
        let addresses = NicAddressSets {
            local: set(&["10.0.1.4"]),
            active: set(&["10.0.1.10", "10.0.1.12"]),
            inactive: BTreeSet::new(),
        };
        let tagged = |name: &str, private: &str| PublicIpDescriptor {
            id: format!("/publicIPAddresses/{}", name),
            name: name.to_string(),
            resource_group: "rg".to_string(),
            ip_address: Some("52.0.0.1".to_string()),
            ip_configuration_id: None,
            tags: [
                ("f5_privateIp".to_string(), private.to_string()),
                ("f5_extSubnetId".to_string(), "/subnets/ext".to_string()),
            ]
            .into_iter()
            .collect(),
        };
        let public_ips = vec![tagged("pip-a", "10.0.1.10"), tagged("pip-b", "10.0.1.12")];

        let plan = plan_nics(&nics, &addresses, &public_ips, &TAGS, 1);
        assert!(plan.disassociate.is_empty());
        assert_eq!(plan.associate.len(), 1);

        let configs = &plan.associate[0].update.ip_configurations;
        assert_eq!(configs.len(), 3);
        assert_eq!(configs[1].public_ip_id.as_deref(), Some("/publicIPAddresses/pip-a"));
        assert_eq!(configs[2].private_ip, "10.0.1.12");
        assert_eq!(configs[2].name, "pip-b-ipconfig");
    }
}
