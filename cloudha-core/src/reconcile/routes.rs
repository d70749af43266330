//! Route next-hop planning

use crate::cloud::{RouteParams, RouteTableDescriptor, NEXT_HOP_VIRTUAL_APPLIANCE};
use crate::types::RouteUpdate;
use ipnet::IpNet;
use std::collections::BTreeSet;
use tracing::{debug, trace};

/// Whether a route table's group tag names one of the active groups
///
/// The tag may list several groups separated by commas, either by full path
/// (`/Common/traffic-group-1`) or by short name.
pub fn tag_matches_groups(tag_value: &str, active_groups: &BTreeSet<String>) -> bool {
    tag_value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .any(|wanted| {
            active_groups
                .iter()
                .any(|group| group == wanted || group.rsplit('/').next() == Some(wanted))
        })
}

fn prefix_is_managed(prefix: &str, managed: &[IpNet]) -> bool {
    match prefix.parse::<IpNet>() {
        Ok(net) => managed.iter().any(|m| m.trunc() == net.trunc()),
        Err(_) => false,
    }
}

/// Routes in group-owned tables whose next hop must move to `next_hop`
///
/// Routes already pointing at `next_hop` are left alone.
pub fn plan_routes(
    tables: &[RouteTableDescriptor],
    active_groups: &BTreeSet<String>,
    managed_routes: &[IpNet],
    group_tag: &str,
    next_hop: &str,
) -> Vec<RouteUpdate> {
    let mut updates = Vec::new();

    for table in tables {
        let Some(tag_value) = table.tags.get(group_tag) else {
            trace!(route_table = %table.name, "route table has no group tag");
            continue;
        };
        if !tag_matches_groups(tag_value, active_groups) {
            debug!(route_table = %table.name, tag = %tag_value, "route table owned by an inactive group");
            continue;
        }

        for route in &table.routes {
            if !prefix_is_managed(&route.address_prefix, managed_routes) {
                continue;
            }
            let current = route.next_hop_ip.as_deref();
            if current == Some(next_hop) && route.next_hop_type == NEXT_HOP_VIRTUAL_APPLIANCE {
                trace!(route = %route.name, "route already points here");
                continue;
            }
            debug!(
                route_table = %table.name,
                route = %route.name,
                from = ?current,
                to = next_hop,
                "route needs new next hop"
            );
            updates.push(RouteUpdate {
                resource_group: table.resource_group.clone(),
                route_table: table.name.clone(),
                route_name: route.name.clone(),
                params: RouteParams {
                    address_prefix: route.address_prefix.clone(),
                    next_hop_type: NEXT_HOP_VIRTUAL_APPLIANCE.to_string(),
                    next_hop_ip_address: next_hop.to_string(),
                },
            });
        }
    }

    updates
}
