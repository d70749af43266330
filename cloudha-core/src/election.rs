//! Primary election
//!
//! A pure function over the unified instance map. Ordering never depends on
//! map iteration: every tie-break falls through to a total order on ids.

use crate::error::{FailoverError, FailoverResult};
use crate::types::{compare_by_private_ip, compare_instance_ids, InstanceMap, InstanceRecord};
use tracing::{debug, info};

/// Pick the primary among eligible instances
///
/// External candidates win outright, lowest private IP first. Otherwise
/// the lowest instance id wins, unless it has never completed a config
/// sync while some other candidate has; then the lowest-IP candidate with a
/// running config takes over.
pub fn elect_primary(instances: &InstanceMap) -> FailoverResult<String> {
    if instances.is_empty() {
        return Err(FailoverError::NoInstances);
    }

    let candidates: Vec<&InstanceRecord> = instances.values().filter(|r| r.is_eligible()).collect();
    debug!(
        total = instances.len(),
        eligible = candidates.len(),
        "filtered election candidates"
    );

    let tentative = candidates
        .iter()
        .filter(|r| r.external)
        .min_by(|a, b| compare_by_private_ip(a, b))
        .or_else(|| {
            candidates
                .iter()
                .min_by(|a, b| compare_instance_ids(&a.instance_id, &b.instance_id))
        })
        .copied()
        .ok_or(FailoverError::NoEligiblePrimary {
            candidates: instances.len(),
        })?;

    let winner = if tentative.has_running_config() {
        tentative
    } else {
        match candidates
            .iter()
            .filter(|r| r.has_running_config())
            .min_by(|a, b| compare_by_private_ip(a, b))
        {
            Some(configured) => {
                debug!(
                    tentative = %tentative.instance_id,
                    override_with = %configured.instance_id,
                    "tentative primary has no running config"
                );
                *configured
            }
            None => tentative,
        }
    };

    info!(instance_id = %winner.instance_id, "elected primary");
    Ok(winner.instance_id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn eligible(id: &str, ip: &str) -> InstanceRecord {
        InstanceRecord {
            instance_id: id.to_string(),
            private_ip: ip.to_string(),
            mgmt_ip: ip.to_string(),
            provider_visible: true,
            version_ok: true,
            ..Default::default()
        }
    }

    fn map(records: Vec<InstanceRecord>) -> InstanceMap {
        records.into_iter().map(|r| (r.instance_id.clone(), r)).collect()
    }

    #[test]
    fn test_empty_map() {
        assert!(matches!(elect_primary(&InstanceMap::new()), Err(FailoverError::NoInstances)));
    }

    #[test]
    fn test_lowest_id_numeric() {
        let instances = map(vec![eligible("10", "10.0.0.4"), eligible("9", "10.0.0.5")]);
        assert_eq!(elect_primary(&instances).unwrap(), "9");
    }

    #[test]
    fn test_version_gate() {
        let mut old = eligible("1", "10.0.0.4");
        old.version_ok = false;
        let instances = map(vec![old, eligible("2", "10.0.0.5")]);
        assert_eq!(elect_primary(&instances).unwrap(), "2");
    }

    #[test]
    fn test_external_lowest_ip_numeric() {
        let mut a = eligible("ext-a", "10.0.0.10");
        a.external = true;
        let mut b = eligible("ext-b", "10.0.0.9");
        b.external = true;
        let instances = map(vec![a, b, eligible("0", "10.0.0.1")]);
        assert_eq!(elect_primary(&instances).unwrap(), "ext-b");
    }

    #[test]
    fn test_override_uses_lowest_ip_of_configured() {
        let mut b = eligible("2", "10.0.0.20");
        b.last_backup = Utc::now();
        let mut c = eligible("3", "10.0.0.3");
        c.last_backup = Utc::now();
        let instances = map(vec![eligible("1", "10.0.0.1"), b, c]);
        assert_eq!(elect_primary(&instances).unwrap(), "3");
    }
}
