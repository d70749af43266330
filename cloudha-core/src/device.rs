//! Device REST API collaborator and the device state the engine reads from it

use crate::config::DeviceConfig;
use crate::error::{FailoverError, FailoverResult};
use crate::ip::bare_address;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, trace};

pub const GLOBAL_SETTINGS_PATH: &str = "/tm/sys/global-settings";
pub const TRAFFIC_GROUP_STATS_PATH: &str = "/tm/cm/traffic-group/stats";
pub const SELF_IPS_PATH: &str = "/tm/net/self";
pub const VIRTUAL_ADDRESSES_PATH: &str = "/tm/ltm/virtual-address";

/// Read-only access to a device's configuration tree
#[async_trait]
pub trait DeviceClient: Send + Sync {
    async fn list(&self, host: &str, path: &str) -> FailoverResult<Value>;
}

/// `DeviceClient` over the device's HTTPS management API
pub struct RestDeviceClient {
    client: reqwest::Client,
    port: u16,
    username: String,
    password: Option<String>,
    timeout: Duration,
}

impl RestDeviceClient {
    pub fn new(config: &DeviceConfig) -> FailoverResult<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| FailoverError::configuration("device", format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            port: config.port,
            username: config.username.clone(),
            password: config.password.clone(),
            timeout: config.request_timeout,
        })
    }
}

#[async_trait]
impl DeviceClient for RestDeviceClient {
    async fn list(&self, host: &str, path: &str) -> FailoverResult<Value> {
        let url = format!("https://{}:{}/mgmt{}", host, self.port, path);
        trace!(url = %url, "device GET");

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, self.password.as_ref())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FailoverError::Timeout {
                        operation: format!("GET {}", url),
                        duration: self.timeout,
                    }
                } else {
                    FailoverError::device(host, path, e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FailoverError::device(host, path, format!("HTTP {}", status)));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| FailoverError::device(host, path, format!("invalid body: {}", e)))
    }
}

/// Read a device's configured hostname
pub async fn fetch_hostname(client: &dyn DeviceClient, host: &str) -> FailoverResult<String> {
    let settings = client.list(host, GLOBAL_SETTINGS_PATH).await?;
    settings
        .get("hostname")
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| FailoverError::device(host, GLOBAL_SETTINGS_PATH, "response has no hostname"))
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfIp {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub floating: Option<String>,
    #[serde(default)]
    pub traffic_group: Option<String>,
}

impl SelfIp {
    pub fn is_floating(&self) -> bool {
        self.floating.as_deref() == Some("enabled")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualAddress {
    pub address: String,
    #[serde(default)]
    pub traffic_group: Option<String>,
}

#[derive(Deserialize)]
struct Items<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

/// Everything the reconciliation engine needs to know about the local device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceState {
    pub hostname: String,
    /// Traffic groups currently active on this device
    pub active_groups: BTreeSet<String>,
    pub self_ips: Vec<SelfIp>,
    pub virtual_addresses: Vec<VirtualAddress>,
}

impl DeviceState {
    pub async fn fetch(client: &dyn DeviceClient, host: &str) -> FailoverResult<Self> {
        let (settings, stats, selfs, virtuals) = tokio::try_join!(
            client.list(host, GLOBAL_SETTINGS_PATH),
            client.list(host, TRAFFIC_GROUP_STATS_PATH),
            client.list(host, SELF_IPS_PATH),
            client.list(host, VIRTUAL_ADDRESSES_PATH),
        )?;

        let hostname = settings
            .get("hostname")
            .and_then(Value::as_str)
            .ok_or_else(|| FailoverError::device(host, GLOBAL_SETTINGS_PATH, "response has no hostname"))?
            .to_string();
        let active_groups = parse_active_groups(&stats, &hostname);
        let self_ips = serde_json::from_value::<Items<SelfIp>>(selfs)?.items;
        let virtual_addresses = serde_json::from_value::<Items<VirtualAddress>>(virtuals)?.items;

        debug!(
            hostname = %hostname,
            active_groups = ?active_groups,
            self_ips = self_ips.len(),
            virtual_addresses = virtual_addresses.len(),
            "fetched device state"
        );

        Ok(Self {
            hostname,
            active_groups,
            self_ips,
            virtual_addresses,
        })
    }

    /// Non-floating self-IP addresses; these identify this device's own NICs
    pub fn local_addresses(&self) -> BTreeSet<String> {
        self.self_ips
            .iter()
            .filter(|s| !s.is_floating())
            .map(|s| bare_address(&s.address).to_string())
            .collect()
    }

    /// Floating addresses owned by groups that are (or are not) active here
    pub fn floating_addresses(&self, active: bool) -> BTreeSet<String> {
        let owned = |group: &Option<String>| {
            group
                .as_deref()
                .map(|g| self.active_groups.contains(g) == active)
                .unwrap_or(false)
        };
        let floating_selfs = self
            .self_ips
            .iter()
            .filter(|s| s.is_floating() && owned(&s.traffic_group))
            .map(|s| bare_address(&s.address).to_string());
        let virtuals = self
            .virtual_addresses
            .iter()
            .filter(|v| owned(&v.traffic_group))
            .map(|v| bare_address(&v.address).to_string());
        floating_selfs.chain(virtuals).collect()
    }

    /// Address routes should point at: the named self-IP, else the first local one by name
    pub fn next_hop(&self, self_ip_name: Option<&str>) -> Option<String> {
        let mut candidates: Vec<&SelfIp> = self.self_ips.iter().filter(|s| !s.is_floating()).collect();
        candidates.sort_by(|a, b| a.name.cmp(&b.name));
        let chosen = match self_ip_name {
            Some(name) => candidates
                .into_iter()
                .find(|s| s.name == name || s.name.ends_with(&format!("/{}", name))),
            None => candidates.into_iter().next(),
        };
        chosen.map(|s| bare_address(&s.address).to_string())
    }
}

/// Collect traffic groups whose stats entry for this device reports `active`
fn parse_active_groups(stats: &Value, hostname: &str) -> BTreeSet<String> {
    let mut groups = BTreeSet::new();
    let Some(entries) = stats.get("entries").and_then(Value::as_object) else {
        return groups;
    };

    for entry in entries.values() {
        let Some(nested) = entry.pointer("/nestedStats/entries") else {
            continue;
        };
        let field = |name: &str| {
            nested
                .get(name)
                .and_then(|f| f.get("description"))
                .and_then(Value::as_str)
        };
        let (Some(device), Some(state), Some(group)) =
            (field("deviceName"), field("failoverState"), field("trafficGroup"))
        else {
            continue;
        };
        let device_short = device.rsplit('/').next().unwrap_or(device);
        if device_short == hostname && state == "active" {
            groups.insert(group.to_string());
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stats_entry(device: &str, group: &str, state: &str) -> Value {
        json!({ "nestedStats": { "entries": {
            "deviceName": { "description": device },
            "failoverState": { "description": state },
            "trafficGroup": { "description": group },
        }}})
    }

    #[test]
    fn test_parse_active_groups() {
        let stats = json!({ "entries": {
            "a": stats_entry("/Common/bigip1", "/Common/traffic-group-1", "active"),
            "b": stats_entry("/Common/bigip1", "/Common/traffic-group-2", "standby"),
            "c": stats_entry("/Common/bigip2", "/Common/traffic-group-2", "active"),
        }});
        let groups = parse_active_groups(&stats, "bigip1");
        assert_eq!(groups.into_iter().collect::<Vec<_>>(), vec!["/Common/traffic-group-1"]);
    }

    #[test]
    fn test_address_classification() {
        let state = DeviceState {
            hostname: "bigip1".to_string(),
            active_groups: ["/Common/tg-1".to_string()].into_iter().collect(),
            self_ips: vec![
                SelfIp {
                    name: "/Common/ext-self".to_string(),
                    address: "10.0.1.4/24".to_string(),
                    floating: Some("disabled".to_string()),
                    traffic_group: Some("/Common/traffic-group-local-only".to_string()),
                },
                SelfIp {
                    name: "/Common/ext-float".to_string(),
                    address: "10.0.1.20/24".to_string(),
                    floating: Some("enabled".to_string()),
                    traffic_group: Some("/Common/tg-1".to_string()),
                },
            ],
            virtual_addresses: vec![
                VirtualAddress {
                    address: "10.0.1.10".to_string(),
                    traffic_group: Some("/Common/tg-1".to_string()),
                },
                VirtualAddress {
                    address: "10.0.1.11".to_string(),
                    traffic_group: Some("/Common/tg-2".to_string()),
                },
            ],
        };

        assert_eq!(state.local_addresses().into_iter().collect::<Vec<_>>(), vec!["10.0.1.4"]);
        assert_eq!(
            state.floating_addresses(true).into_iter().collect::<Vec<_>>(),
            vec!["10.0.1.10", "10.0.1.20"]
        );
        assert_eq!(
            state.floating_addresses(false).into_iter().collect::<Vec<_>>(),
            vec!["10.0.1.11"]
        );
        assert_eq!(state.next_hop(None).as_deref(), Some("10.0.1.4"));
        assert_eq!(state.next_hop(Some("ext-self")).as_deref(), Some("10.0.1.4"));
        assert_eq!(state.next_hop(Some("nope")), None);
    }
}
