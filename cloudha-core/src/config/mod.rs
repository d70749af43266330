//! Configuration for the failover engine
//!
//! Loaded from a TOML file, then overridden from `CLOUDHA_*` environment
//! variables, then validated. A config that fails validation is a
//! [`FailoverError::ConfigurationError`] and aborts before any cloud call.

use crate::error::{FailoverError, FailoverResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod defaults;

pub use defaults::*;

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverConfig {
    pub cloud: CloudConfig,
    pub device: DeviceConfig,
    pub registry: RegistryConfig,
    pub election: ElectionConfig,
    pub reconcile: ReconcileConfig,
    pub lock: LockConfig,
    pub status: StatusConfig,
    pub logging: LoggingConfig,
}

/// Cloud account and scope the cluster lives in
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    pub subscription_id: String,
    pub resource_group: String,
    /// Scale set holding the managed instances, if any
    pub scale_set: Option<String>,
    /// Bearer token for the management API
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    pub management_endpoint: String,
}

/// Device REST API access
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub local_host: String,
    pub port: u16,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub hostname_retries: u32,
    #[serde(with = "humantime_serde")]
    pub hostname_retry_interval: Duration,
    pub accept_invalid_certs: bool,
}

/// Durable instance registry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub path: PathBuf,
    /// Registry-only primaries older than this are treated as gone
    #[serde(with = "humantime_serde")]
    pub primary_stale_after: Duration,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionConfig {
    /// `key=value` tag selecting instances outside the managed group
    pub external_tag: Option<String>,
    pub license_pool: bool,
    pub purge_stale: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Route prefixes this cluster is allowed to repoint
    pub managed_routes: Vec<String>,
    pub route_group_tag: String,
    /// Self-IP used as route next hop; first non-floating self-IP when unset
    pub next_hop_self_ip: Option<String>,
    pub nic_suffix_len: usize,
    /// Retries after the first attempt of each NIC or route update
    pub max_retries: u32,
    #[serde(with = "humantime_serde")]
    pub retry_interval: Duration,
    pub public_ip_private_tag: String,
    pub public_ip_subnet_tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub path: PathBuf,
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    #[serde(with = "humantime_serde")]
    pub max_task_duration: Duration,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `info`, `debug` or `silly`
    pub level: String,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            subscription_id: String::new(),
            resource_group: String::new(),
            scale_set: None,
            access_token: None,
            management_endpoint: DEFAULT_MANAGEMENT_ENDPOINT.to_string(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            local_host: DEFAULT_DEVICE_HOST.to_string(),
            port: DEFAULT_DEVICE_PORT,
            username: DEFAULT_DEVICE_USER.to_string(),
            password: None,
            request_timeout: duration_secs(DEFAULT_DEVICE_TIMEOUT_SECS),
            hostname_retries: DEFAULT_HOSTNAME_RETRIES,
            hostname_retry_interval: duration_ms(DEFAULT_HOSTNAME_RETRY_INTERVAL_MS),
            accept_invalid_certs: true,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_REGISTRY_PATH),
            primary_stale_after: duration_secs(DEFAULT_PRIMARY_STALE_AFTER_SECS),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            managed_routes: Vec::new(),
            route_group_tag: DEFAULT_ROUTE_GROUP_TAG.to_string(),
            next_hop_self_ip: None,
            nic_suffix_len: DEFAULT_NIC_SUFFIX_LEN,
            max_retries: DEFAULT_CLOUD_MAX_RETRIES,
            retry_interval: duration_secs(DEFAULT_CLOUD_RETRY_INTERVAL_SECS),
            public_ip_private_tag: DEFAULT_PUBLIC_IP_PRIVATE_TAG.to_string(),
            public_ip_subnet_tag: DEFAULT_PUBLIC_IP_SUBNET_TAG.to_string(),
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_LOCK_PATH),
            max_attempts: DEFAULT_LOCK_MAX_ATTEMPTS,
            interval: duration_ms(DEFAULT_LOCK_INTERVAL_MS),
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            max_task_duration: duration_secs(DEFAULT_MAX_TASK_DURATION_SECS),
            poll_interval: duration_secs(DEFAULT_STATUS_POLL_INTERVAL_SECS),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl ElectionConfig {
    /// Split `external_tag` into its key and value
    pub fn external_tag_pair(&self) -> FailoverResult<Option<(String, String)>> {
        match &self.external_tag {
            None => Ok(None),
            Some(raw) => match raw.split_once('=') {
                Some((key, value)) if !key.is_empty() => {
                    Ok(Some((key.to_string(), value.to_string())))
                }
                _ => Err(FailoverError::configuration(
                    "election.external_tag",
                    format!("expected key=value, got '{}'", raw),
                )),
            },
        }
    }
}

impl FailoverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> FailoverResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            FailoverError::configuration(
                "config_file",
                format!("Failed to read {}: {}", path.as_ref().display(), e),
            )
        })?;

        let mut config: FailoverConfig = toml::from_str(&contents)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `CLOUDHA_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) -> FailoverResult<()> {
        if let Ok(val) = std::env::var("CLOUDHA_SUBSCRIPTION_ID") {
            self.cloud.subscription_id = val;
        }
        if let Ok(val) = std::env::var("CLOUDHA_RESOURCE_GROUP") {
            self.cloud.resource_group = val;
        }
        if let Ok(val) = std::env::var("CLOUDHA_SCALE_SET") {
            self.cloud.scale_set = Some(val);
        }
        if let Ok(val) = std::env::var("CLOUDHA_ACCESS_TOKEN") {
            self.cloud.access_token = Some(val);
        }
        if let Ok(val) = std::env::var("CLOUDHA_DEVICE_PASSWORD") {
            self.device.password = Some(val);
        }
        if let Ok(val) = std::env::var("CLOUDHA_REGISTRY_PATH") {
            self.registry.path = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("CLOUDHA_LOCK_PATH") {
            self.lock.path = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("CLOUDHA_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("CLOUDHA_MANAGED_ROUTES") {
            self.reconcile.managed_routes = val
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(val) = std::env::var("CLOUDHA_MAX_TASK_DURATION_SECS") {
            let secs: u64 = val.parse().map_err(|_| {
                FailoverError::configuration("status.max_task_duration", "Invalid CLOUDHA_MAX_TASK_DURATION_SECS")
            })?;
            self.status.max_task_duration = Duration::from_secs(secs);
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> FailoverResult<()> {
        if self.cloud.resource_group.is_empty() {
            return Err(FailoverError::configuration(
                "cloud.resource_group",
                "must not be empty",
            ));
        }
        if self.cloud.subscription_id.is_empty() {
            return Err(FailoverError::configuration(
                "cloud.subscription_id",
                "must not be empty",
            ));
        }
        for route in &self.reconcile.managed_routes {
            route.parse::<ipnet::IpNet>().map_err(|e| {
                FailoverError::configuration(
                    "reconcile.managed_routes",
                    format!("'{}' is not a CIDR prefix: {}", route, e),
                )
            })?;
        }
        if self.lock.max_attempts == 0 {
            return Err(FailoverError::configuration(
                "lock.max_attempts",
                "must be at least 1",
            ));
        }
        if self.status.poll_interval.is_zero() || self.status.max_task_duration.is_zero() {
            return Err(FailoverError::configuration(
                "status",
                "poll_interval and max_task_duration must be non-zero",
            ));
        }
        if !matches!(self.logging.level.as_str(), "info" | "debug" | "silly" | "warn" | "error") {
            return Err(FailoverError::configuration(
                "logging.level",
                format!("unknown level '{}'", self.logging.level),
            ));
        }
        self.election.external_tag_pair()?;
        Ok(())
    }

    /// Minimal valid configuration for tests
    pub fn test() -> Self {
        let mut config = Self::default();
        config.cloud.subscription_id = "sub-test".to_string();
        config.cloud.resource_group = "rg-test".to_string();
        config.cloud.scale_set = Some("ss-test".to_string());
        config.reconcile.retry_interval = Duration::from_millis(1);
        config.lock.interval = Duration::from_millis(1);
        config.status.poll_interval = Duration::from_secs(1);
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_needs_scope() {
        let config = FailoverConfig::default();
        assert!(matches!(
            config.validate(),
            Err(FailoverError::ConfigurationError { .. })
        ));
        assert!(FailoverConfig::test().validate().is_ok());
    }

    #[test]
    fn test_parse_toml_with_durations() {
        let raw = r#"
            [cloud]
            subscription_id = "sub-1"
            resource_group = "rg-1"

            [reconcile]
            managed_routes = ["192.168.1.0/24", "10.10.0.0/16"]
            retry_interval = "2s"

            [status]
            max_task_duration = "5m"
        "#;
        let config: FailoverConfig = toml::from_str(raw).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.reconcile.retry_interval, Duration::from_secs(2));
        assert_eq!(config.status.max_task_duration, Duration::from_secs(300));
        assert_eq!(config.reconcile.route_group_tag, DEFAULT_ROUTE_GROUP_TAG);
    }

    #[test]
    fn test_rejects_bad_route_prefix() {
        let mut config = FailoverConfig::test();
        config.reconcile.managed_routes = vec!["not-a-route".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_external_tag_pair() {
        let mut election = ElectionConfig::default();
        assert_eq!(election.external_tag_pair().unwrap(), None);

        election.external_tag = Some("cluster=blue".to_string());
        assert_eq!(
            election.external_tag_pair().unwrap(),
            Some(("cluster".to_string(), "blue".to_string()))
        );

        election.external_tag = Some("novalue".to_string());
        assert!(election.external_tag_pair().is_err());
    }
}
