//! Default configuration values
//!
//! Centralized so operators can find every tunable in one place.

use std::time::Duration;

// Cloud defaults
pub const DEFAULT_MANAGEMENT_ENDPOINT: &str = "https://management.azure.com";

// Device defaults
pub const DEFAULT_DEVICE_HOST: &str = "localhost";
pub const DEFAULT_DEVICE_PORT: u16 = 443;
pub const DEFAULT_DEVICE_USER: &str = "admin";
pub const DEFAULT_DEVICE_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_HOSTNAME_RETRIES: u32 = 2;
pub const DEFAULT_HOSTNAME_RETRY_INTERVAL_MS: u64 = 500;

// Registry defaults
pub const DEFAULT_REGISTRY_PATH: &str = "/var/lib/cloudha/registry.redb";
pub const DEFAULT_PRIMARY_STALE_AFTER_SECS: u64 = 600; // 10 minutes

// Reconciliation defaults
pub const DEFAULT_ROUTE_GROUP_TAG: &str = "f5_ha";
pub const DEFAULT_NIC_SUFFIX_LEN: usize = 1;
pub const DEFAULT_CLOUD_MAX_RETRIES: u32 = 20;
pub const DEFAULT_CLOUD_RETRY_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_PUBLIC_IP_PRIVATE_TAG: &str = "f5_privateIp";
pub const DEFAULT_PUBLIC_IP_SUBNET_TAG: &str = "f5_extSubnetId";

// Lock defaults
pub const DEFAULT_LOCK_PATH: &str = "/var/run/cloudha/failover.lock";
pub const DEFAULT_LOCK_MAX_ATTEMPTS: u32 = 30;
pub const DEFAULT_LOCK_INTERVAL_MS: u64 = 1000;

// Run status defaults
pub const DEFAULT_MAX_TASK_DURATION_SECS: u64 = 600; // 10 minutes
pub const DEFAULT_STATUS_POLL_INTERVAL_SECS: u64 = 5;

// Logging defaults
pub const DEFAULT_LOG_LEVEL: &str = "info";

pub const fn duration_ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

pub const fn duration_secs(secs: u64) -> Duration {
    Duration::from_secs(secs)
}
