//! Explicit collaborator wiring
//!
//! Every component reads its collaborators from a [`ProviderContext`]
//! built once at startup.

use crate::clock::{Clock, SystemClock};
use crate::cloud::{ArmCloudInventory, CloudInventory, ResourceScope};
use crate::config::FailoverConfig;
use crate::device::{DeviceClient, RestDeviceClient};
use crate::error::FailoverResult;
use crate::license::{LicenseRevoker, NoopLicenseRevoker};
use crate::storage::{RedbRegistry, Registry};
use std::sync::Arc;

#[derive(Clone)]
pub struct ProviderContext {
    pub config: FailoverConfig,
    pub cloud: Arc<dyn CloudInventory>,
    pub registry: Arc<dyn Registry>,
    pub device: Arc<dyn DeviceClient>,
    pub licenses: Arc<dyn LicenseRevoker>,
    pub clock: Arc<dyn Clock>,
}

impl ProviderContext {
    pub fn new(
        config: FailoverConfig,
        cloud: Arc<dyn CloudInventory>,
        registry: Arc<dyn Registry>,
        device: Arc<dyn DeviceClient>,
    ) -> Self {
        Self {
            config,
            cloud,
            registry,
            device,
            licenses: Arc::new(NoopLicenseRevoker),
            clock: Arc::new(SystemClock::new()),
        }
    }

    /// Wire the REST adapters and the on-disk registry named by `config`
    pub fn from_config(config: FailoverConfig) -> FailoverResult<Self> {
        config.validate()?;
        let cloud = Arc::new(ArmCloudInventory::new(&config.cloud)?);
        let registry = Arc::new(RedbRegistry::open(&config.registry.path)?);
        let device = Arc::new(RestDeviceClient::new(&config.device)?);
        Ok(Self::new(config, cloud, registry, device))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_license_revoker(mut self, licenses: Arc<dyn LicenseRevoker>) -> Self {
        self.licenses = licenses;
        self
    }

    /// Scope holding the managed instances
    pub fn instance_scope(&self) -> ResourceScope {
        ResourceScope::new(&self.config.cloud.resource_group, self.config.cloud.scale_set.clone())
    }

    /// Scope holding NICs, public IPs and route tables
    pub fn network_scope(&self) -> ResourceScope {
        ResourceScope::new(&self.config.cloud.resource_group, None)
    }
}
