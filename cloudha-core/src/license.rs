//! License-pool revocation for purged instances

use crate::error::FailoverResult;
use crate::types::InstanceRecord;
use async_trait::async_trait;
use tracing::debug;

#[async_trait]
pub trait LicenseRevoker: Send + Sync {
    /// Return the licenses held by instances that left the cluster
    async fn revoke(&self, instances: &[InstanceRecord]) -> FailoverResult<()>;
}

/// Revoker for deployments that do not license from a pool
#[derive(Debug, Default)]
pub struct NoopLicenseRevoker;

#[async_trait]
impl LicenseRevoker for NoopLicenseRevoker {
    async fn revoke(&self, instances: &[InstanceRecord]) -> FailoverResult<()> {
        debug!(count = instances.len(), "license pool disabled, nothing to revoke");
        Ok(())
    }
}
