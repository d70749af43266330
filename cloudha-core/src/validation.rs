//! Primary validation against live device identity

use crate::device::{fetch_hostname, DeviceClient};
use crate::error::FailoverResult;
use crate::types::InstanceMap;
use tracing::{debug, warn};

/// Whether `instance_id`'s live hostname matches the one on record
///
/// A missing instance, or one with no recorded hostname, is not valid.
/// Errors reaching the device propagate to the caller.
pub async fn is_valid_primary(
    device: &dyn DeviceClient,
    instance_id: &str,
    instances: &InstanceMap,
) -> FailoverResult<bool> {
    let Some(record) = instances.get(instance_id) else {
        debug!(instance_id, "candidate not in instance map");
        return Ok(false);
    };
    let Some(recorded) = record.hostname.as_deref() else {
        debug!(instance_id, "candidate has no recorded hostname");
        return Ok(false);
    };

    let live = fetch_hostname(device, &record.mgmt_ip).await?;
    let valid = live == recorded;
    if !valid {
        warn!(
            instance_id,
            recorded,
            live = %live,
            "live hostname does not match record"
        );
    }
    Ok(valid)
}
