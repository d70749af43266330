//! Persisted failover run record
//!
//! The record is cooperative: every write is a plain read-modify-write. A
//! run that loses a race is superseded by the next one, which re-derives and
//! re-persists the full desired state before mutating anything.

use crate::clock::Clock;
use crate::config::StatusConfig;
use crate::error::{FailoverError, FailoverResult};
use crate::patterns::poll::{poll_until, PollConfig, PollLimit, PollOutcome};
use crate::storage::Registry;
use crate::types::{FailoverRunRecord, NetworkMutationPlan, RunStatus, FAILOVER_NAMESPACE, FAILOVER_STATE_KEY};
use tracing::{debug, info, warn};

/// How the next run should obtain its NIC mutations
#[derive(Debug, Clone, PartialEq)]
pub enum RunMode {
    /// Compute the plan from live state
    Normal,
    /// Replay the plan a previous run persisted but may not have finished
    Recovery(NetworkMutationPlan),
}

pub struct RunStatusStore<'a> {
    registry: &'a dyn Registry,
}

impl<'a> RunStatusStore<'a> {
    pub fn new(registry: &'a dyn Registry) -> Self {
        Self { registry }
    }

    /// Current record; a deployment that never ran reads as settled
    pub async fn load(&self) -> FailoverResult<FailoverRunRecord> {
        match self.registry.get(FAILOVER_NAMESPACE, FAILOVER_STATE_KEY).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(FailoverRunRecord::default()),
        }
    }

    pub async fn save(&self, record: &FailoverRunRecord) -> FailoverResult<()> {
        let value = serde_json::to_value(record)?;
        self.registry
            .put(FAILOVER_NAMESPACE, FAILOVER_STATE_KEY, &value)
            .await?;
        debug!(status = %record.status, "persisted run record");
        Ok(())
    }

    /// Wait until no other run is in flight and decide how to proceed
    ///
    /// A RUNNING record is polled until it settles or ages past
    /// `max_task_duration`. FAILED, or too old, means recovery.
    pub async fn wait_for_settled(&self, clock: &dyn Clock, config: &StatusConfig) -> FailoverResult<RunMode> {
        let record = self.load().await?;
        if !record.is_unsettled() {
            return Ok(RunMode::Normal);
        }

        let age = record.age(clock.now());
        if age >= config.max_task_duration {
            info!(status = %record.status, age = ?age, "previous run is stale, recovering");
            return Ok(recovery_mode(record));
        }

        info!(status = %record.status, "previous run still in flight, waiting");
        let poll = PollConfig {
            interval: config.poll_interval,
            limit: PollLimit::MaxAge {
                since: record.time_stamp,
                max_age: config.max_task_duration,
            },
        };
        let outcome = poll_until(clock, poll, |_| async {
            let current = self.load().await?;
            Ok::<_, FailoverError>(match current.status {
                RunStatus::Succeeded => Some(RunMode::Normal),
                RunStatus::Failed => Some(recovery_mode(current)),
                RunStatus::Running => None,
            })
        })
        .await?;

        match outcome {
            PollOutcome::Ready(mode) => Ok(mode),
            PollOutcome::Exhausted { attempts } => {
                warn!(attempts, "previous run never settled, recovering");
                Ok(recovery_mode(self.load().await?))
            }
        }
    }
}

fn recovery_mode(record: FailoverRunRecord) -> RunMode {
    match record.desired_configuration {
        Some(plan) if !plan.is_empty() => RunMode::Recovery(plan),
        _ => {
            debug!("nothing persisted to replay, recomputing");
            RunMode::Normal
        }
    }
}
