//! Failover state machine
//!
//! One run moves through
//! `Idle -> AcquiringLock -> LoadingStatus -> (Recovering | Running) -> (Succeeded | Failed)`.
//! A lock timeout aborts before any cloud or device call. Once this run has
//! written RUNNING, any error ends it as FAILED in the persisted record. An
//! error before that leaves the record as another run wrote it.

use crate::context::ProviderContext;
use crate::device::DeviceState;
use crate::error::FailoverResult;
use crate::lock::LocalLock;
use crate::observability::failover_span;
use crate::reconcile::{reconcile, CloudNetwork, NetworkApplier, ReconcilePlan};
use crate::run_status::{RunMode, RunStatusStore};
use crate::types::{FailoverRunRecord, NetworkMutationPlan, RunStatus};
use std::fmt;
use tracing::{debug, error, info, warn, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverPhase {
    Idle,
    AcquiringLock,
    LoadingStatus,
    Recovering,
    Running,
    Succeeded,
    Failed,
}

impl fmt::Display for FailoverPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailoverPhase::Idle => "IDLE",
            FailoverPhase::AcquiringLock => "ACQUIRING_LOCK",
            FailoverPhase::LoadingStatus => "LOADING_STATUS",
            FailoverPhase::Recovering => "RECOVERING",
            FailoverPhase::Running => "RUNNING",
            FailoverPhase::Succeeded => "SUCCEEDED",
            FailoverPhase::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// What a finished run changed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FailoverReport {
    /// The NIC plan was replayed from a previous run
    pub recovered: bool,
    pub plan: ReconcilePlan,
}

pub struct FailoverStateMachine<'a> {
    ctx: &'a ProviderContext,
    phase: FailoverPhase,
    history: Vec<FailoverPhase>,
    record: FailoverRunRecord,
    /// Set once RUNNING from this run is persisted
    owns_record: bool,
}

impl<'a> FailoverStateMachine<'a> {
    pub fn new(ctx: &'a ProviderContext) -> Self {
        Self {
            ctx,
            phase: FailoverPhase::Idle,
            history: vec![FailoverPhase::Idle],
            record: FailoverRunRecord::default(),
            owns_record: false,
        }
    }

    pub fn phase(&self) -> FailoverPhase {
        self.phase
    }

    /// Every phase this machine has entered, in order
    pub fn history(&self) -> &[FailoverPhase] {
        &self.history
    }

    fn transition(&mut self, next: FailoverPhase) {
        info!(from = %self.phase, to = %next, "failover phase");
        self.phase = next;
        self.history.push(next);
    }

    /// Drive one failover run to a terminal phase
    pub async fn run(&mut self) -> FailoverResult<FailoverReport> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let span = failover_span(&run_id);
        self.run_inner().instrument(span).await
    }

    async fn run_inner(&mut self) -> FailoverResult<FailoverReport> {
        self.transition(FailoverPhase::AcquiringLock);
        let mut lock = match LocalLock::acquire(&self.ctx.config.lock, self.ctx.clock.as_ref()).await {
            Ok(lock) => lock,
            Err(e) => {
                self.transition(FailoverPhase::Failed);
                return Err(e);
            }
        };

        let result = self.run_locked(&mut lock).await;

        if let Err(e) = lock.release().await {
            warn!("failed to remove lock marker: {}", e);
        }

        match result {
            Ok(report) => {
                self.transition(FailoverPhase::Succeeded);
                Ok(report)
            }
            Err(e) => {
                error!("failover run failed: {}", e);
                if self.owns_record {
                    self.record.status = RunStatus::Failed;
                    self.record.time_stamp = self.ctx.clock.now();
                    if let Err(persist) = self.store().save(&self.record).await {
                        error!("could not persist FAILED status: {}", persist);
                    }
                }
                self.transition(FailoverPhase::Failed);
                Err(e)
            }
        }
    }

    fn store(&self) -> RunStatusStore<'a> {
        RunStatusStore::new(self.ctx.registry.as_ref())
    }

    async fn run_locked(&mut self, lock: &mut LocalLock) -> FailoverResult<FailoverReport> {
        self.transition(FailoverPhase::LoadingStatus);
        let store = self.store();
        let mode = store
            .wait_for_settled(self.ctx.clock.as_ref(), &self.ctx.config.status)
            .await?;
        self.record = store.load().await?;

        let replay = match mode {
            RunMode::Recovery(plan) => {
                self.transition(FailoverPhase::Recovering);
                info!(
                    disassociate = plan.disassociate.len(),
                    associate = plan.associate.len(),
                    "replaying persisted NIC plan"
                );
                self.record.desired_configuration = Some(plan.clone());
                Some(plan)
            }
            RunMode::Normal => {
                self.transition(FailoverPhase::Running);
                // a failure before planning leaves nothing to replay
                self.record.desired_configuration = None;
                None
            }
        };

        self.record.status = RunStatus::Running;
        self.record.time_stamp = self.ctx.clock.now();
        store.save(&self.record).await?;
        self.owns_record = true;
        lock.release().await?;

        let plan = self.compute_plan(replay.clone()).await?;
        let recovered = replay.is_some();

        self.record.desired_configuration = Some(plan.nics.clone());
        store.save(&self.record).await?;

        NetworkApplier::new(
            self.ctx.cloud.as_ref(),
            self.ctx.clock.as_ref(),
            &self.ctx.config.reconcile,
        )
            .apply(&plan)
            .await?;

        self.record.status = RunStatus::Succeeded;
        store.save(&self.record).await?;
        info!(recovered, routes = plan.routes.len(), "failover run complete");

        Ok(FailoverReport { recovered, plan })
    }

    /// Routes always come from live state; NICs come from `replay` when present
    async fn compute_plan(
        &self,
        replay: Option<NetworkMutationPlan>,
    ) -> FailoverResult<ReconcilePlan> {
        let ctx = self.ctx;
        let scope = ctx.network_scope();
        let (device, route_tables, nics, public_ips) = tokio::try_join!(
            DeviceState::fetch(ctx.device.as_ref(), &ctx.config.device.local_host),
            ctx.cloud.list_route_tables(),
            ctx.cloud.list_nics(&scope),
            ctx.cloud.list_public_ips(&scope),
        )?;
        debug!(
            route_tables = route_tables.len(),
            nics = nics.len(),
            public_ips = public_ips.len(),
            "fetched cloud network state"
        );

        let next_hop = device.next_hop(ctx.config.reconcile.next_hop_self_ip.as_deref());
        let network = CloudNetwork {
            nics,
            route_tables,
            public_ips,
        };
        let mut plan = reconcile(&ctx.config.reconcile, &device, next_hop.as_deref(), &network)?;
        if let Some(persisted) = replay {
            plan.nics = persisted;
        }
        Ok(plan)
    }
}

/// Run one failover with the collaborators in `ctx`
pub async fn run_failover(ctx: &ProviderContext) -> FailoverResult<FailoverReport> {
    FailoverStateMachine::new(ctx).run().await
}

