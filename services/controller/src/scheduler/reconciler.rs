//! Formation reconciler.
//!
//! Drives the number of running replicas of one formation towards its
//! desired quantity:
//! - Reads a fresh snapshot of every host from the scheduler
//! - Counts the jobs that belong to the formation
//! - Schedules new jobs or stops surplus ones to close the gap
//!
//! Reconciles of the same formation are serialized; different formations
//! proceed concurrently.

use std::sync::Arc;

use shoal_id::{AppId, FormationType, HostId, JobId, JobKind};
use shoal_reconcile::{plan_scale, PlacementError, PlacementPolicy, ScaleAction};
use tracing::{debug, info, instrument, warn};

use super::locks::FormationLocks;
use crate::cluster::{
    HostError, HostRuntime, HostState, Job, JobConfig, ScheduleRequest, Scheduler, SchedulerError,
    StopOutcome,
};

/// Default upper bound on a formation's quantity.
pub const DEFAULT_MAX_QUANTITY: u32 = 1000;

/// Errors that can occur while reconciling a formation.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("quantity {requested} exceeds the maximum of {max}")]
    QuantityTooLarge { requested: u32, max: u32 },

    #[error("failed to read cluster state: {0}")]
    State(#[source] SchedulerError),

    #[error("failed to place jobs: {0}")]
    Placement(#[from] PlacementError),

    #[error("failed to schedule jobs: {0}")]
    Schedule(#[source] SchedulerError),

    #[error("failed to stop job {job_id} on host {host_id}: {source}")]
    Stop {
        host_id: HostId,
        job_id: JobId,
        #[source]
        source: HostError,
    },
}

/// Desired replica count of one job type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Formation {
    pub formation_type: FormationType,
    pub quantity: u32,
}

/// What a reconcile changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub scheduled: Vec<JobId>,
    pub stopped: Vec<JobId>,
    /// Jobs chosen for stopping that had already exited.
    pub already_gone: Vec<JobId>,
}

impl ReconcileOutcome {
    pub fn is_noop(&self) -> bool {
        self.scheduled.is_empty() && self.stopped.is_empty() && self.already_gone.is_empty()
    }
}

/// The formation reconciler.
pub struct FormationReconciler {
    scheduler: Arc<dyn Scheduler>,
    runtime: Arc<dyn HostRuntime>,
    placement: Arc<dyn PlacementPolicy>,
    template: JobConfig,
    max_quantity: u32,
    locks: FormationLocks,
}

impl FormationReconciler {
    /// `template` is the runtime configuration given to every new replica.
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        runtime: Arc<dyn HostRuntime>,
        placement: Arc<dyn PlacementPolicy>,
        template: JobConfig,
    ) -> Self {
        Self {
            scheduler,
            runtime,
            placement,
            template,
            max_quantity: DEFAULT_MAX_QUANTITY,
            locks: FormationLocks::new(),
        }
    }

    /// Reject formations asking for more than `max` replicas.
    #[must_use]
    pub fn with_max_quantity(mut self, max: u32) -> Self {
        self.max_quantity = max;
        self
    }

    /// Bring `formation` of `app` to its desired quantity.
    #[instrument(skip(self, formation), fields(app_id = %app, formation_type = %formation.formation_type, desired = formation.quantity))]
    pub async fn reconcile(
        &self,
        app: &AppId,
        formation: &Formation,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        if formation.quantity > self.max_quantity {
            return Err(ReconcileError::QuantityTooLarge {
                requested: formation.quantity,
                max: self.max_quantity,
            });
        }

        let _guard = self.locks.lock(app, &formation.formation_type).await;

        let state = self.scheduler.state().await.map_err(ReconcileError::State)?;
        let kind = JobKind::Formation(formation.formation_type.clone());
        let current = state.matching_jobs(app, &kind);
        debug!(current = current.len(), hosts = state.len(), "Read formation state");

        match plan_scale(formation.quantity, current.len()) {
            ScaleAction::Hold => {
                debug!("Formation already at desired quantity");
                Ok(ReconcileOutcome::default())
            }
            ScaleAction::ScaleUp(count) => {
                let scheduled = self.scale_up(app, &formation.formation_type, &state, count).await?;
                Ok(ReconcileOutcome {
                    scheduled,
                    ..ReconcileOutcome::default()
                })
            }
            ScaleAction::ScaleDown(count) => self.scale_down(current, count).await,
        }
    }

    async fn scale_up(
        &self,
        app: &AppId,
        formation_type: &FormationType,
        state: &HostState,
        count: usize,
    ) -> Result<Vec<JobId>, ReconcileError> {
        let hosts = state.host_ids();
        let placement = self.placement.place(&state.loads(), count)?;

        let mut request = ScheduleRequest::default();
        for idx in placement {
            let Some(host) = hosts.get(idx) else {
                continue;
            };
            let id = JobId::formation(app.clone(), formation_type.clone());
            request.push((*host).clone(), Job::new(id, self.template.clone()));
        }

        let scheduled = request.job_ids();
        let response = self
            .scheduler
            .schedule(&request)
            .await
            .map_err(ReconcileError::Schedule)?;
        if !response.success {
            warn!(jobs = scheduled.len(), "Scheduler rejected formation jobs");
            return Err(ReconcileError::Schedule(SchedulerError::Rejected));
        }

        info!(
            jobs = scheduled.len(),
            policy = self.placement.name(),
            "Scheduled formation jobs"
        );
        Ok(scheduled)
    }

    /// Stop `count` jobs, lowest identifiers first.
    async fn scale_down(
        &self,
        mut current: Vec<(HostId, Job)>,
        count: usize,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        current.sort_by(|(_, a), (_, b)| a.id.cmp(&b.id));

        let mut outcome = ReconcileOutcome::default();
        for (host, job) in current.into_iter().take(count) {
            match self.runtime.stop_job(&host, &job.id).await {
                Ok(StopOutcome::Stopped) => {
                    debug!(host_id = %host, job_id = %job.id, "Stopped job");
                    outcome.stopped.push(job.id);
                }
                Ok(StopOutcome::AlreadyGone) => {
                    info!(host_id = %host, job_id = %job.id, "Job already gone");
                    outcome.already_gone.push(job.id);
                }
                Err(source) => {
                    warn!(host_id = %host, job_id = %job.id, error = %source, "Failed to stop job");
                    return Err(ReconcileError::Stop {
                        host_id: host,
                        job_id: job.id,
                        source,
                    });
                }
            }
        }

        info!(
            stopped = outcome.stopped.len(),
            already_gone = outcome.already_gone.len(),
            "Stopped surplus formation jobs"
        );
        Ok(outcome)
    }
}
