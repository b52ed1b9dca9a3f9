//! One-shot job launches.

use std::collections::BTreeMap;
use std::sync::Arc;

use shoal_id::{AppId, HostId, JobId};
use shoal_reconcile::{PlacementError, PlacementPolicy};
use tokio::io::DuplexStream;
use tracing::{info, instrument, warn};

use crate::attach::{AttachClient, AttachError, AttachFlags, AttachRequest, AttachSession};
use crate::cluster::{Job, JobConfig, ScheduleRequest, Scheduler, SchedulerError};

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("failed to read cluster state: {0}")]
    State(#[source] SchedulerError),

    #[error("failed to place job: {0}")]
    Placement(#[from] PlacementError),

    #[error("failed to attach: {0}")]
    Attach(#[from] AttachError),

    #[error("failed to schedule job: {0}")]
    Schedule(#[source] SchedulerError),
}

/// A request to run one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunRequest {
    pub cmd: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub attach: bool,
    pub tty: bool,
    pub tty_columns: u16,
    pub tty_lines: u16,
}

/// A launched job.
#[derive(Debug)]
pub enum Launched {
    Detached {
        job_id: JobId,
        host: HostId,
    },
    /// The session was opened before the job was scheduled. `pipe` carries
    /// the job's input and output.
    Attached {
        job_id: JobId,
        host: HostId,
        session: AttachSession,
        pipe: DuplexStream,
    },
}

impl Launched {
    pub fn job_id(&self) -> &JobId {
        match self {
            Self::Detached { job_id, .. } | Self::Attached { job_id, .. } => job_id,
        }
    }

    pub fn host(&self) -> &HostId {
        match self {
            Self::Detached { host, .. } | Self::Attached { host, .. } => host,
        }
    }
}

/// Starts one-shot jobs, optionally attached.
pub struct JobLauncher {
    scheduler: Arc<dyn Scheduler>,
    attach: AttachClient,
    placement: Arc<dyn PlacementPolicy>,
    image: String,
}

impl JobLauncher {
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        attach: AttachClient,
        placement: Arc<dyn PlacementPolicy>,
        image: impl Into<String>,
    ) -> Self {
        Self {
            scheduler,
            attach,
            placement,
            image: image.into(),
        }
    }

    /// Build the runtime configuration for a one-shot job.
    pub fn job_config(&self, request: &RunRequest) -> JobConfig {
        JobConfig {
            image: self.image.clone(),
            cmd: request.cmd.clone(),
            env: request
                .env
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect(),
            tty: request.tty,
            attach_stdin: true,
            attach_stdout: true,
            attach_stderr: true,
            open_stdin: request.attach,
            stdin_once: true,
        }
    }

    /// Launch a one-shot job for `app`.
    ///
    /// When attaching, the session is opened before the job is scheduled so
    /// no output is lost. If scheduling then fails the session is closed
    /// before the error is returned.
    #[instrument(skip(self, request), fields(app_id = %app, attach = request.attach))]
    pub async fn launch(&self, app: &AppId, request: &RunRequest) -> Result<Launched, LaunchError> {
        let state = self.scheduler.state().await.map_err(LaunchError::State)?;
        let hosts = state.host_ids();
        let placed = self.placement.place(&state.loads(), 1)?;
        let Some(host) = placed.first().and_then(|idx| hosts.get(*idx)) else {
            return Err(PlacementError::NoHosts { requested: 1 }.into());
        };
        let host = (*host).clone();

        let job = Job::new(JobId::run(app.clone()), self.job_config(request));
        let job_id = job.id.clone();

        if !request.attach {
            self.schedule(&host, job).await?;
            info!(job_id = %job_id, host_id = %host, "Launched job");
            return Ok(Launched::Detached { job_id, host });
        }

        let mut attach_request = AttachRequest::new(
            job_id.clone(),
            AttachFlags::STDOUT | AttachFlags::STDERR | AttachFlags::STDIN | AttachFlags::STREAM,
        );
        if request.tty {
            attach_request = attach_request.with_size(request.tty_lines, request.tty_columns);
        }

        let (local, pipe) = tokio::io::duplex(self.attach.config().pipe_capacity);
        let session = self.attach.attach(&host, &attach_request, local).await?;

        if let Err(e) = self.schedule(&host, job).await {
            warn!(job_id = %job_id, host_id = %host, error = %e, "Closing attach session after failed schedule");
            session.close().await;
            return Err(e);
        }

        info!(job_id = %job_id, host_id = %host, "Launched attached job");
        Ok(Launched::Attached {
            job_id,
            host,
            session,
            pipe,
        })
    }

    async fn schedule(&self, host: &HostId, job: Job) -> Result<(), LaunchError> {
        let mut request = ScheduleRequest::default();
        request.push(host.clone(), job);

        let response = self
            .scheduler
            .schedule(&request)
            .await
            .map_err(LaunchError::Schedule)?;
        if !response.success {
            return Err(LaunchError::Schedule(SchedulerError::Rejected));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attach::AttachConfig;
    use crate::cluster::InMemoryCluster;
    use crate::registry::StaticRegistry;
    use shoal_reconcile::FirstHost;

    fn launcher(cluster: Arc<InMemoryCluster>) -> JobLauncher {
        let attach = AttachClient::new(Arc::new(StaticRegistry::new()), AttachConfig::default());
        JobLauncher::new(cluster, attach, Arc::new(FirstHost), "ubuntu")
    }

    #[test]
    fn test_job_config() {
        let launcher = launcher(Arc::new(InMemoryCluster::default()));
        let request = RunRequest {
            cmd: vec!["bash".into()],
            env: BTreeMap::from([("B".into(), "2".into()), ("A".into(), "1".into())]),
            attach: true,
            tty: true,
            ..RunRequest::default()
        };
        let config = launcher.job_config(&request);
        assert_eq!(config.image, "ubuntu");
        assert_eq!(config.env, vec!["A=1", "B=2"]);
        assert!(config.tty && config.open_stdin && config.stdin_once);
        assert!(config.attach_stdin && config.attach_stdout && config.attach_stderr);

        let detached = launcher.job_config(&RunRequest::default());
        assert!(!detached.open_stdin && !detached.tty);
    }

    #[tokio::test]
    async fn test_detached_launch_schedules_on_first_host() {
        let cluster = Arc::new(InMemoryCluster::with_hosts([
            HostId::new("h1").unwrap(),
            HostId::new("h2").unwrap(),
        ]));
        let launcher = launcher(cluster.clone());
        let app = AppId::new("blog").unwrap();

        let launched = launcher.launch(&app, &RunRequest::default()).await.unwrap();
        assert!(matches!(launched, Launched::Detached { .. }));
        assert_eq!(launched.host().as_str(), "h1");
        assert!(launched.job_id().to_string().starts_with("blog-run."));

        let state = cluster.snapshot().await;
        assert!(state.find_job(launched.job_id()).is_some());
    }

    #[tokio::test]
    async fn test_launch_without_hosts() {
        let launcher = launcher(Arc::new(InMemoryCluster::default()));
        let err = launcher
            .launch(&AppId::new("blog").unwrap(), &RunRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::Placement(PlacementError::NoHosts { .. })));
    }

    #[tokio::test]
    async fn test_attach_failure_schedules_nothing() {
        let cluster = Arc::new(InMemoryCluster::with_hosts([HostId::new("h1").unwrap()]));
        let launcher = launcher(cluster.clone());
        let request = RunRequest {
            attach: true,
            ..RunRequest::default()
        };

        let err = launcher
            .launch(&AppId::new("blog").unwrap(), &request)
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::Attach(AttachError::NoAddresses(_))));
        assert!(cluster.requests().await.is_empty());
    }
}
