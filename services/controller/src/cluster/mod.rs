//! Cluster collaborators.
//!
//! The controller never owns cluster state. It asks a [`Scheduler`] for a
//! fresh snapshot of which jobs run where, submits new jobs to it, and asks a
//! [`HostRuntime`] to terminate jobs or stream their logs.
//!
//! Two implementations ship:
//! - [`HttpScheduler`] talks to a scheduler service over HTTP.
//! - [`InMemoryCluster`] keeps everything in process and backs both traits.
//!   It is used in dev mode and by the test suite.

mod http;
mod memory;

use std::collections::BTreeMap;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use shoal_id::{AppId, HostId, JobId, JobKind};
use shoal_reconcile::HostLoad;
use thiserror::Error;
use tracing::debug;

pub use http::HttpScheduler;
pub use memory::InMemoryCluster;

/// Attribute key recording which host currently owns a job.
pub const HOST_ID_ATTRIBUTE: &str = "host_id";

// =============================================================================
// Jobs
// =============================================================================

/// Runtime configuration handed to the host for one job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub image: String,
    pub cmd: Vec<String>,
    /// Environment as `KEY=value` strings.
    pub env: Vec<String>,
    pub tty: bool,
    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
    pub open_stdin: bool,
    pub stdin_once: bool,
}

/// A unit of work scheduled onto a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    #[serde(default)]
    pub config: JobConfig,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl Job {
    pub fn new(id: JobId, config: JobConfig) -> Self {
        Self {
            id,
            config,
            attributes: BTreeMap::new(),
        }
    }
}

// =============================================================================
// Host state
// =============================================================================

/// A snapshot of the jobs running on every known host.
///
/// Hosts are kept in identifier order so placement over them is
/// deterministic for a given snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostState {
    hosts: BTreeMap<HostId, Vec<Job>>,
}

impl HostState {
    pub fn new(hosts: BTreeMap<HostId, Vec<Job>>) -> Self {
        Self { hosts }
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Number of known hosts.
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn hosts(&self) -> impl Iterator<Item = (&HostId, &[Job])> {
        self.hosts.iter().map(|(id, jobs)| (id, jobs.as_slice()))
    }

    /// Host identifiers in placement order.
    pub fn host_ids(&self) -> Vec<&HostId> {
        self.hosts.keys().collect()
    }

    /// Per-host job counts in placement order.
    pub fn loads(&self) -> Vec<HostLoad> {
        self.hosts
            .values()
            .map(|jobs| HostLoad { jobs: jobs.len() })
            .collect()
    }

    /// Every job of `app`, in host order.
    pub fn app_jobs<'a>(&'a self, app: &'a AppId) -> impl Iterator<Item = &'a Job> + 'a {
        self.hosts
            .values()
            .flatten()
            .filter(move |job| job.id.app() == app)
    }

    /// Jobs of `app` and `kind`, each annotated with its owning host.
    pub fn matching_jobs(&self, app: &AppId, kind: &JobKind) -> Vec<(HostId, Job)> {
        self.hosts
            .iter()
            .flat_map(|(host, jobs)| {
                jobs.iter()
                    .filter(|job| job.id.belongs_to(app, kind))
                    .map(move |job| {
                        let mut job = job.clone();
                        job.attributes
                            .insert(HOST_ID_ATTRIBUTE.to_string(), host.to_string());
                        (host.clone(), job)
                    })
            })
            .collect()
    }

    /// Locate a job by identifier.
    pub fn find_job(&self, id: &JobId) -> Option<(&HostId, &Job)> {
        self.hosts
            .iter()
            .find_map(|(host, jobs)| jobs.iter().find(|job| &job.id == id).map(|job| (host, job)))
    }
}

/// Host entry as reported by the scheduler's state endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HostEntry {
    pub id: HostId,
    #[serde(default)]
    pub jobs: Vec<RawJob>,
}

/// A job as reported by the scheduler, before its identifier is decoded.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawJob {
    pub id: String,
    #[serde(default)]
    pub config: JobConfig,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl From<Vec<HostEntry>> for HostState {
    /// Jobs whose identifiers lack an `{app}-{type}.` prefix are skipped.
    fn from(entries: Vec<HostEntry>) -> Self {
        let mut hosts = BTreeMap::new();
        for entry in entries {
            let jobs: Vec<Job> = entry
                .jobs
                .into_iter()
                .filter_map(|raw| match JobId::parse(&raw.id) {
                    Ok(id) => Some(Job {
                        id,
                        config: raw.config,
                        attributes: raw.attributes,
                    }),
                    Err(e) => {
                        debug!(host_id = %entry.id, job_id = %raw.id, error = %e, "Skipping foreign job");
                        None
                    }
                })
                .collect();
            hosts.entry(entry.id).or_insert_with(Vec::new).extend(jobs);
        }
        Self { hosts }
    }
}

// =============================================================================
// Scheduler
// =============================================================================

/// Jobs to add, grouped by target host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub host_jobs: BTreeMap<HostId, Vec<Job>>,
}

impl ScheduleRequest {
    /// Add a job for `host`.
    pub fn push(&mut self, host: HostId, job: Job) {
        self.host_jobs.entry(host).or_default().push(job);
    }

    pub fn job_count(&self) -> usize {
        self.host_jobs.values().map(Vec::len).sum()
    }

    pub fn job_ids(&self) -> Vec<JobId> {
        self.host_jobs
            .values()
            .flatten()
            .map(|job| job.id.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleResponse {
    pub success: bool,
}

/// Errors talking to the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("scheduler returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("scheduler rejected the request")]
    Rejected,

    #[error("failed to decode scheduler response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("scheduler unavailable: {0}")]
    Unavailable(String),
}

/// The cluster scheduler.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Fetch a fresh snapshot of every host and its jobs.
    async fn state(&self) -> Result<HostState, SchedulerError>;

    /// Submit new jobs. `success: false` means nothing was scheduled.
    async fn schedule(&self, request: &ScheduleRequest) -> Result<ScheduleResponse, SchedulerError>;
}

// =============================================================================
// Host runtime
// =============================================================================

/// Result of asking a host to stop a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    /// The job had already exited or was never there.
    AlreadyGone,
}

/// Streamed job output.
pub type LogStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("{operation} is not supported by this host runtime")]
    Unsupported { operation: &'static str },

    #[error("job {job_id} not found on host {host_id}")]
    NotFound { host_id: HostId, job_id: JobId },

    #[error("host {host_id} unreachable: {message}")]
    Transport { host_id: HostId, message: String },
}

/// Per-host job management.
#[async_trait]
pub trait HostRuntime: Send + Sync {
    async fn stop_job(&self, host: &HostId, job: &JobId) -> Result<StopOutcome, HostError>;

    async fn job_logs(&self, host: &HostId, job: &JobId) -> Result<LogStream, HostError>;
}

/// Host runtime used when no host manager is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedHostRuntime;

#[async_trait]
impl HostRuntime for UnsupportedHostRuntime {
    async fn stop_job(&self, _host: &HostId, _job: &JobId) -> Result<StopOutcome, HostError> {
        Err(HostError::Unsupported {
            operation: "stopping jobs",
        })
    }

    async fn job_logs(&self, _host: &HostId, _job: &JobId) -> Result<LogStream, HostError> {
        Err(HostError::Unsupported {
            operation: "job logs",
        })
    }
}
