//! In-process cluster.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use shoal_id::{HostId, JobId};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{
    HostError, HostRuntime, HostState, Job, LogStream, ScheduleRequest, ScheduleResponse,
    Scheduler, SchedulerError, StopOutcome,
};

/// A cluster that lives entirely in memory.
///
/// Implements both [`Scheduler`] and [`HostRuntime`]. Scheduling onto an
/// unknown host is rejected as a whole, matching a real scheduler's
/// all-or-nothing response.
#[derive(Debug, Default)]
pub struct InMemoryCluster {
    hosts: Mutex<BTreeMap<HostId, Vec<Job>>>,
    logs: Mutex<HashMap<JobId, Vec<u8>>>,
    requests: Mutex<Vec<ScheduleRequest>>,
    fail_state: AtomicBool,
    reject_schedules: AtomicBool,
    fail_stops: AtomicBool,
    state_calls: AtomicUsize,
    stop_calls: AtomicUsize,
}

impl InMemoryCluster {
    /// Creates a cluster with the given empty hosts.
    pub fn with_hosts(hosts: impl IntoIterator<Item = HostId>) -> Self {
        let hosts = hosts.into_iter().map(|h| (h, Vec::new())).collect();
        Self {
            hosts: Mutex::new(hosts),
            ..Self::default()
        }
    }

    /// Places a job directly, bypassing the schedule path.
    pub async fn insert_job(&self, host: HostId, job: Job) {
        self.hosts.lock().await.entry(host).or_default().push(job);
    }

    pub async fn set_logs(&self, id: JobId, output: impl Into<Vec<u8>>) {
        self.logs.lock().await.insert(id, output.into());
    }

    pub async fn snapshot(&self) -> HostState {
        HostState::new(self.hosts.lock().await.clone())
    }

    /// Every schedule request received, in order.
    pub async fn requests(&self) -> Vec<ScheduleRequest> {
        self.requests.lock().await.clone()
    }

    pub fn set_fail_state(&self, fail: bool) {
        self.fail_state.store(fail, Ordering::SeqCst);
    }

    pub fn set_reject_schedules(&self, reject: bool) {
        self.reject_schedules.store(reject, Ordering::SeqCst);
    }

    pub fn set_fail_stops(&self, fail: bool) {
        self.fail_stops.store(fail, Ordering::SeqCst);
    }

    pub fn state_calls(&self) -> usize {
        self.state_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Scheduler for InMemoryCluster {
    async fn state(&self) -> Result<HostState, SchedulerError> {
        self.state_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_state.load(Ordering::SeqCst) {
            return Err(SchedulerError::Unavailable("state unavailable".to_string()));
        }
        Ok(self.snapshot().await)
    }

    async fn schedule(&self, request: &ScheduleRequest) -> Result<ScheduleResponse, SchedulerError> {
        self.requests.lock().await.push(request.clone());

        if self.reject_schedules.load(Ordering::SeqCst) {
            debug!("Rejecting schedule request");
            return Ok(ScheduleResponse { success: false });
        }

        let mut hosts = self.hosts.lock().await;
        if let Some(unknown) = request.host_jobs.keys().find(|h| !hosts.contains_key(*h)) {
            debug!(host_id = %unknown, "Schedule request names an unknown host");
            return Ok(ScheduleResponse { success: false });
        }

        for (host, jobs) in &request.host_jobs {
            hosts.entry(host.clone()).or_default().extend(jobs.iter().cloned());
        }
        info!(jobs = request.job_count(), "Scheduled jobs");
        Ok(ScheduleResponse { success: true })
    }
}

#[async_trait]
impl HostRuntime for InMemoryCluster {
    async fn stop_job(&self, host: &HostId, job: &JobId) -> Result<StopOutcome, HostError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_stops.load(Ordering::SeqCst) {
            return Err(HostError::Transport {
                host_id: host.clone(),
                message: "host unreachable".to_string(),
            });
        }

        let mut hosts = self.hosts.lock().await;
        let Some(jobs) = hosts.get_mut(host) else {
            return Ok(StopOutcome::AlreadyGone);
        };
        let before = jobs.len();
        jobs.retain(|j| &j.id != job);
        if jobs.len() == before {
            Ok(StopOutcome::AlreadyGone)
        } else {
            Ok(StopOutcome::Stopped)
        }
    }

    async fn job_logs(&self, host: &HostId, job: &JobId) -> Result<LogStream, HostError> {
        let running = self
            .hosts
            .lock()
            .await
            .get(host)
            .is_some_and(|jobs| jobs.iter().any(|j| &j.id == job));
        let output = self.logs.lock().await.get(job).cloned();

        match output {
            Some(output) => {
                let chunk: Result<Bytes, std::io::Error> = Ok(Bytes::from(output));
                Ok(Box::pin(futures_util::stream::iter([chunk])))
            }
            None if running => Ok(Box::pin(futures_util::stream::empty())),
            None => Err(HostError::NotFound {
                host_id: host.clone(),
                job_id: job.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;

    use super::*;
    use crate::cluster::JobConfig;

    fn host(s: &str) -> HostId {
        HostId::new(s).unwrap()
    }

    fn job(id: &str) -> Job {
        Job::new(JobId::parse(id).unwrap(), JobConfig::default())
    }

    #[tokio::test]
    async fn test_schedule_then_state() {
        let cluster = InMemoryCluster::with_hosts([host("h1"), host("h2")]);
        let mut request = ScheduleRequest::default();
        request.push(host("h2"), job("app-web.a"));

        let response = cluster.schedule(&request).await.unwrap();
        assert!(response.success);

        let state = cluster.state().await.unwrap();
        assert_eq!(state.find_job(&JobId::parse("app-web.a").unwrap()).unwrap().0, &host("h2"));
        assert_eq!(cluster.requests().await.len(), 1);
    }

    #[tokio::test]
    async fn test_schedule_unknown_host_is_all_or_nothing() {
        let cluster = InMemoryCluster::with_hosts([host("h1")]);
        let mut request = ScheduleRequest::default();
        request.push(host("h1"), job("app-web.a"));
        request.push(host("h9"), job("app-web.b"));

        let response = cluster.schedule(&request).await.unwrap();
        assert!(!response.success);
        assert!(cluster.snapshot().await.find_job(&JobId::parse("app-web.a").unwrap()).is_none());
    }

    #[tokio::test]
    async fn test_stop_job_outcomes() {
        let cluster = InMemoryCluster::with_hosts([host("h1")]);
        cluster.insert_job(host("h1"), job("app-web.a")).await;
        let id = JobId::parse("app-web.a").unwrap();

        assert_eq!(cluster.stop_job(&host("h1"), &id).await.unwrap(), StopOutcome::Stopped);
        assert_eq!(cluster.stop_job(&host("h1"), &id).await.unwrap(), StopOutcome::AlreadyGone);
        assert_eq!(cluster.stop_calls(), 2);
    }

    #[tokio::test]
    async fn test_job_logs() {
        let cluster = InMemoryCluster::with_hosts([host("h1")]);
        let id = JobId::parse("app-web.a").unwrap();
        cluster.insert_job(host("h1"), job("app-web.a")).await;
        cluster.set_logs(id.clone(), "hello\n").await;

        let chunks: Vec<_> = cluster
            .job_logs(&host("h1"), &id)
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().unwrap(), &Bytes::from_static(b"hello\n"));

        let missing = JobId::parse("app-web.zz").unwrap();
        assert!(matches!(
            cluster.job_logs(&host("h1"), &missing).await,
            Err(HostError::NotFound { .. })
        ));
    }
}
