//! HTTP scheduler client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, error};

use super::{HostEntry, HostState, ScheduleRequest, ScheduleResponse, Scheduler, SchedulerError};

/// Talks to a scheduler service exposing `GET /state` and `POST /schedule`.
#[derive(Debug, Clone)]
pub struct HttpScheduler {
    client: Client,
    base_url: String,
}

impl HttpScheduler {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SchedulerError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn read_body(response: reqwest::Response, url: &str) -> Result<bytes::Bytes, SchedulerError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(url = %url, status = %status, body = %body, "Scheduler request failed");
            return Err(SchedulerError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.bytes().await?)
    }
}

#[async_trait]
impl Scheduler for HttpScheduler {
    async fn state(&self) -> Result<HostState, SchedulerError> {
        let url = format!("{}/state", self.base_url);
        debug!(url = %url, "Fetching cluster state");

        let response = self.client.get(&url).send().await?;
        let body = Self::read_body(response, &url).await?;
        let hosts: Vec<HostEntry> = serde_json::from_slice(&body)?;
        Ok(HostState::from(hosts))
    }

    async fn schedule(&self, request: &ScheduleRequest) -> Result<ScheduleResponse, SchedulerError> {
        let url = format!("{}/schedule", self.base_url);
        debug!(url = %url, jobs = request.job_count(), "Submitting jobs");

        let response = self.client.post(&url).json(request).send().await?;
        let body = Self::read_body(response, &url).await?;
        Ok(serde_json::from_slice(&body)?)
    }
}
