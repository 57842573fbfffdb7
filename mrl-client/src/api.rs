//! Thin wrapper over the coordinator's REST API.

use async_trait::async_trait;
use common::{JobConfig, JobHandle, JobStatus};
use reqwest::{header, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::config::RequestTimeouts;
use crate::error::ClientError;
use crate::monitor::StatusSource;

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(default)]
    job_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WorkersResponse {
    #[serde(default)]
    workers: Vec<WorkerSummary>,
}

#[derive(Debug, Deserialize)]
struct LogsResponse {
    #[serde(default)]
    logs: Option<serde_json::Value>,
}

/// A worker registered with the coordinator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerSummary {
    #[serde(default, alias = "workerId", alias = "worker_id")]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Number of tasks currently running on the worker.
    #[serde(default, alias = "currentLoad", skip_serializing_if = "Option::is_none")]
    pub load: Option<u32>,
}

impl WorkerSummary {
    /// `address` when reported, else `host:port`.
    pub fn endpoint(&self) -> String {
        match (&self.address, &self.host, self.port) {
            (Some(address), _, _) => address.clone(),
            (None, Some(host), Some(port)) => format!("{host}:{port}"),
            (None, Some(host), None) => host.clone(),
            _ => "unknown".to_string(),
        }
    }
}

/// Coordinator health check result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    #[serde(default)]
    pub status: String,

    #[serde(default)]
    pub active_workers: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_workers: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime: Option<String>,
}

/// HTTP client for a single coordinator.
#[derive(Debug, Clone)]
pub struct Coordinator {
    http: reqwest::Client,
    base: Url,
    timeouts: RequestTimeouts,
}

impl Coordinator {
    pub fn new(base: Url, timeouts: RequestTimeouts) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeouts.connect)
            .build()
            .map_err(|e| ClientError::from_reqwest(base.as_str(), e))?;

        Ok(Self {
            http,
            base,
            timeouts,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// `base` + `/api/<segments...>`, with each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("api").extend(segments);
        }
        url
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        url: &Url,
    ) -> Result<Response, ClientError> {
        request
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(url.as_str(), e))
    }

    /// Read the whole body, then parse it. A body cut short is a transport
    /// failure; only a complete body that does not parse is malformed.
    async fn read_json<T: DeserializeOwned>(
        &self,
        response: Response,
        url: &Url,
    ) -> Result<T, ClientError> {
        let body = response
            .bytes()
            .await
            .map_err(|e| ClientError::from_reqwest(url.as_str(), e))?;

        serde_json::from_slice(&body).map_err(|e| ClientError::MalformedResponse(e.to_string()))
    }

    /// Post a validated job. Not idempotent: every call creates a new job.
    pub async fn submit_job(&self, config: &JobConfig) -> Result<JobHandle, ClientError> {
        let url = self.endpoint(&["jobs", "submit"]);
        info!("submitting {} job to {url}", config.job_type());
        debug!("job config: {config:?}");

        let request = self
            .http
            .post(url.clone())
            .timeout(self.timeouts.submit)
            .header(header::ACCEPT, "application/json")
            .json(config);
        let response = self.send(request, &url).await?;

        if !response.status().is_success() {
            return Err(rejection(response).await);
        }

        let body: SubmitResponse = self.read_json(response, &url).await?;

        match body.job_id.filter(|id| !id.is_empty()) {
            Some(id) => {
                info!("job submitted, id {id}");
                Ok(JobHandle::new(id))
            }
            None => Err(ClientError::MalformedResponse(
                "submission response has no job_id".to_string(),
            )),
        }
    }

    pub async fn job_status(&self, job: &JobHandle) -> Result<JobStatus, ClientError> {
        let url = self.endpoint(&["jobs", job.as_str(), "status"]);
        let request = self.http.get(url.clone()).timeout(self.timeouts.query);
        let response = self.send(request, &url).await?;

        match response.status() {
            StatusCode::OK => self.read_json(response, &url).await,
            StatusCode::NOT_FOUND => Err(ClientError::NotFound(job.to_string())),
            _ => Err(rejection(response).await),
        }
    }

    /// Ask the coordinator to cancel a job.
    pub async fn cancel_job(&self, job: &JobHandle) -> Result<(), ClientError> {
        let url = self.endpoint(&["jobs", job.as_str(), "cancel"]);
        let request = self.http.post(url.clone()).timeout(self.timeouts.query);
        let response = self.send(request, &url).await?;

        match response.status() {
            StatusCode::OK => {
                info!("job {job} cancelled");
                Ok(())
            }
            StatusCode::NOT_FOUND => Err(ClientError::NotFound(job.to_string())),
            _ => Err(rejection(response).await),
        }
    }

    /// Job log text. The coordinator may answer with `{"logs": ...}` or
    /// with the raw text.
    pub async fn job_logs(&self, job: &JobHandle) -> Result<String, ClientError> {
        let url = self.endpoint(&["jobs", job.as_str(), "logs"]);
        let request = self.http.get(url.clone()).timeout(self.timeouts.query);
        let response = self.send(request, &url).await?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Err(ClientError::NotFound(job.to_string())),
            _ => return Err(rejection(response).await),
        }

        let is_json = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.contains("application/json"));
        let body = response
            .text()
            .await
            .map_err(|e| ClientError::from_reqwest(url.as_str(), e))?;

        if !is_json {
            return Ok(body);
        }

        let logs: LogsResponse =
            serde_json::from_str(&body).map_err(|e| ClientError::MalformedResponse(e.to_string()))?;
        Ok(match logs.logs {
            Some(serde_json::Value::String(text)) => text,
            Some(serde_json::Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        })
    }

    pub async fn list_workers(&self) -> Result<Vec<WorkerSummary>, ClientError> {
        let url = self.endpoint(&["workers"]);
        let request = self.http.get(url.clone()).timeout(self.timeouts.query);
        let response = self.send(request, &url).await?;

        if response.status() != StatusCode::OK {
            return Err(rejection(response).await);
        }

        let body: WorkersResponse = self.read_json(response, &url).await?;
        Ok(body.workers)
    }

    pub async fn health(&self) -> Result<HealthReport, ClientError> {
        let url = self.endpoint(&["health"]);
        let request = self.http.get(url.clone()).timeout(self.timeouts.health);
        let response = self.send(request, &url).await?;

        if response.status() != StatusCode::OK {
            return Err(rejection(response).await);
        }

        self.read_json(response, &url).await
    }
}

#[async_trait]
impl StatusSource for Coordinator {
    async fn job_status(&self, job: &JobHandle) -> Result<JobStatus, ClientError> {
        Coordinator::job_status(self, job).await
    }
}

/// Turn an error response into [`ClientError::ServerRejected`], forwarding
/// the coordinator's `error` field when it sent one.
async fn rejection(response: Response) -> ClientError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();

    ClientError::ServerRejected {
        status,
        detail: error_detail(&body),
    }
}

fn error_detail(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.get("error")?.as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}
