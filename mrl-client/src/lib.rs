//! Client for the map-reduce-lite coordinator.
//!
//! [`MrlClient`] drives a job through its whole life: upload the input into
//! shared storage, submit the job, wait for it while tolerating a few failed
//! status checks, and copy the results back out.
//!
//! ```no_run
//! # async fn run() -> Result<(), mrl_client::ClientError> {
//! use std::path::Path;
//! use common::{JobConfig, JobParameters, JobType};
//! use mrl_client::{ClientConfig, MonitorOptions, MrlClient};
//! use tokio_util::sync::CancellationToken;
//!
//! let client = MrlClient::open(ClientConfig::from_env())?;
//! let input = client.upload_file(Path::new("words.txt"), None)?;
//! let config = JobConfig::new(JobType::WordCount, vec![input], JobParameters::default())?;
//!
//! let job = client.submit_job(&config).await?;
//! let status = client
//!     .wait_for_completion(&job, MonitorOptions::default(), &CancellationToken::new())
//!     .await?;
//! let results = client.download_results(&job, Path::new("./results")).await?;
//! # let _ = (status, results);
//! client.close();
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use common::{
    validate, DownloadResult, JobConfig, JobHandle, JobRequest, JobStatus, StorageLocation,
    StorageResolver,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub mod api;
pub mod config;
pub mod error;
pub mod monitor;
pub mod retrieve;

pub use api::{Coordinator, HealthReport, WorkerSummary};
pub use config::{ClientConfig, RequestTimeouts};
pub use error::ClientError;
pub use monitor::{MonitorOptions, StatusSource, MAX_CONSECUTIVE_FAILURES};

/// A connection to one coordinator plus the shared storage it uses.
///
/// Storage is resolved and the HTTP transport is created when the client is
/// opened; both are released by [`MrlClient::close`] or when the client is
/// dropped. Calls are meant to be made one after the other from a single
/// task.
pub struct MrlClient {
    config: ClientConfig,
    coordinator: Coordinator,
    storage: StorageLocation,
}

impl MrlClient {
    /// Resolve shared storage with the default mount heuristics and connect.
    pub fn open(config: ClientConfig) -> Result<Self, ClientError> {
        let resolver = StorageResolver::new(&config.storage_path, &config.fallback_path);
        Self::open_with(config, resolver)
    }

    /// Like [`MrlClient::open`], with a caller-supplied storage resolver.
    pub fn open_with(config: ClientConfig, resolver: StorageResolver) -> Result<Self, ClientError> {
        let storage = resolver.resolve()?;
        let base = config.coordinator_url()?;
        let coordinator = Coordinator::new(base, config.timeouts)?;

        info!(
            "client ready - coordinator: {}, storage: {} ({:?})",
            coordinator.base_url(),
            storage.root().display(),
            storage.kind()
        );

        Ok(Self {
            config,
            coordinator,
            storage,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn storage(&self) -> &StorageLocation {
        &self.storage
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Copy a local file into shared `input/`, returning the reference to use
    /// in a job's `input_files`.
    pub fn upload_file(&self, local_file: &Path, remote_name: Option<&str>) -> Result<String, ClientError> {
        Ok(self.storage.upload(local_file, remote_name)?)
    }

    /// Submit an already validated job.
    pub async fn submit_job(&self, config: &JobConfig) -> Result<JobHandle, ClientError> {
        self.coordinator.submit_job(config).await
    }

    /// Validate a loosely-typed request, then submit it. Nothing is sent if
    /// validation fails.
    pub async fn submit_request(&self, request: &JobRequest) -> Result<JobHandle, ClientError> {
        let config = validate(request)?;
        self.submit_job(&config).await
    }

    pub async fn job_status(&self, job: &JobHandle) -> Result<JobStatus, ClientError> {
        self.coordinator.job_status(job).await
    }

    /// See [`monitor::wait_for_completion`]. Status changes are logged.
    pub async fn wait_for_completion(
        &self,
        job: &JobHandle,
        options: MonitorOptions,
        interrupt: &CancellationToken,
    ) -> Result<JobStatus, ClientError> {
        monitor::wait_for_completion(&self.coordinator, job, options, interrupt, |_| {}).await
    }

    /// Fetch the job's current status and copy its results into `local_dir`.
    pub async fn download_results(
        &self,
        job: &JobHandle,
        local_dir: &Path,
    ) -> Result<DownloadResult, ClientError> {
        let status = self.coordinator.job_status(job).await?;
        retrieve::retrieve(job, &status, &self.storage, local_dir)
    }

    pub async fn cancel_job(&self, job: &JobHandle) -> Result<(), ClientError> {
        self.coordinator.cancel_job(job).await.inspect_err(|e| {
            warn!("could not cancel job {job}: {e}");
        })
    }

    pub async fn job_logs(&self, job: &JobHandle) -> Result<String, ClientError> {
        self.coordinator.job_logs(job).await
    }

    pub async fn list_workers(&self) -> Result<Vec<WorkerSummary>, ClientError> {
        self.coordinator.list_workers().await
    }

    pub async fn health(&self) -> Result<HealthReport, ClientError> {
        self.coordinator.health().await
    }

    /// Release the transport. Dropping the client has the same effect.
    pub fn close(self) {
        info!("closing client for {}", self.coordinator.base_url());
    }
}
