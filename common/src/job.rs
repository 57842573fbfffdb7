//! Job requests, validated job configurations and job status snapshots, as
//! exchanged with the coordinator's REST API.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/////////////////////////////////////////////////////////////////////////////
// Job types
/////////////////////////////////////////////////////////////////////////////

/// The kinds of job the coordinator knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    /// Count occurrences of each word.
    #[value(name = "wordcount")]
    WordCount,

    /// Sort input lines.
    Sort,

    /// Keep lines matching a pattern.
    Grep,

    /// Count input lines.
    #[value(name = "linecount")]
    LineCount,

    /// Drop duplicate lines.
    Unique,
}

impl JobType {
    pub const ALL: [JobType; 5] = [
        JobType::WordCount,
        JobType::Sort,
        JobType::Grep,
        JobType::LineCount,
        JobType::Unique,
    ];

    /// The name used on the wire and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::WordCount => "wordcount",
            JobType::Sort => "sort",
            JobType::Grep => "grep",
            JobType::LineCount => "linecount",
            JobType::Unique => "unique",
        }
    }

    /// Comma separated list of every valid job type name.
    pub fn valid_names() -> String {
        JobType::ALL
            .iter()
            .map(JobType::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::ALL
            .into_iter()
            .find(|job_type| job_type.as_str() == s)
            .ok_or_else(|| ValidationError::InvalidJobType {
                value: s.to_string(),
                valid: JobType::valid_names(),
            })
    }
}

/////////////////////////////////////////////////////////////////////////////
// Requests and validation
/////////////////////////////////////////////////////////////////////////////

/// Tuning knobs passed to the coordinator alongside the job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobParameters {
    /// Number of map tasks to split the input into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_tasks: Option<u32>,

    /// Number of reduce tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reduce_tasks: Option<u32>,

    /// Search pattern, only meaningful for [`JobType::Grep`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

/// A job request as handed to us by a caller, before validation.
///
/// Every field may be missing; [`validate`] turns it into a [`JobConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct JobRequest {
    pub job_type: Option<String>,
    pub input_files: Option<Vec<String>>,
    #[serde(default)]
    pub parameters: JobParameters,
}

/// A job configuration that passed validation.
///
/// There is no way to build one without going through [`validate`] or
/// [`JobConfig::new`], so the job type is always known and the input list is
/// never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobConfig {
    job_type: JobType,
    input_files: Vec<String>,
    parameters: JobParameters,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required field in job config: {0}")]
    MissingField(&'static str),

    #[error("invalid job_type `{value}`; valid values: {valid}")]
    InvalidJobType { value: String, valid: String },

    #[error("input_files must be a non-empty list")]
    EmptyInputFiles,

    #[error("job_type `grep` requires a non-empty parameters.pattern")]
    MissingPattern,
}

impl JobConfig {
    pub fn new(
        job_type: JobType,
        input_files: Vec<String>,
        parameters: JobParameters,
    ) -> Result<Self, ValidationError> {
        if input_files.is_empty() {
            return Err(ValidationError::EmptyInputFiles);
        }

        if job_type == JobType::Grep {
            let has_pattern = parameters
                .pattern
                .as_deref()
                .is_some_and(|pattern| !pattern.trim().is_empty());
            if !has_pattern {
                return Err(ValidationError::MissingPattern);
            }
        }

        Ok(Self {
            job_type,
            input_files,
            parameters,
        })
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    pub fn input_files(&self) -> &[String] {
        &self.input_files
    }

    pub fn parameters(&self) -> &JobParameters {
        &self.parameters
    }
}

/// Check a job request and return the typed configuration.
///
/// Rules are checked in order and the first violation is reported:
/// required fields, job type membership, non-empty input list, and a pattern
/// for `grep` jobs.
pub fn validate(request: &JobRequest) -> Result<JobConfig, ValidationError> {
    let job_type = request
        .job_type
        .as_deref()
        .ok_or(ValidationError::MissingField("job_type"))?;
    let input_files = request
        .input_files
        .as_ref()
        .ok_or(ValidationError::MissingField("input_files"))?;

    let job_type: JobType = job_type.parse()?;

    JobConfig::new(job_type, input_files.clone(), request.parameters.clone())
}

/////////////////////////////////////////////////////////////////////////////
// Job handles and status
/////////////////////////////////////////////////////////////////////////////

/// Identifier handed out by the coordinator for a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// State of the job, as observed by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobState {
    /// Job accepted, not started.
    Pending,

    /// Map or reduce phase in progress.
    Running,

    /// Job completed.
    Completed,

    /// Job failed.
    Failed,

    /// Job cancelled by a caller.
    Cancelled,
}

impl JobState {
    /// No further transition happens from a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Running => "RUNNING",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
            JobState::Cancelled => "CANCELLED",
        }
    }
}

impl From<String> for JobState {
    /// The coordinator reports its internal phases as states of their own;
    /// anything we don't recognise is still in flight.
    fn from(value: String) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "PENDING" | "SUBMITTED" => JobState::Pending,
            "COMPLETED" => JobState::Completed,
            "FAILED" => JobState::Failed,
            "CANCELLED" | "CANCELED" => JobState::Cancelled,
            _ => JobState::Running,
        }
    }
}

impl From<JobState> for String {
    fn from(value: JobState) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single status snapshot. A new one is produced for every poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,

    #[serde(rename = "status")]
    pub state: JobState,

    /// Percentage, 0 to 100.
    #[serde(default, deserialize_with = "percent")]
    pub progress: u8,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks_completed: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tasks: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Storage-relative references to the result files, if the coordinator
    /// reports them.
    #[serde(default, deserialize_with = "nullable_list")]
    pub output_files: Vec<String>,
}

impl JobStatus {
    /// A bare snapshot in the given state.
    pub fn new(state: JobState, progress: u8) -> Self {
        Self {
            job_id: None,
            state,
            progress: progress.min(100),
            current_phase: None,
            tasks_completed: None,
            total_tasks: None,
            execution_time_ms: None,
            error: None,
            output_files: vec![],
        }
    }

    /// Time the job spent executing, when reported.
    pub fn elapsed(&self) -> Option<Duration> {
        self.execution_time_ms.map(Duration::from_millis)
    }

    /// Task counters, only when both halves are known.
    pub fn task_counts(&self) -> Option<(u32, u32)> {
        self.tasks_completed.zip(self.total_tasks)
    }

    /// The pair compared between polls to decide whether to report.
    pub fn summary(&self) -> (JobState, u8) {
        (self.state, self.progress)
    }
}

fn percent<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?.unwrap_or(0.0);
    Ok(value.clamp(0.0, 100.0) as u8)
}

fn nullable_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Local files produced by a result download. May be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadResult {
    pub files: Vec<PathBuf>,
}

impl DownloadResult {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
