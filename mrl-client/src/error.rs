use std::time::Duration;

use common::{JobState, StorageError, ValidationError};
use thiserror::Error;

/// Everything that can go wrong while driving a job.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The job configuration was rejected before anything was sent.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(
        "cannot connect to the coordinator at {url}; verify the coordinator is running \
         and reachable: {source}"
    )]
    ConnectionFailure {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("timed out waiting for the coordinator at {url}: {source}")]
    Timeout {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid coordinator address: {0}")]
    InvalidAddress(#[from] url::ParseError),

    #[error("coordinator rejected the request (HTTP {status}): {detail}")]
    ServerRejected { status: u16, detail: String },

    #[error("job not found: {0}")]
    NotFound(String),

    #[error("malformed coordinator response: {0}")]
    MalformedResponse(String),

    #[error("gave up on job {job_id} after {attempts} consecutive failed status checks: {source}")]
    TooManyFailures {
        job_id: String,
        attempts: u32,
        #[source]
        source: Box<ClientError>,
    },

    #[error("job {job_id} did not finish within {}s", timeout.as_secs())]
    MonitorTimeout { job_id: String, timeout: Duration },

    #[error("monitoring of job {job_id} was interrupted")]
    Interrupted { job_id: String },

    #[error("job {job_id} is not complete (state: {state})")]
    JobNotComplete { job_id: String, state: JobState },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ClientError {
    /// Classify a `reqwest` failure for a request to `url`.
    ///
    /// `reqwest` reports a body that ends early as a decode error, so decode
    /// errors land in [`ClientError::Transport`]. JSON is parsed separately
    /// and only that step yields [`ClientError::MalformedResponse`].
    pub(crate) fn from_reqwest(url: &str, source: reqwest::Error) -> Self {
        let url = url.to_string();
        if source.is_timeout() {
            ClientError::Timeout { url, source }
        } else if source.is_connect() {
            ClientError::ConnectionFailure { url, source }
        } else {
            ClientError::Transport { url, source }
        }
    }

    /// Whether trying the same request again could succeed.
    ///
    /// Transport problems, coordinator-side 5xx errors, 408 and 429 are
    /// retryable; bad input, unknown jobs and malformed responses are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::ConnectionFailure { .. }
            | ClientError::Timeout { .. }
            | ClientError::Transport { .. } => true,
            ClientError::ServerRejected { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        let unavailable = ClientError::ServerRejected {
            status: 503,
            detail: "busy".into(),
        };
        let bad_request = ClientError::ServerRejected {
            status: 400,
            detail: "bad".into(),
        };

        assert!(unavailable.is_retryable());
        assert!(!bad_request.is_retryable());
        for status in [408, 429] {
            let transient = ClientError::ServerRejected {
                status,
                detail: "try later".into(),
            };
            assert!(transient.is_retryable(), "{status} should be retryable");
        }
        assert!(!ClientError::ServerRejected { status: 404, detail: String::new() }.is_retryable());
        assert!(!ClientError::NotFound("job_1".into()).is_retryable());
        assert!(!ClientError::MalformedResponse("{}".into()).is_retryable());
        assert!(!ClientError::from(ValidationError::EmptyInputFiles).is_retryable());
    }

    #[test]
    fn test_messages_carry_detail() {
        let err = ClientError::ServerRejected {
            status: 400,
            detail: "Failed to submit job".into(),
        };
        assert_eq!(
            err.to_string(),
            "coordinator rejected the request (HTTP 400): Failed to submit job"
        );

        let err = ClientError::MonitorTimeout {
            job_id: "job_1".into(),
            timeout: Duration::from_secs(10),
        };
        assert_eq!(err.to_string(), "job job_1 did not finish within 10s");
    }
}
