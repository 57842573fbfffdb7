use std::path::Path;
use std::time::{Duration, Instant};

use common::{JobConfig, JobHandle, JobParameters, JobType};
use mrl_client::{ClientConfig, ClientError, MonitorOptions, MrlClient, RequestTimeouts};
use mrl_testkit::RawServer;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const SHORT: Duration = Duration::from_millis(200);

fn client_for(server: &RawServer, dir: &Path) -> MrlClient {
    let config = ClientConfig {
        host: server.host(),
        port: server.port(),
        storage_path: dir.join("mnt"),
        fallback_path: dir.join("shared"),
        timeouts: RequestTimeouts {
            connect: SHORT,
            submit: SHORT,
            query: SHORT,
            health: SHORT,
        },
    };
    let resolver = common::StorageResolver::new(&config.storage_path, &config.fallback_path)
        .with_detector(|_: &Path| false);
    MrlClient::open_with(config, resolver).unwrap()
}

fn fast() -> MonitorOptions {
    MonitorOptions {
        timeout: Duration::from_secs(10),
        poll_interval: Duration::from_millis(10),
    }
}

#[tokio::test]
async fn test_truncated_body_is_a_retryable_transport_error() {
    let server = RawServer::truncating().await.unwrap();
    let dir = TempDir::new().unwrap();
    let client = client_for(&server, dir.path());

    let err = client.job_status(&JobHandle::new("job_1")).await.unwrap_err();

    assert!(matches!(err, ClientError::Transport { .. }), "got {err:?}");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_monitor_tolerates_truncated_bodies_up_to_the_limit() {
    let server = RawServer::truncating().await.unwrap();
    let dir = TempDir::new().unwrap();
    let client = client_for(&server, dir.path());

    let err = client
        .wait_for_completion(&JobHandle::new("job_1"), fast(), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        ClientError::TooManyFailures { attempts, source, .. } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*source, ClientError::Transport { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(server.connections(), 3);
}

#[tokio::test]
async fn test_complete_non_json_body_is_malformed() {
    let server = RawServer::garbage().await.unwrap();
    let dir = TempDir::new().unwrap();
    let client = client_for(&server, dir.path());

    let err = client.job_status(&JobHandle::new("job_1")).await.unwrap_err();
    assert!(matches!(err, ClientError::MalformedResponse(_)), "got {err:?}");

    let err = client
        .wait_for_completion(&JobHandle::new("job_1"), fast(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::MalformedResponse(_)));
}

#[tokio::test]
async fn test_stalled_submit_times_out() {
    let server = RawServer::stalling().await.unwrap();
    let dir = TempDir::new().unwrap();
    let client = client_for(&server, dir.path());
    let config = JobConfig::new(
        JobType::Sort,
        vec!["input/a.txt".into()],
        JobParameters::default(),
    )
    .unwrap();
    let start = Instant::now();

    let err = client.submit_job(&config).await.unwrap_err();

    assert!(matches!(err, ClientError::Timeout { .. }), "got {err:?}");
    assert!(err.is_retryable());
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_monitor_counts_status_timeouts() {
    let server = RawServer::stalling().await.unwrap();
    let dir = TempDir::new().unwrap();
    let client = client_for(&server, dir.path());

    let err = client
        .wait_for_completion(&JobHandle::new("job_1"), fast(), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        ClientError::TooManyFailures { attempts, source, .. } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*source, ClientError::Timeout { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
}
