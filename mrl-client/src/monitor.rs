//! Polls a job until it finishes.

use std::time::Duration;

use async_trait::async_trait;
use common::{JobHandle, JobState, JobStatus};
use tokio::select;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::ClientError;

/// Consecutive failed status checks tolerated before giving up.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Anything that can report the status of a job.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn job_status(&self, job: &JobHandle) -> Result<JobStatus, ClientError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorOptions {
    /// Overall wait budget.
    pub timeout: Duration,

    /// Delay between two status checks.
    pub poll_interval: Duration,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// Poll `source` until the job completes, fails or is cancelled.
///
/// `on_update` is called only when the `(state, progress)` pair differs from
/// the last one reported, polling itself keeps its cadence. Retryable errors
/// are tolerated up to [`MAX_CONSECUTIVE_FAILURES`] in a row, a successful
/// check resets the count. Non-retryable errors are returned right away.
///
/// Cancelling `interrupt` stops the loop at the next pause with
/// [`ClientError::Interrupted`]; a request already in flight is allowed to
/// finish.
pub async fn wait_for_completion<S, F>(
    source: &S,
    job: &JobHandle,
    options: MonitorOptions,
    interrupt: &CancellationToken,
    mut on_update: F,
) -> Result<JobStatus, ClientError>
where
    S: StatusSource + ?Sized,
    F: FnMut(&JobStatus),
{
    let start = Instant::now();
    let mut last_reported: Option<(JobState, u8)> = None;
    let mut consecutive_failures = 0;

    info!(
        "waiting for job {job} to complete (timeout: {}s)",
        options.timeout.as_secs()
    );

    while start.elapsed() < options.timeout {
        match source.job_status(job).await {
            Ok(status) => {
                consecutive_failures = 0;

                if last_reported != Some(status.summary()) {
                    report(job, &status);
                    on_update(&status);
                    last_reported = Some(status.summary());
                }

                match status.state {
                    JobState::Completed => {
                        let seconds = status.elapsed().unwrap_or_default().as_secs_f64();
                        info!("job {job} completed in {seconds:.2}s");
                        return Ok(status);
                    }
                    JobState::Failed => {
                        error!(
                            "job {job} failed: {}",
                            status.error.as_deref().unwrap_or("unknown error")
                        );
                        return Ok(status);
                    }
                    JobState::Cancelled => {
                        warn!("job {job} was cancelled");
                        return Ok(status);
                    }
                    JobState::Pending | JobState::Running => {}
                }
            }
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                consecutive_failures += 1;
                warn!(
                    "status check for job {job} failed (attempt {consecutive_failures}/{MAX_CONSECUTIVE_FAILURES}): {e}"
                );

                if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                    return Err(ClientError::TooManyFailures {
                        job_id: job.to_string(),
                        attempts: consecutive_failures,
                        source: Box::new(e),
                    });
                }
            }
        }

        pause(options.poll_interval, interrupt, job).await?;
    }

    Err(ClientError::MonitorTimeout {
        job_id: job.to_string(),
        timeout: options.timeout,
    })
}

async fn pause(
    interval: Duration,
    interrupt: &CancellationToken,
    job: &JobHandle,
) -> Result<(), ClientError> {
    select! {
        _ = tokio::time::sleep(interval) => Ok(()),
        _ = interrupt.cancelled() => Err(ClientError::Interrupted { job_id: job.to_string() }),
    }
}

fn report(job: &JobHandle, status: &JobStatus) {
    info!("job {job}: {} - progress {}%", status.state, status.progress);

    if let Some(phase) = &status.current_phase {
        info!("current phase: {phase}");
    }
    if let Some((done, total)) = status.task_counts() {
        info!("tasks: {done}/{total}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    enum Step {
        Status(JobState, u8),
        Fail(u16),
        Missing,
    }

    /// Replays a script of responses; the last step repeats forever.
    struct Scripted {
        steps: Mutex<VecDeque<Step>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: Mutex::new(steps.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn respond(step: &Step, job: &JobHandle) -> Result<JobStatus, ClientError> {
        match step {
            Step::Status(state, progress) => Ok(JobStatus::new(*state, *progress)),
            Step::Fail(status) => Err(ClientError::ServerRejected {
                status: *status,
                detail: "unavailable".into(),
            }),
            Step::Missing => Err(ClientError::NotFound(job.to_string())),
        }
    }

    #[async_trait]
    impl StatusSource for Scripted {
        async fn job_status(&self, job: &JobHandle) -> Result<JobStatus, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut steps = self.steps.lock().unwrap();
            if steps.len() > 1 {
                let step = steps.pop_front().unwrap();
                respond(&step, job)
            } else {
                respond(steps.front().unwrap(), job)
            }
        }
    }

    fn options(timeout: u64, poll_interval: u64) -> MonitorOptions {
        MonitorOptions {
            timeout: Duration::from_secs(timeout),
            poll_interval: Duration::from_secs(poll_interval),
        }
    }

    fn job() -> JobHandle {
        JobHandle::new("job_1a2b3c4d")
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_on_completion_without_sleeping() {
        let source = Scripted::new(vec![
            Step::Status(JobState::Pending, 0),
            Step::Status(JobState::Running, 50),
            Step::Status(JobState::Completed, 100),
        ]);
        let start = Instant::now();

        let status = wait_for_completion(&source, &job(), options(60, 2), &CancellationToken::new(), |_| {})
            .await
            .unwrap();

        assert_eq!(status.state, JobState::Completed);
        assert_eq!(source.calls(), 3);
        // Two pauses between three polls, none after the final one.
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job_is_returned_not_raised() {
        let source = Scripted::new(vec![
            Step::Status(JobState::Running, 10),
            Step::Status(JobState::Failed, 10),
        ]);

        let status = wait_for_completion(&source, &job(), options(60, 1), &CancellationToken::new(), |_| {})
            .await
            .unwrap();

        assert_eq!(status.state, JobState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_polls_are_not_reported() {
        let source = Scripted::new(vec![
            Step::Status(JobState::Pending, 0),
            Step::Status(JobState::Pending, 0),
            Step::Status(JobState::Running, 20),
            Step::Status(JobState::Running, 20),
            Step::Status(JobState::Running, 20),
            Step::Status(JobState::Running, 60),
            Step::Status(JobState::Completed, 100),
        ]);
        let mut reported = vec![];

        wait_for_completion(&source, &job(), options(60, 1), &CancellationToken::new(), |s| {
            reported.push(s.summary())
        })
        .await
        .unwrap();

        assert_eq!(source.calls(), 7);
        assert_eq!(
            reported,
            vec![
                (JobState::Pending, 0),
                (JobState::Running, 20),
                (JobState::Running, 60),
                (JobState::Completed, 100),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_when_job_never_finishes() {
        let source = Scripted::new(vec![Step::Status(JobState::Running, 5)]);
        let start = Instant::now();

        let err = wait_for_completion(&source, &job(), options(10, 2), &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::MonitorTimeout { .. }));
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(10) && waited <= Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_consecutive_failures_abort() {
        let source = Scripted::new(vec![Step::Fail(503)]);

        let err = wait_for_completion(&source, &job(), options(60, 1), &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();

        match err {
            ClientError::TooManyFailures { attempts, source: cause, .. } => {
                assert_eq!(attempts, MAX_CONSECUTIVE_FAILURES);
                assert!(matches!(*cause, ClientError::ServerRejected { status: 503, .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let source = Scripted::new(vec![
            Step::Fail(502),
            Step::Fail(502),
            Step::Status(JobState::Running, 10),
            Step::Fail(502),
            Step::Fail(502),
            Step::Fail(502),
        ]);

        let err = wait_for_completion(&source, &job(), options(60, 1), &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::TooManyFailures { .. }));
        assert_eq!(source.calls(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_job_is_not_retried() {
        let source = Scripted::new(vec![Step::Missing]);

        let err = wait_for_completion(&source, &job(), options(60, 1), &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::NotFound(_)));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_job_ends_monitoring() {
        let source = Scripted::new(vec![
            Step::Status(JobState::Running, 30),
            Step::Status(JobState::Cancelled, 30),
        ]);

        let status = wait_for_completion(&source, &job(), options(60, 1), &CancellationToken::new(), |_| {})
            .await
            .unwrap();

        assert_eq!(status.state, JobState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_stops_at_next_pause() {
        let source = Scripted::new(vec![Step::Status(JobState::Running, 5)]);
        let interrupt = CancellationToken::new();
        interrupt.cancel();

        let err = wait_for_completion(&source, &job(), options(60, 5), &interrupt, |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Interrupted { .. }));
        assert_eq!(source.calls(), 1);
    }
}
