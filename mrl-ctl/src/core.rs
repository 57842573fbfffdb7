use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use bytesize::ByteSize;
use common::{JobConfig, JobHandle, JobParameters, JobState, JobStatus};
use mrl_client::{ClientError, MonitorOptions, MrlClient, WorkerSummary};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::args::{SampleKind, SubmitArgs, WatchArgs};

/// Exit status after a Ctrl-C outside monitoring (128 + SIGINT).
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Task count cap used when the worker list is unavailable.
const DEFAULT_MAX_TASKS: u32 = 4;
const PREVIEW_LINES: usize = 10;

pub async fn status(client: &MrlClient) -> Result<()> {
    let health = client.health().await.with_context(|| {
        format!(
            "cannot reach the coordinator at {}",
            client.coordinator().base_url()
        )
    })?;

    println!("[Coordinator]");
    println!("status: {}", health.status);
    println!("active workers: {}", health.active_workers);
    println!("uptime: {}", health.uptime.as_deref().unwrap_or("N/A"));

    let workers = client.list_workers().await?;
    println!();
    println!("[Workers]");
    print_workers(&workers);

    Ok(())
}

pub async fn submit(client: &MrlClient, args: SubmitArgs) -> Result<()> {
    println!("1. Checking the coordinator...");
    let health = client.health().await.with_context(|| {
        format!(
            "cannot reach the coordinator at {}; verify it is running",
            client.coordinator().base_url()
        )
    })?;
    println!(
        "coordinator is {} ({} active workers, uptime {})",
        health.status,
        health.active_workers,
        health.uptime.as_deref().unwrap_or("N/A")
    );

    println!("\n2. Checking workers...");
    let max_tasks = match client.list_workers().await {
        Ok(workers) if workers.is_empty() => bail!("no active workers registered"),
        Ok(workers) => {
            print_workers(&workers);
            u32::try_from(workers.len()).unwrap_or(u32::MAX)
        }
        Err(e) => {
            warn!("could not list workers: {e}");
            DEFAULT_MAX_TASKS
        }
    };

    println!("\n3. Uploading {}", args.input.display());
    let input = client
        .upload_file(&args.input, None)
        .with_context(|| format!("failed to upload {}", args.input.display()))?;
    println!("uploaded as {input}");

    let parameters = JobParameters {
        map_tasks: Some(args.map_tasks.min(max_tasks)),
        reduce_tasks: Some(args.reduce_tasks.min(max_tasks)),
        pattern: args.pattern,
    };
    let config = JobConfig::new(args.job_type, vec![input], parameters)?;

    println!("\n4. Submitting {} job...", config.job_type());
    println!("map tasks: {}", config.parameters().map_tasks.unwrap_or_default());
    println!("reduce tasks: {}", config.parameters().reduce_tasks.unwrap_or_default());
    let job = client.submit_job(&config).await?;
    println!("job id: {job}");

    println!("\n5. Monitoring...");
    let status = watch(client, &job, args.watch.monitor_options()).await?;
    finish(client, &job, status, &args.watch).await
}

pub async fn monitor(client: &MrlClient, job_id: String, args: WatchArgs) -> Result<()> {
    let job = JobHandle::new(job_id);
    println!("Monitoring job {job}");

    let status = watch(client, &job, args.monitor_options()).await?;
    finish(client, &job, status, &args).await
}

pub async fn cancel(client: &MrlClient, job_id: String) -> Result<()> {
    let job = JobHandle::new(job_id);
    client.cancel_job(&job).await?;
    println!("job {job} cancelled");
    Ok(())
}

pub async fn logs(client: &MrlClient, job_id: String) -> Result<()> {
    let logs = client.job_logs(&JobHandle::new(job_id)).await?;
    println!("{logs}");
    Ok(())
}

pub fn sample(kind: SampleKind, path: &Path) -> Result<()> {
    let lines = sample_lines(kind);
    fs::write(path, lines.join("\n"))
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("wrote {} ({} lines)", path.display(), lines.len());
    Ok(())
}

/// Wait for `job`, cancelling it on the coordinator if the user hits Ctrl-C.
/// The cancel request goes out once the status check in flight returns.
///
/// Once `ctrl_c` has been awaited the process keeps its SIGINT handler, so
/// the listener stays alive after monitoring: any later Ctrl-C ends the
/// process.
async fn watch(client: &MrlClient, job: &JobHandle, options: MonitorOptions) -> Result<JobStatus> {
    let interrupt = CancellationToken::new();
    tokio::spawn({
        let interrupt = interrupt.clone();
        async move {
            while signal::ctrl_c().await.is_ok() {
                if !interrupt_monitoring(&interrupt) {
                    std::process::exit(INTERRUPTED_EXIT_CODE);
                }
            }
        }
    });

    let outcome = client.wait_for_completion(job, options, &interrupt).await;
    // Monitoring is over; from here on Ctrl-C exits.
    interrupt.cancel();

    match outcome {
        Ok(status) => Ok(status),
        Err(ClientError::Interrupted { .. }) => {
            println!("\nCancelling job {job}...");
            match client.cancel_job(job).await {
                Ok(()) => println!("job cancelled"),
                Err(_) => println!("could not cancel the job"),
            }
            bail!("interrupted by user")
        }
        Err(e) => {
            show_logs(client, job).await;
            Err(e.into())
        }
    }
}

async fn finish(
    client: &MrlClient,
    job: &JobHandle,
    status: JobStatus,
    args: &WatchArgs,
) -> Result<()> {
    if status.state != JobState::Completed {
        println!(
            "\nJob {job} ended as {}: {}",
            status.state,
            status.error.as_deref().unwrap_or("unknown error")
        );
        show_logs(client, job).await;
        bail!("job {job} did not complete ({})", status.state);
    }

    println!("\n6. Downloading results...");
    let result = client.download_results(job, &args.output).await?;

    let seconds = status.elapsed().unwrap_or_default().as_secs_f64();
    println!("\nJob completed in {seconds:.2}s");
    println!("result files: {}", result.len());
    for file in &result.files {
        let size = fs::metadata(file).map(|m| m.len()).unwrap_or_default();
        println!("   - {} ({})", file.display(), ByteSize(size));
    }

    if let Some(first) = result.files.first() {
        println!("\nPreview of {}:", first.display());
        match fs::read_to_string(first) {
            Ok(text) => {
                let (shown, remaining) = preview(&text, PREVIEW_LINES);
                for line in shown {
                    println!("   {line}");
                }
                if remaining > 0 {
                    println!("   [... {remaining} more lines]");
                }
            }
            Err(e) => println!("   cannot show preview: {e}"),
        }
    }

    Ok(())
}

/// React to a Ctrl-C. Returns `true` when it interrupted monitoring, and
/// `false` when monitoring was already over or interrupted.
fn interrupt_monitoring(interrupt: &CancellationToken) -> bool {
    if interrupt.is_cancelled() {
        return false;
    }
    interrupt.cancel();
    true
}

/// Best effort: a job that already failed should not also fail on its logs.
async fn show_logs(client: &MrlClient, job: &JobHandle) {
    match client.job_logs(job).await {
        Ok(logs) if !logs.trim().is_empty() => println!("\nJob logs:\n{logs}"),
        Ok(_) => {}
        Err(e) => debug!("could not fetch logs for {job}: {e}"),
    }
}

fn print_workers(workers: &[WorkerSummary]) {
    println!("active workers: {}", workers.len());
    for (i, worker) in workers.iter().enumerate() {
        println!(
            "   {}. {} @ {} - status: {} - load: {}",
            i + 1,
            worker.id,
            worker.endpoint(),
            worker.status.as_deref().unwrap_or("UNKNOWN"),
            worker
                .load
                .map_or_else(|| "N/A".to_string(), |load| load.to_string())
        );
    }
}

/// The first `limit` lines of `text` and how many lines were left out.
fn preview(text: &str, limit: usize) -> (Vec<&str>, usize) {
    let lines: Vec<&str> = text.lines().collect();
    let shown = lines.len().min(limit);
    (lines[..shown].to_vec(), lines.len() - shown)
}

fn sample_lines(kind: SampleKind) -> Vec<String> {
    match kind {
        SampleKind::Words => [
            "hello world python programming",
            "distributed systems map reduce",
            "grid computing cluster processing",
            "hello python world",
            "map reduce programming systems",
            "python grid distributed cluster",
            "world processing computing hello",
        ]
        .map(String::from)
        .to_vec(),
        SampleKind::Numbers => (1000..2000).map(|n| n.to_string()).collect(),
        SampleKind::Lines => (1..=100)
            .map(|i| format!("Line {i}: This is a test line with number {i}"))
            .collect(),
    }
}
