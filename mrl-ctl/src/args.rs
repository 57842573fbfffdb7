use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use common::JobType;
use mrl_client::{ClientConfig, MonitorOptions};

//
// For parsing user specified command.
//
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Coordinator host. Defaults to $MRL_COORDINATOR_HOST, then localhost.
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Coordinator port. Defaults to $MRL_COORDINATOR_PORT, then 8080.
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Shared storage mount point. Defaults to $MRL_STORAGE_PATH.
    #[arg(long, global = true)]
    pub storage_path: Option<PathBuf>,

    /// Log at debug level.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Display coordinator health and the registered workers.
    Status,
    /// Upload an input file, run a job on it and download the results.
    Submit(SubmitArgs),
    /// Wait for an already submitted job and download its results.
    Monitor {
        job_id: String,

        #[command(flatten)]
        watch: WatchArgs,
    },
    /// Ask the coordinator to cancel a job.
    Cancel { job_id: String },
    /// Print a job's logs.
    Logs { job_id: String },
    /// Write a sample input file.
    Sample {
        #[arg(short, long, value_enum, default_value_t = SampleKind::Words)]
        kind: SampleKind,

        #[arg(short, long, default_value = "test_input.txt")]
        path: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
pub struct SubmitArgs {
    /// Local input file
    #[arg(short, long)]
    pub input: PathBuf,

    #[arg(short, long, value_enum, default_value = "wordcount")]
    pub job_type: JobType,

    #[arg(long, default_value_t = 2)]
    pub map_tasks: u32,

    #[arg(long, default_value_t = 1)]
    pub reduce_tasks: u32,

    /// Search pattern, required by grep jobs
    #[arg(long)]
    pub pattern: Option<String>,

    #[command(flatten)]
    pub watch: WatchArgs,
}

#[derive(clap::Args, Debug)]
pub struct WatchArgs {
    /// Local directory the results are copied into
    #[arg(short, long, default_value = "./results")]
    pub output: PathBuf,

    /// Seconds to wait for the job before giving up
    #[arg(long, default_value_t = 300)]
    pub timeout: u64,

    /// Seconds between status checks
    #[arg(long, default_value_t = 5)]
    pub poll_interval: u64,
}

impl WatchArgs {
    pub fn monitor_options(&self) -> MonitorOptions {
        MonitorOptions {
            timeout: Duration::from_secs(self.timeout),
            poll_interval: Duration::from_secs(self.poll_interval.max(1)),
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleKind {
    Words,
    Numbers,
    Lines,
}

impl Args {
    /// Environment and defaults, overridden by whatever was given on the
    /// command line.
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::from_env();
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(storage_path) = &self.storage_path {
            config.storage_path = storage_path.clone();
        }
        config
    }
}

pub fn parse_args() -> Args {
    Args::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_defaults() {
        let args = Args::try_parse_from(["mrl-ctl", "submit", "--input", "words.txt"]).unwrap();

        let Commands::Submit(submit) = args.command else {
            panic!("expected submit");
        };
        assert_eq!(submit.job_type, JobType::WordCount);
        assert_eq!(submit.map_tasks, 2);
        assert_eq!(submit.reduce_tasks, 1);
        assert_eq!(submit.watch.output, PathBuf::from("./results"));
        assert_eq!(submit.watch.monitor_options(), MonitorOptions::default());
    }

    #[test]
    fn test_global_flags_override_config() {
        let args = Args::try_parse_from([
            "mrl-ctl", "logs", "job_1", "--host", "10.0.0.2", "--port", "9090",
        ])
        .unwrap();

        let config = args.client_config();
        assert_eq!(config.host, "10.0.0.2");
        assert_eq!(config.port, 9090);
    }

    #[test]
    fn test_job_type_by_wire_name() {
        let args = Args::try_parse_from([
            "mrl-ctl", "submit", "-i", "a.txt", "-j", "linecount",
        ])
        .unwrap();

        let Commands::Submit(submit) = args.command else {
            panic!("expected submit");
        };
        assert_eq!(submit.job_type, JobType::LineCount);
        assert!(Args::try_parse_from(["mrl-ctl", "submit", "-i", "a.txt", "-j", "join"]).is_err());
    }
}
