//! Users submit data-processing jobs (word count, sort, grep, ...) to a
//! MapReduce coordinator, and exchange input and output files with it through
//! a shared storage directory, usually a network mount visible to the
//! coordinator, its workers and the client.
//!
//! This crate holds the types shared by the client library and the command
//! line tool: job requests and their validation, status snapshots, and the
//! shared storage layout.

pub mod job;
pub mod storage;

pub use job::{
    validate, DownloadResult, JobConfig, JobHandle, JobParameters, JobRequest, JobState,
    JobStatus, JobType, ValidationError,
};
pub use storage::{
    MountDetector, StorageError, StorageKind, StorageLocation, StorageResolver,
};
