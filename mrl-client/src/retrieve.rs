//! Finding a finished job's result files in shared storage and copying them
//! out.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use bytesize::ByteSize;
use common::storage::{copy_with_metadata, OUTPUT_DIR};
use common::{DownloadResult, JobHandle, JobState, JobStatus, StorageError, StorageLocation};
use tracing::{debug, info, warn};

use crate::error::ClientError;

/// Generic result name patterns tried after the job-specific one.
const FALLBACK_PATTERNS: [&str; 2] = ["part-*", "output-*"];

/// Storage-relative references to the job's result files.
///
/// The first non-empty answer wins:
/// 1. the `output_files` listed in the status snapshot,
/// 2. files directly under `output/<job_id>/`,
/// 3. files in `output/` whose name contains the job id, then `part-*`,
///    then `output-*`.
pub fn discover_outputs(
    job: &JobHandle,
    status: &JobStatus,
    storage: &StorageLocation,
) -> Result<Vec<String>, StorageError> {
    if !status.output_files.is_empty() {
        debug!("using {} output files listed by the coordinator", status.output_files.len());
        return Ok(status.output_files.clone());
    }

    let job_dir = format!("{OUTPUT_DIR}/{job}");
    let files = storage.list_files(&job_dir)?;
    if !files.is_empty() {
        debug!("found {} output files in {job_dir}", files.len());
        return Ok(files);
    }

    let job_pattern = format!("*{}*", glob::Pattern::escape(job.as_str()));
    let patterns = std::iter::once(job_pattern.as_str()).chain(FALLBACK_PATTERNS);
    for pattern in patterns {
        let files = storage.glob_output(pattern)?;
        if !files.is_empty() {
            debug!("found {} output files matching {pattern}", files.len());
            return Ok(files);
        }
    }

    Ok(vec![])
}

/// Copy a completed job's result files into `local_dir`.
///
/// Files that disappeared from storage, that fail to copy, or whose
/// reference points outside shared storage are skipped with a warning.
/// Files are stored flat under `local_dir`, so a later file with the same
/// name replaces an earlier one and is listed once. Finding no files at all
/// is not an error.
pub fn retrieve(
    job: &JobHandle,
    status: &JobStatus,
    storage: &StorageLocation,
    local_dir: &Path,
) -> Result<DownloadResult, ClientError> {
    if status.state != JobState::Completed {
        return Err(ClientError::JobNotComplete {
            job_id: job.to_string(),
            state: status.state,
        });
    }

    fs::create_dir_all(local_dir).map_err(|source| StorageError::Io {
        path: local_dir.to_path_buf(),
        source,
    })?;

    let references = discover_outputs(job, status, storage)?;
    if references.is_empty() {
        warn!("no output files found for job {job}");
        return Ok(DownloadResult::default());
    }

    let mut result = DownloadResult::default();
    let mut seen = HashSet::new();
    for reference in references {
        if !seen.insert(reference.clone()) {
            continue;
        }

        let Some(source) = storage.locate(&reference) else {
            warn!("skipping output reference outside shared storage: {reference}");
            continue;
        };
        let Some(file_name) = source.file_name() else {
            warn!("skipping output reference without a file name: {reference}");
            continue;
        };

        if !source.is_file() {
            warn!("output file not found in shared storage: {}", source.display());
            continue;
        }

        let destination = local_dir.join(file_name);
        match copy_with_metadata(&source, &destination) {
            Ok(size) => {
                info!(
                    "downloaded {reference} -> {} ({})",
                    destination.display(),
                    ByteSize(size)
                );
                if result.files.contains(&destination) {
                    warn!(
                        "{reference} replaced an earlier result with the same name at {}",
                        destination.display()
                    );
                } else {
                    result.files.push(destination);
                }
            }
            Err(e) => warn!("failed to download {reference}: {e}"),
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::StorageResolver;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        storage: StorageLocation,
        local: std::path::PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let storage = StorageResolver::new(dir.path().join("missing"), dir.path().join("shared"))
            .with_detector(|_: &Path| false)
            .resolve()
            .unwrap();
        let local = dir.path().join("results");
        Fixture {
            _dir: dir,
            storage,
            local,
        }
    }

    fn put(storage: &StorageLocation, reference: &str, contents: &str) {
        let path = storage.path_of(reference);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn completed() -> JobStatus {
        JobStatus::new(JobState::Completed, 100)
    }

    fn job() -> JobHandle {
        JobHandle::new("job_42")
    }

    #[test]
    fn test_embedded_list_wins_over_job_directory() {
        let f = fixture();
        put(&f.storage, "output/job_42/part-00000", "from dir");
        put(&f.storage, "output/custom/result.txt", "listed");

        let mut status = completed();
        status.output_files = vec!["output/custom/result.txt".into()];

        assert_eq!(
            discover_outputs(&job(), &status, &f.storage).unwrap(),
            vec!["output/custom/result.txt"]
        );
    }

    #[test]
    fn test_job_directory_before_patterns() {
        let f = fixture();
        put(&f.storage, "output/job_42/part-00001", "b");
        put(&f.storage, "output/job_42/part-00000", "a");
        put(&f.storage, "output/part-99999", "stale");

        assert_eq!(
            discover_outputs(&job(), &completed(), &f.storage).unwrap(),
            vec!["output/job_42/part-00000", "output/job_42/part-00001"]
        );
    }

    #[test]
    fn test_pattern_order() {
        let f = fixture();
        put(&f.storage, "output/part-00000", "p");
        put(&f.storage, "output/output-1", "o");
        assert_eq!(
            discover_outputs(&job(), &completed(), &f.storage).unwrap(),
            vec!["output/part-00000"]
        );

        put(&f.storage, "output/wordcount-job_42.txt", "j");
        assert_eq!(
            discover_outputs(&job(), &completed(), &f.storage).unwrap(),
            vec!["output/wordcount-job_42.txt"]
        );
    }

    #[test]
    fn test_output_pattern_is_last_resort() {
        let f = fixture();
        put(&f.storage, "output/output-1", "o");
        assert_eq!(
            discover_outputs(&job(), &completed(), &f.storage).unwrap(),
            vec!["output/output-1"]
        );
    }

    #[test]
    fn test_not_completed() {
        let f = fixture();
        let status = JobStatus::new(JobState::Running, 40);

        let err = retrieve(&job(), &status, &f.storage, &f.local).unwrap_err();
        assert!(matches!(
            err,
            ClientError::JobNotComplete { state: JobState::Running, .. }
        ));
    }

    #[test]
    fn test_no_outputs_is_empty_result() {
        let f = fixture();
        let result = retrieve(&job(), &completed(), &f.storage, &f.local).unwrap();
        assert!(result.is_empty());
        assert!(f.local.is_dir());
    }

    #[test]
    fn test_missing_files_are_skipped() {
        let f = fixture();
        put(&f.storage, "output/job_42/part-00000", "hello 2\nworld 1\n");

        let mut status = completed();
        status.output_files = vec![
            "output/job_42/part-00000".into(),
            "output/job_42/part-00001".into(),
        ];

        let result = retrieve(&job(), &status, &f.storage, &f.local).unwrap();
        assert_eq!(result.files, vec![f.local.join("part-00000")]);
        assert_eq!(
            fs::read_to_string(&result.files[0]).unwrap(),
            "hello 2\nworld 1\n"
        );
    }

    #[test]
    fn test_absolute_reference_under_root() {
        let f = fixture();
        put(&f.storage, "output/job_42/part-00000", "absolute");
        let absolute = f.storage.path_of("output/job_42/part-00000");

        let mut status = completed();
        status.output_files = vec![absolute.to_string_lossy().into_owned()];

        let result = retrieve(&job(), &status, &f.storage, &f.local).unwrap();
        assert_eq!(result.files, vec![f.local.join("part-00000")]);
        assert_eq!(fs::read_to_string(&result.files[0]).unwrap(), "absolute");
    }

    #[test]
    fn test_references_escaping_storage_are_skipped() {
        let f = fixture();
        put(&f.storage, "output/job_42/part-00000", "inside");
        let outside = f._dir.path().join("secret.txt");
        fs::write(&outside, "outside").unwrap();

        let mut status = completed();
        status.output_files = vec![
            outside.to_string_lossy().into_owned(),
            "output/../../secret.txt".into(),
            "output/job_42/part-00000".into(),
        ];

        let result = retrieve(&job(), &status, &f.storage, &f.local).unwrap();
        assert_eq!(result.files, vec![f.local.join("part-00000")]);
    }

    #[test]
    fn test_same_file_name_listed_once() {
        let f = fixture();
        put(&f.storage, "output/job_42/a/part-00000", "first");
        put(&f.storage, "output/job_42/b/part-00000", "second");

        let mut status = completed();
        status.output_files = vec![
            "output/job_42/a/part-00000".into(),
            "output/job_42/b/part-00000".into(),
            "output/job_42/b/part-00000".into(),
        ];

        let result = retrieve(&job(), &status, &f.storage, &f.local).unwrap();
        assert_eq!(result.files, vec![f.local.join("part-00000")]);
        assert_eq!(fs::read_to_string(&result.files[0]).unwrap(), "second");
    }

    #[test]
    fn test_modification_time_preserved() {
        let f = fixture();
        put(&f.storage, "output/job_42/part-00000", "x");
        let source = f.storage.path_of("output/job_42/part-00000");
        let before = fs::metadata(&source).unwrap().modified().unwrap();

        let result = retrieve(&job(), &completed(), &f.storage, &f.local).unwrap();
        let after = fs::metadata(&result.files[0]).unwrap().modified().unwrap();
        assert_eq!(before, after);
    }
}
