//! Helper functions and structures for dealing with the shared storage area.
//!
//! The coordinator and its workers read job input from `input/` and write
//! results to `output/` under a directory that the client can also reach,
//! ideally a network mount. When no such mount is present we fall back to a
//! plain local directory so that single-host setups keep working.

use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

use bytesize::ByteSize;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const INPUT_DIR: &str = "input";
pub const OUTPUT_DIR: &str = "output";

/// Name of the local directory used when no shared mount is available.
pub const FALLBACK_DIR_NAME: &str = "mrl_shared";

/// Where the mount table lives on Linux hosts.
pub const MOUNT_TABLE: &str = "/proc/mounts";

/// Filesystem types that indicate network-backed storage.
const NETWORK_FS_TYPES: &[&str] = &[
    "nfs",
    "nfs4",
    "efs",
    "cifs",
    "smb3",
    "smbfs",
    "ceph",
    "glusterfs",
    "lustre",
    "fuse.sshfs",
];

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("local file not found: {}", .0.display())]
    LocalFileMissing(PathBuf),
}

impl StorageError {
    fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}

/////////////////////////////////////////////////////////////////////////////
// Mount detection
/////////////////////////////////////////////////////////////////////////////

/// Decides whether a path is backed by network storage.
///
/// Implementations are heuristics. A wrong answer only means we use (or skip)
/// the local fallback directory, so errors should be reported as `false`.
pub trait MountDetector: Send + Sync {
    fn is_network_mount(&self, path: &Path) -> bool;
}

impl<F> MountDetector for F
where
    F: Fn(&Path) -> bool + Send + Sync,
{
    fn is_network_mount(&self, path: &Path) -> bool {
        self(path)
    }
}

/// A single line of the mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub device: String,
    pub mount_point: PathBuf,
    pub fs_type: String,
}

impl MountEntry {
    pub fn is_network(&self) -> bool {
        NETWORK_FS_TYPES.contains(&self.fs_type.as_str()) || self.device.contains(".efs.")
    }
}

/// Parsed mount table, in `/proc/mounts` format.
#[derive(Debug, Clone, Default)]
pub struct MountTable {
    entries: Vec<MountEntry>,
}

impl MountTable {
    pub fn parse(contents: &str) -> Self {
        let entries = contents
            .lines()
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                let device = fields.next()?;
                let mount_point = fields.next()?;
                let fs_type = fields.next()?;
                Some(MountEntry {
                    device: device.to_string(),
                    mount_point: PathBuf::from(unescape_mount_field(mount_point)),
                    fs_type: fs_type.to_string(),
                })
            })
            .collect();

        Self { entries }
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        Ok(Self::parse(&fs::read_to_string(path)?))
    }

    pub fn entries(&self) -> &[MountEntry] {
        &self.entries
    }

    /// The entry mounted exactly at `path`, if any. Later mounts shadow
    /// earlier ones, so the last match wins.
    pub fn find(&self, path: &Path) -> Option<&MountEntry> {
        self.entries.iter().rev().find(|e| e.mount_point == path)
    }
}

/// The mount table escapes whitespace in paths as octal sequences (`\040`).
fn unescape_mount_field(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            let digits: String = chars.clone().take(3).collect();
            if digits.len() == 3 {
                if let Ok(code) = u8::from_str_radix(&digits, 8) {
                    out.push(code as char);
                    chars.nth(2);
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}

/// Two-signal detector: a network entry in the mount table, OR a non-zero
/// filesystem id from `statvfs`. Either one is enough.
#[derive(Debug, Clone)]
pub struct HeuristicDetector {
    mount_table: PathBuf,
}

impl Default for HeuristicDetector {
    fn default() -> Self {
        Self {
            mount_table: PathBuf::from(MOUNT_TABLE),
        }
    }
}

impl HeuristicDetector {
    pub fn with_mount_table(mount_table: impl Into<PathBuf>) -> Self {
        Self {
            mount_table: mount_table.into(),
        }
    }

    fn listed_as_network(&self, path: &Path) -> bool {
        match MountTable::load(&self.mount_table) {
            Ok(table) => table.find(path).is_some_and(MountEntry::is_network),
            Err(e) => {
                debug!("could not read mount table {}: {e}", self.mount_table.display());
                false
            }
        }
    }

    fn has_filesystem_id(&self, path: &Path) -> bool {
        match nix::sys::statvfs::statvfs(path) {
            Ok(stat) => stat.filesystem_id() != 0,
            Err(e) => {
                debug!("statvfs failed for {}: {e}", path.display());
                false
            }
        }
    }
}

impl MountDetector for HeuristicDetector {
    fn is_network_mount(&self, path: &Path) -> bool {
        if !path.exists() {
            return false;
        }
        let path = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());

        self.listed_as_network(&path) || self.has_filesystem_id(&path)
    }
}

/////////////////////////////////////////////////////////////////////////////
// Resolution
/////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// Shared storage detected on a network filesystem.
    NetworkMounted,

    /// A plain local directory, used when no shared mount was found.
    LocalFallback,
}

/// The resolved shared storage root. `input/` and `output/` always exist
/// beneath it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLocation {
    root: PathBuf,
    kind: StorageKind,
}

/// Picks the storage root: the configured path when it is a network mount,
/// otherwise the local fallback directory, created if needed.
pub struct StorageResolver {
    configured: PathBuf,
    fallback: PathBuf,
    detector: Box<dyn MountDetector>,
}

impl StorageResolver {
    pub fn new(configured: impl Into<PathBuf>, fallback: impl Into<PathBuf>) -> Self {
        Self {
            configured: configured.into(),
            fallback: fallback.into(),
            detector: Box::new(HeuristicDetector::default()),
        }
    }

    /// Replace the default mount heuristics.
    pub fn with_detector(mut self, detector: impl MountDetector + 'static) -> Self {
        self.detector = Box::new(detector);
        self
    }

    pub fn resolve(&self) -> Result<StorageLocation, StorageError> {
        if self.configured.exists() && self.detector.is_network_mount(&self.configured) {
            info!("using network storage at {}", self.configured.display());
            return StorageLocation::establish(&self.configured, StorageKind::NetworkMounted);
        }

        if self.fallback.is_dir() {
            info!(
                "{} is not a network mount, using local storage at {}",
                self.configured.display(),
                self.fallback.display()
            );
        } else {
            warn!(
                "no shared storage at {}; created local directory {} (degraded mode)",
                self.configured.display(),
                self.fallback.display()
            );
        }

        StorageLocation::establish(&self.fallback, StorageKind::LocalFallback)
    }
}

/// `<directory of the executable>/../mrl_shared`, or `./mrl_shared` when the
/// executable path is unknown.
pub fn default_fallback_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent()?.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(FALLBACK_DIR_NAME)
}

impl StorageLocation {
    /// Adopt `root`, creating it and its `input/` and `output/` directories
    /// when missing.
    fn establish(root: &Path, kind: StorageKind) -> Result<Self, StorageError> {
        for dir in [INPUT_DIR, OUTPUT_DIR] {
            let path = root.join(dir);
            fs::create_dir_all(&path).map_err(|e| StorageError::io(&path, e))?;
        }

        Ok(Self {
            root: root.to_path_buf(),
            kind,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn kind(&self) -> StorageKind {
        self.kind
    }

    pub fn input_dir(&self) -> PathBuf {
        self.root.join(INPUT_DIR)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join(OUTPUT_DIR)
    }

    /// Absolute path of a storage-relative reference such as
    /// `output/job_1/part-00000`. For references that come from the
    /// coordinator use [`StorageLocation::locate`].
    pub fn path_of(&self, reference: &str) -> PathBuf {
        self.root.join(reference.trim_start_matches('/'))
    }

    /// Resolve a file reference reported by the coordinator.
    ///
    /// Relative references are taken from the root. Absolute ones are used
    /// as they are, but only when they lie under the root. Anything with a
    /// `..` component is refused.
    pub fn locate(&self, reference: &str) -> Option<PathBuf> {
        let path = Path::new(reference);
        if path.components().any(|c| c == Component::ParentDir) {
            return None;
        }
        if path.is_relative() {
            return Some(self.root.join(path));
        }

        let under_root = path.starts_with(&self.root)
            || fs::canonicalize(&self.root).is_ok_and(|root| path.starts_with(root));
        under_root.then(|| path.to_path_buf())
    }

    /// Copy a local file into `input/` and return its storage-relative
    /// reference.
    pub fn upload(&self, local_file: &Path, remote_name: Option<&str>) -> Result<String, StorageError> {
        if !local_file.is_file() {
            return Err(StorageError::LocalFileMissing(local_file.to_path_buf()));
        }

        let name = match remote_name {
            Some(name) => name.to_string(),
            None => local_file
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .ok_or_else(|| StorageError::LocalFileMissing(local_file.to_path_buf()))?,
        };

        let input_dir = self.input_dir();
        fs::create_dir_all(&input_dir).map_err(|e| StorageError::io(&input_dir, e))?;

        let remote_path = input_dir.join(&name);
        let size = copy_with_metadata(local_file, &remote_path)?;
        info!(
            "uploaded {} -> {} ({})",
            local_file.display(),
            remote_path.display(),
            ByteSize(size)
        );

        Ok(format!("{INPUT_DIR}/{name}"))
    }

    /// Regular files directly inside a storage-relative directory, as
    /// storage-relative references, sorted. A missing directory yields
    /// nothing.
    pub fn list_files(&self, dir: &str) -> Result<Vec<String>, StorageError> {
        let dir_path = self.path_of(dir);
        if !dir_path.is_dir() {
            return Ok(vec![]);
        }

        let entries = fs::read_dir(&dir_path).map_err(|e| StorageError::io(&dir_path, e))?;
        let mut files = vec![];
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(&dir_path, e))?;
            if entry.path().is_file() {
                let name = entry.file_name().to_string_lossy().into_owned();
                files.push(format!("{}/{}", dir.trim_end_matches('/'), name));
            }
        }
        files.sort();

        Ok(files)
    }

    /// Regular files directly under `output/` whose names match a glob
    /// pattern, as storage-relative references, sorted.
    pub fn glob_output(&self, pattern: &str) -> Result<Vec<String>, StorageError> {
        let output_dir = self.output_dir();
        let escaped_root = glob::Pattern::escape(&output_dir.to_string_lossy());
        let full_pattern = format!("{escaped_root}/{pattern}");

        let paths = glob::glob(&full_pattern).map_err(|e| {
            StorageError::io(&output_dir, io::Error::new(io::ErrorKind::InvalidInput, e))
        })?;

        let mut files: Vec<String> = paths
            .flatten()
            .filter(|path| path.is_file())
            .filter_map(|path| {
                path.file_name()
                    .map(|name| format!("{OUTPUT_DIR}/{}", name.to_string_lossy()))
            })
            .collect();
        files.sort();

        Ok(files)
    }
}

/// Copy contents, permissions and modification time. Returns the number of
/// bytes copied.
pub fn copy_with_metadata(source: &Path, destination: &Path) -> Result<u64, StorageError> {
    let size = fs::copy(source, destination).map_err(|e| StorageError::io(source, e))?;

    let modified = fs::metadata(source)
        .and_then(|meta| meta.modified())
        .map_err(|e| StorageError::io(source, e))?;
    File::options()
        .write(true)
        .open(destination)
        .and_then(|file| file.set_modified(modified))
        .map_err(|e| StorageError::io(destination, e))?;

    Ok(size)
}
