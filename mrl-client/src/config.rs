use std::path::PathBuf;
use std::time::Duration;

use common::storage::default_fallback_dir;
use tracing::warn;
use url::Url;

pub const ENV_HOST: &str = "MRL_COORDINATOR_HOST";
pub const ENV_PORT: &str = "MRL_COORDINATOR_PORT";
pub const ENV_STORAGE_PATH: &str = "MRL_STORAGE_PATH";
pub const ENV_FALLBACK_PATH: &str = "MRL_FALLBACK_PATH";

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_STORAGE_PATH: &str = "/mnt/mrl_shared";

/// Per-request time limits for calls to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTimeouts {
    pub connect: Duration,
    pub submit: Duration,

    /// Status, cancel, logs and worker listing.
    pub query: Duration,
    pub health: Duration,
}

impl Default for RequestTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            submit: Duration::from_secs(30),
            query: Duration::from_secs(10),
            health: Duration::from_secs(5),
        }
    }
}

/// Where the coordinator lives and where shared storage is expected.
///
/// Values come from, in order of precedence: explicit assignment, the
/// `MRL_*` environment variables, and the built-in defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Coordinator host name or address.
    pub host: String,

    /// Coordinator REST port.
    pub port: u16,

    /// Shared storage mount point.
    pub storage_path: PathBuf,

    /// Local directory used when `storage_path` is not a network mount.
    pub fallback_path: PathBuf,

    pub timeouts: RequestTimeouts,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            storage_path: PathBuf::from(DEFAULT_STORAGE_PATH),
            fallback_path: default_fallback_dir(),
            timeouts: RequestTimeouts::default(),
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by whatever is set in the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by the values `lookup` returns for the `MRL_*`
    /// variable names.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(host) = lookup(ENV_HOST).filter(|h| !h.is_empty()) {
            config.host = host;
        }
        if let Some(port) = lookup(ENV_PORT) {
            match port.parse() {
                Ok(port) => config.port = port,
                Err(e) => warn!("ignoring {ENV_PORT}={port}: {e}"),
            }
        }
        if let Some(path) = lookup(ENV_STORAGE_PATH).filter(|p| !p.is_empty()) {
            config.storage_path = PathBuf::from(path);
        }
        if let Some(path) = lookup(ENV_FALLBACK_PATH).filter(|p| !p.is_empty()) {
            config.fallback_path = PathBuf::from(path);
        }

        config
    }

    pub fn coordinator_url(&self) -> Result<Url, url::ParseError> {
        Url::parse(&format!("http://{}:{}/", self.host, self.port))
    }
}
