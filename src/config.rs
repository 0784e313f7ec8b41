use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PROCESSES: usize = 4;
pub const DEFAULT_PORT: u16 = 22;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_COPY_PROGRAM: &str = "rsync";

/// Optional per-user defaults stored at `~/.runsync/config.json`. Every field
/// may be omitted; command line flags win over anything set here.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct FileConfig {
    pub processes: Option<usize>,
    pub username: Option<String>,
    pub key_path: Option<PathBuf>,
    pub port: Option<u16>,
    pub timeout_secs: Option<u64>,
    pub rsync_path: Option<PathBuf>,
}

impl FileConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".".to_owned() + env!("CARGO_PKG_NAME")).join("config.json"))
    }

    /// Read the config file. A missing file yields defaults; a malformed one
    /// is an error since silently ignoring it would change credentials.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(e).with_context(|| format!("cannot read config {}", path.display()));
            }
        };
        serde_json::from_str(&content).with_context(|| format!("invalid config {}", path.display()))
    }
}

/// SSH login identity. Resolved once per run and cloned into each worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub key_path: PathBuf,
    /// false when the key path fell back to `~/.ssh/id_rsa`; the session
    /// then also tries the other usual key names.
    pub key_explicit: bool,
}

impl Credentials {
    pub fn resolve(username: Option<String>, key_path: Option<PathBuf>) -> Self {
        let username = username
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(crate::util::invoking_username);
        match key_path {
            Some(p) => Credentials { username, key_path: expand_home(&p), key_explicit: true },
            None => Credentials { username, key_path: default_key_path(), key_explicit: false },
        }
    }
}

pub fn default_key_path() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("~")).join(".ssh").join("id_rsa")
}

/// Expand a leading `~/` against the local home directory.
pub fn expand_home(p: &Path) -> PathBuf {
    let s = p.to_string_lossy();
    if s == "~" {
        return dirs::home_dir().unwrap_or_else(|| p.to_path_buf());
    }
    if let Some(rest) = s.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    p.to_path_buf()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SshOptions {
    pub port: u16,
    /// Bound on TCP connect and on every blocking libssh2 call.
    pub timeout: Duration,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self { port: DEFAULT_PORT, timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS) }
    }
}

/// Values the command line may override; `None` defers to the config file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub processes: Option<usize>,
    pub username: Option<String>,
    pub key_path: Option<PathBuf>,
    pub port: Option<u16>,
    pub timeout_secs: Option<u64>,
    pub rsync_path: Option<PathBuf>,
}

/// Fully resolved run settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub processes: usize,
    pub credentials: Credentials,
    pub ssh: SshOptions,
    pub rsync_path: PathBuf,
}

impl Settings {
    pub fn resolve(overrides: Overrides, file: FileConfig) -> Self {
        let processes = overrides.processes.or(file.processes).unwrap_or(DEFAULT_PROCESSES);
        let credentials = Credentials::resolve(
            overrides.username.or(file.username),
            overrides.key_path.or(file.key_path),
        );
        let ssh = SshOptions {
            port: overrides.port.or(file.port).unwrap_or(DEFAULT_PORT),
            timeout: Duration::from_secs(
                overrides.timeout_secs.or(file.timeout_secs).unwrap_or(DEFAULT_TIMEOUT_SECS).max(1),
            ),
        };
        let rsync_path = overrides
            .rsync_path
            .or(file.rsync_path)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_COPY_PROGRAM));
        Settings { processes, credentials, ssh, rsync_path }
    }
}
