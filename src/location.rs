use std::path::{Path, PathBuf};

use crate::TransferError;

/// Source or destination of a run. Parsed once from the command line; the
/// rest of the crate dispatches on the variant instead of re-inspecting
/// strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Local { path: PathBuf },
    Remote { host: String, path: String },
}

impl Location {
    /// Parse `host:path` or a plain local path.
    ///
    /// A `:` counts as the host separator only when it appears before any
    /// `/`, so `./a:b` and `/data/x:y` stay local. On Windows a drive prefix
    /// (`C:\data`) is never a host; elsewhere `h:/data` names host `h`.
    pub fn parse(input: &str) -> Result<Self, TransferError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(TransferError::InvalidLocation(input.to_string(), "empty".to_string()));
        }
        if !is_remote_spec(trimmed) {
            return Ok(Location::Local { path: PathBuf::from(trimmed) });
        }
        let Some((host, path)) = trimmed.split_once(':') else {
            return Ok(Location::Local { path: PathBuf::from(trimmed) });
        };
        let host = host.trim();
        let path = path.trim();
        if host.is_empty() {
            return Err(TransferError::InvalidLocation(input.to_string(), "empty host".to_string()));
        }
        if path.is_empty() {
            return Err(TransferError::InvalidLocation(input.to_string(), "empty path".to_string()));
        }
        Ok(Location::Remote { host: host.to_string(), path: normalize_path(path, false) })
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Location::Remote { .. })
    }

    pub fn host(&self) -> Option<&str> {
        match self {
            Location::Remote { host, .. } => Some(host),
            Location::Local { .. } => None,
        }
    }

    /// Argument handed to the copy tool for child `name`.
    pub fn child_arg(&self, name: &str) -> String {
        match self {
            Location::Local { path } => path.join(name).to_string_lossy().to_string(),
            Location::Remote { host, path } => format!("{}:{}", host, join_remote(path, name)),
        }
    }

    /// Local directory, or an error naming the input when the location is
    /// remote. Destinations are always local.
    pub fn require_local(&self) -> Result<&Path, TransferError> {
        match self {
            Location::Local { path } => Ok(path),
            Location::Remote { host, path } => Err(TransferError::InvalidLocation(
                format!("{}:{}", host, path),
                "destination must be a local path".to_string(),
            )),
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Location::Local { path } => write!(f, "{}", path.display()),
            Location::Remote { host, path } => write!(f, "{}:{}", host, path),
        }
    }
}

impl std::str::FromStr for Location {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Location::parse(s)
    }
}

/// Join a remote (always `/`-separated) directory with a child name.
pub fn join_remote(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        return name.to_string();
    }
    format!("{}/{}", dir.trim_end_matches('/'), name)
}

// `C:\x` or `C:/x`, only meaningful on Windows; elsewhere `h:/x` is a host
fn is_windows_drive(s: &str) -> bool {
    if !cfg!(windows) {
        return false;
    }
    let bytes = s.as_bytes();
    bytes.len() >= 2
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes.len() == 2 || matches!(bytes[2], b'\\' | b'/'))
}

fn is_remote_spec(s: &str) -> bool {
    if is_windows_drive(s) {
        return false;
    }
    match (s.find(':'), s.find('/')) {
        (Some(colon), Some(slash)) => colon < slash,
        (Some(_), None) => true,
        _ => false,
    }
}

/// Collapse repeated slashes and optionally strip a trailing one (keeping
/// root `/`).
pub fn normalize_path(p: &str, preserve_trailing_slash: bool) -> String {
    if p.is_empty() {
        return String::new();
    }
    let mut s = p.to_string();
    while s.contains("//") {
        s = s.replace("//", "/");
    }
    if !preserve_trailing_slash {
        while s.len() > 1 && s.ends_with('/') {
            s.pop();
        }
    }
    s
}
