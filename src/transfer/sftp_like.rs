use std::path::Path;

use crate::TransferError;
use crate::config::SshOptions;

/// One entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub is_dir: bool,
    /// Size as reported by the server; symlinks report the link itself.
    pub size: u64,
}

/// Failure of a single SFTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SftpError {
    /// The server answered with an error status (missing path, permission).
    Request(String),
    /// The session itself failed or timed out; it must not be reused.
    Session(TransferError),
}

impl std::fmt::Display for SftpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SftpError::Request(detail) => f.write_str(detail),
            SftpError::Session(e) => write!(f, "{}", e),
        }
    }
}

/// Trait abstracting the SFTP calls the size walker needs, so tests can
/// substitute an in-memory tree for a live server.
pub trait SftpLike {
    fn read_dir(&self, p: &Path) -> Result<Vec<RemoteEntry>, SftpError>;
}

// LIBSSH2_ERROR_SFTP_PROTOCOL: a status reply, the session is still fine
const SSH_ERROR_SFTP_PROTOCOL: i32 = -31;

/// Whether an ssh2 error means the transport is gone rather than that one
/// request was refused.
pub fn is_session_failure(e: &ssh2::Error) -> bool {
    match e.code() {
        ssh2::ErrorCode::SFTP(_) => false,
        ssh2::ErrorCode::Session(code) => code != SSH_ERROR_SFTP_PROTOCOL,
    }
}

/// Adapter that owns an `ssh2::Sftp` channel together with what is needed to
/// report session failures against the right host.
pub struct Ssh2Adapter {
    pub sftp: ssh2::Sftp,
    pub host: String,
    pub opts: SshOptions,
}

impl SftpLike for Ssh2Adapter {
    fn read_dir(&self, p: &Path) -> Result<Vec<RemoteEntry>, SftpError> {
        let entries = self.sftp.readdir(p).map_err(|e| {
            if is_session_failure(&e) {
                SftpError::Session(crate::transfer::session::map_ssh_err(&self.host, &self.opts, "sftp readdir", e))
            } else {
                SftpError::Request(e.to_string())
            }
        })?;
        Ok(entries
            .into_iter()
            .filter_map(|(pathbuf, stat)| {
                let name = pathbuf.file_name()?.to_string_lossy().to_string();
                if matches!(name.as_str(), "." | "..") {
                    return None;
                }
                Some(RemoteEntry { name, is_dir: stat.is_dir(), size: stat.size.unwrap_or(0) })
            })
            .collect())
    }
}
