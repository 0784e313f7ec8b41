use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};

use crate::TransferError;
use crate::config::{Credentials, SshOptions};
use crate::transfer::sftp_like::{SftpLike, Ssh2Adapter};

// libssh2 LIBSSH2_ERROR_TIMEOUT
const SSH_ERROR_TIMEOUT: i32 = -9;

fn is_timeout(e: &ssh2::Error) -> bool {
    e.code() == ssh2::ErrorCode::Session(SSH_ERROR_TIMEOUT)
}

pub(crate) fn map_ssh_err(host: &str, opts: &SshOptions, what: &str, e: ssh2::Error) -> TransferError {
    if is_timeout(&e) {
        TransferError::ConnectionTimeout { host: host.to_string(), secs: opts.timeout.as_secs() }
    } else {
        TransferError::ConnectionError { host: host.to_string(), detail: format!("{}: {}", what, e) }
    }
}

fn map_io_err(host: &str, opts: &SshOptions, what: &str, e: std::io::Error) -> TransferError {
    if e.kind() == std::io::ErrorKind::TimedOut {
        TransferError::ConnectionTimeout { host: host.to_string(), secs: opts.timeout.as_secs() }
    } else {
        TransferError::ConnectionError { host: host.to_string(), detail: format!("{}: {}", what, e) }
    }
}

/// Map a failed remote command run (not its exit status) to a connection
/// error or timeout.
pub fn command_error(host: &str, opts: &SshOptions, e: std::io::Error) -> TransferError {
    map_io_err(host, opts, "remote command", e)
}

/// 创建并配置 TCP 连接 — resolve and connect with the configured timeout,
/// trying every resolved address in turn.
fn create_tcp_connection(host: &str, opts: &SshOptions) -> Result<TcpStream, TransferError> {
    let addrs = (host, opts.port).to_socket_addrs().map_err(|e| TransferError::ConnectionError {
        host: host.to_string(),
        detail: format!("cannot resolve address: {}", e),
    })?;
    let mut last_err: Option<std::io::Error> = None;
    for sock in addrs {
        match TcpStream::connect_timeout(&sock, opts.timeout) {
            Ok(tcp) => {
                let _ = tcp.set_read_timeout(Some(opts.timeout));
                let _ = tcp.set_write_timeout(Some(opts.timeout));
                return Ok(tcp);
            }
            Err(e) => {
                tracing::debug!("tcp connect to {} failed: {}", sock, e);
                last_err = Some(e);
            }
        }
    }
    match last_err {
        Some(e) if matches!(e.kind(), std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock) => {
            Err(TransferError::ConnectionTimeout { host: host.to_string(), secs: opts.timeout.as_secs() })
        }
        Some(e) => Err(TransferError::ConnectionError { host: host.to_string(), detail: e.to_string() }),
        None => Err(TransferError::ConnectionError {
            host: host.to_string(),
            detail: "no address resolved".to_string(),
        }),
    }
}

/// SSH 密钥认证 — public key auth with the configured key; when the key was
/// not given explicitly, the other usual key names are tried as well.
fn try_key_authentication(sess: &mut ssh2::Session, creds: &Credentials) -> bool {
    if sess.authenticated() {
        return true;
    }
    if creds.key_path.exists() {
        let _ = sess.userauth_pubkey_file(&creds.username, None, &creds.key_path, None);
        if sess.authenticated() {
            return true;
        }
    }
    if creds.key_explicit {
        return false;
    }
    if let Some(home_p) = dirs::home_dir() {
        for name in ["id_ed25519", "id_ecdsa"] {
            let p = home_p.join(".ssh").join(name);
            if p.exists() {
                let _ = sess.userauth_pubkey_file(&creds.username, None, &p, None);
                if sess.authenticated() {
                    return true;
                }
            }
        }
    }
    false
}

/// Open an authenticated session. Host keys are accepted without
/// verification, as the copy tool's ssh is told to do for new hosts.
pub fn connect_session(
    host: &str,
    creds: &Credentials,
    opts: &SshOptions,
) -> Result<ssh2::Session, TransferError> {
    let tcp = create_tcp_connection(host, opts)?;
    let mut sess = ssh2::Session::new().map_err(|e| map_ssh_err(host, opts, "session", e))?;
    sess.set_tcp_stream(tcp);
    sess.set_timeout(u32::try_from(opts.timeout.as_millis()).unwrap_or(u32::MAX));
    sess.handshake().map_err(|e| map_ssh_err(host, opts, "handshake", e))?;
    if try_key_authentication(&mut sess, creds) {
        tracing::debug!("ssh session to {}:{} as {} established", host, opts.port, creds.username);
        Ok(sess)
    } else {
        Err(TransferError::ConnectionError {
            host: host.to_string(),
            detail: format!(
                "public key authentication failed for user '{}' with {}",
                creds.username,
                creds.key_path.display()
            ),
        })
    }
}

/// Captured result of a remote command. Stdout is kept as raw bytes since
/// remote file names need not be UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_status: i32,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

/// Run one non-interactive command and wait for it to exit. libssh2 errors
/// arrive as `io::Error` (a libssh2 timeout becomes `TimedOut`).
pub fn exec_command(sess: &ssh2::Session, command: &str) -> std::io::Result<CommandOutput> {
    let mut channel = sess.channel_session()?;
    channel.exec(command)?;
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    channel.read_to_end(&mut stdout)?;
    channel.stderr().read_to_end(&mut stderr)?;
    channel.wait_close()?;
    let exit_status = channel.exit_status()?;
    Ok(CommandOutput { exit_status, stdout, stderr: String::from_utf8_lossy(&stderr).into_owned() })
}

/// Remote `$HOME`, used to turn `~/x` and relative paths into absolute ones.
pub fn remote_home(sess: &ssh2::Session) -> std::io::Result<String> {
    let out = exec_command(sess, "printf '%s' \"$HOME\"")?;
    let stdout = String::from_utf8_lossy(&out.stdout);
    Ok(stdout.lines().next().unwrap_or("").trim().to_string())
}

/// Resolve a remote path against `home`: `~` and `~/x` expand, relative
/// paths are taken relative to the login directory as SFTP does.
pub fn absolutize_remote(path: &str, home: &str) -> String {
    if path.starts_with('/') {
        return path.to_string();
    }
    let home = home.trim_end_matches('/');
    let tail = path.trim_start_matches('~').trim_start_matches('/');
    if tail.is_empty() {
        if home.is_empty() { "/".to_string() } else { home.to_string() }
    } else {
        format!("{}/{}", home, tail)
    }
}

/// What a transfer unit needs from the remote side of a run.
pub trait RemoteAccess {
    fn sftp(&mut self) -> Result<&dyn SftpLike, TransferError>;
    fn home(&mut self) -> Result<String, TransferError>;
    /// Drop any live session so the next unit starts from scratch.
    fn reset(&mut self);
}

/// Builds one lazily-connecting [`RemoteAccess`] per worker thread.
pub trait SessionFactory: Send + Sync {
    fn open(&self, host: &str) -> Box<dyn RemoteAccess>;
}

/// Session owned by a single worker. Nothing is opened until the first
/// remote call; dropping the value closes the session.
pub struct WorkerSession {
    host: String,
    creds: Credentials,
    opts: SshOptions,
    session: Option<ssh2::Session>,
    sftp: Option<Ssh2Adapter>,
    home: Option<String>,
    connects: u32,
}

impl WorkerSession {
    pub fn new(host: &str, creds: Credentials, opts: SshOptions) -> Self {
        Self {
            host: host.to_string(),
            creds,
            opts,
            session: None,
            sftp: None,
            home: None,
            connects: 0,
        }
    }

    fn ensure_session(&mut self) -> Result<&ssh2::Session, TransferError> {
        if self.session.is_none() {
            let sess = connect_session(&self.host, &self.creds, &self.opts)?;
            self.connects += 1;
            self.session = Some(sess);
        }
        self.session.as_ref().ok_or_else(|| TransferError::ConnectionError {
            host: self.host.clone(),
            detail: "session unavailable".to_string(),
        })
    }

    pub fn connects(&self) -> u32 {
        self.connects
    }
}

impl RemoteAccess for WorkerSession {
    fn sftp(&mut self) -> Result<&dyn SftpLike, TransferError> {
        if self.sftp.is_none() {
            let host = self.host.clone();
            let opts = self.opts;
            let sess = self.ensure_session()?;
            let sftp = sess.sftp().map_err(|e| map_ssh_err(&host, &opts, "sftp", e))?;
            self.sftp = Some(Ssh2Adapter { sftp, host, opts });
        }
        match self.sftp.as_ref() {
            Some(adapter) => Ok(adapter),
            None => Err(TransferError::ConnectionError {
                host: self.host.clone(),
                detail: "sftp channel unavailable".to_string(),
            }),
        }
    }

    fn home(&mut self) -> Result<String, TransferError> {
        if let Some(h) = &self.home {
            return Ok(h.clone());
        }
        let host = self.host.clone();
        let opts = self.opts;
        let sess = self.ensure_session()?;
        let home = remote_home(sess).map_err(|e| map_io_err(&host, &opts, "remote $HOME", e))?;
        self.home = Some(home.clone());
        Ok(home)
    }

    fn reset(&mut self) {
        self.sftp = None;
        self.session = None;
        self.home = None;
    }
}

/// Production factory: every worker gets its own SSH session built from the
/// run's credentials.
pub struct SshSessionFactory {
    pub creds: Credentials,
    pub opts: SshOptions,
}

impl SessionFactory for SshSessionFactory {
    fn open(&self, host: &str) -> Box<dyn RemoteAccess> {
        Box::new(WorkerSession::new(host, self.creds.clone(), self.opts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn absolutize_handles_tilde_and_relative() {
        assert_eq!(absolutize_remote("/data/runs", "/home/seq"), "/data/runs");
        assert_eq!(absolutize_remote("~/runs", "/home/seq"), "/home/seq/runs");
        assert_eq!(absolutize_remote("~", "/home/seq/"), "/home/seq");
        assert_eq!(absolutize_remote("runs/r1", "/home/seq"), "/home/seq/runs/r1");
        assert_eq!(absolutize_remote("~", ""), "/");
    }

    #[test]
    fn unreachable_host_is_connection_failure() {
        // port 1 on localhost: nothing listens there on a normal machine
        let opts = SshOptions { port: 1, timeout: Duration::from_secs(2) };
        let creds = Credentials {
            username: "nobody".to_string(),
            key_path: std::path::PathBuf::from("/nonexistent/id_rsa"),
            key_explicit: true,
        };
        match connect_session("127.0.0.1", &creds, &opts) {
            Err(TransferError::ConnectionError { .. }) | Err(TransferError::ConnectionTimeout { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected connection failure"),
        }
    }

    #[test]
    fn worker_session_is_lazy() {
        let creds = Credentials {
            username: "nobody".to_string(),
            key_path: std::path::PathBuf::from("/nonexistent/id_rsa"),
            key_explicit: true,
        };
        let ws = WorkerSession::new("127.0.0.1", creds, SshOptions::default());
        assert_eq!(ws.connects(), 0);
    }

    #[test]
    fn unresolvable_host_reports_connection_error() {
        let creds = Credentials {
            username: "nobody".to_string(),
            key_path: std::path::PathBuf::from("/nonexistent/id_rsa"),
            key_explicit: true,
        };
        let mut ws = WorkerSession::new(
            "host.invalid",
            creds,
            SshOptions { port: 22, timeout: Duration::from_secs(2) },
        );
        let err = ws.home().err().expect("resolution must fail");
        assert_eq!(err.stage(), crate::Stage::Connect);
    }
}
