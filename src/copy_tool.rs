use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::TransferError;
use crate::config::{Credentials, SshOptions};
use crate::location::Location;

/// The byte-copy step of a transfer unit. Implementations must be safe to
/// re-run on a partially or fully copied destination.
pub trait Copier: Send + Sync {
    fn copy(&self, name: &str, source: &Location, dest: &Path) -> Result<(), TransferError>;
}

/// `rsync -aq <source>/<name> <dest>` as a child process.
#[derive(Debug, Clone)]
pub struct Rsync {
    program: PathBuf,
    remote_shell: String,
}

impl Rsync {
    pub fn new(program: PathBuf, creds: &Credentials, opts: &SshOptions) -> Self {
        Self { program, remote_shell: remote_shell_command(creds, opts) }
    }

    /// Fail fast when the program cannot be found, before any unit runs.
    pub fn check_available(&self) -> Result<PathBuf, TransferError> {
        which::which(&self.program)
            .map_err(|_| TransferError::CopyToolMissing(self.program.display().to_string()))
    }

    /// Arguments after the program name. A remote source also gets `-e` so the
    /// copy logs in with the run's credentials.
    pub fn args(&self, name: &str, source: &Location, dest: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-aq".into()];
        if source.is_remote() {
            args.push("-e".into());
            args.push(self.remote_shell.clone().into());
        }
        args.push(source.child_arg(name).into());
        args.push(dest.as_os_str().to_os_string());
        args
    }
}

impl Copier for Rsync {
    fn copy(&self, name: &str, source: &Location, dest: &Path) -> Result<(), TransferError> {
        let args = self.args(name, source, dest);
        tracing::debug!("{} {:?}", self.program.display(), args);
        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| TransferError::CopyToolFailure {
                name: name.to_string(),
                code: None,
                stderr: format!("cannot start {}: {}", self.program.display(), e),
            })?;
        if output.status.success() {
            Ok(())
        } else {
            Err(TransferError::CopyToolFailure {
                name: name.to_string(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            })
        }
    }
}

/// ssh invocation handed to rsync via `-e`. Never prompts; new host keys are
/// accepted like the listing session does.
pub fn remote_shell_command(creds: &Credentials, opts: &SshOptions) -> String {
    format!(
        "ssh -l {} -i {} -p {} -o BatchMode=yes -o StrictHostKeyChecking=accept-new -o ConnectTimeout={}",
        quote_word(&creds.username),
        quote_word(&creds.key_path.to_string_lossy()),
        opts.port,
        opts.timeout.as_secs()
    )
}

// rsync splits -e on whitespace but honours single quotes
fn quote_word(s: &str) -> String {
    if !s.is_empty() && !s.chars().any(|c| c.is_whitespace() || c == '\'' || c == '"') {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn creds() -> Credentials {
        Credentials {
            username: "seq".to_string(),
            key_path: PathBuf::from("/home/seq/.ssh/id_rsa"),
            key_explicit: false,
        }
    }

    fn opts() -> SshOptions {
        SshOptions { port: 2222, timeout: Duration::from_secs(15) }
    }

    #[test]
    fn local_source_args() {
        let r = Rsync::new(PathBuf::from("rsync"), &creds(), &opts());
        let src = Location::parse("/data/runs").unwrap();
        let args = r.args("2023-01-01", &src, Path::new("/srv/runs"));
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().to_string()).collect();
        assert_eq!(args, vec!["-aq", "/data/runs/2023-01-01", "/srv/runs"]);
    }

    #[test]
    fn remote_source_args_carry_credentials() {
        let r = Rsync::new(PathBuf::from("rsync"), &creds(), &opts());
        let src = Location::parse("seq01:/data/runs").unwrap();
        let args = r.args("2023-01-01", &src, Path::new("/srv/runs"));
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().to_string()).collect();
        assert_eq!(args[0], "-aq");
        assert_eq!(args[1], "-e");
        assert!(args[2].starts_with("ssh -l seq -i /home/seq/.ssh/id_rsa -p 2222"));
        assert!(args[2].ends_with("ConnectTimeout=15"));
        assert_eq!(args[3], "seq01:/data/runs/2023-01-01");
        assert_eq!(args[4], "/srv/runs");
    }

    #[test]
    fn key_with_space_is_quoted() {
        let mut c = creds();
        c.key_path = PathBuf::from("/keys/my key");
        let cmd = remote_shell_command(&c, &opts());
        assert!(cmd.contains("-i '/keys/my key'"));
    }

    #[test]
    fn missing_program_is_reported() {
        let r = Rsync::new(PathBuf::from("definitely-not-a-copy-tool-3f9a"), &creds(), &opts());
        assert_eq!(
            r.check_available().unwrap_err(),
            TransferError::CopyToolMissing("definitely-not-a-copy-tool-3f9a".to_string())
        );
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_is_copy_failure() {
        // `false` ignores its arguments and exits 1
        let r = Rsync::new(PathBuf::from("false"), &creds(), &opts());
        let src = Location::parse("/data/runs").unwrap();
        match r.copy("r1", &src, Path::new("/srv/runs")) {
            Err(TransferError::CopyToolFailure { name, code, .. }) => {
                assert_eq!(name, "r1");
                assert_eq!(code, Some(1));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn zero_exit_is_success() {
        let r = Rsync::new(PathBuf::from("true"), &creds(), &opts());
        let src = Location::parse("/data/runs").unwrap();
        assert!(r.copy("r1", &src, Path::new("/srv/runs")).is_ok());
    }
}
