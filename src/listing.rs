use std::path::Path;

use crate::TransferError;
use crate::config::{Credentials, SshOptions};
use crate::location::Location;
use crate::transfer::session::{command_error, connect_session, exec_command};

/// Immediate child directories of `location`, in no particular order.
pub fn list_children(
    location: &Location,
    creds: &Credentials,
    opts: &SshOptions,
) -> Result<Vec<String>, TransferError> {
    match location {
        Location::Local { path } => list_local(path),
        Location::Remote { host, path } => list_remote(host, path, creds, opts),
    }
}

/// Directories directly under `path`. Symlinks to directories count as
/// directories; hidden entries are kept; names that are not UTF-8 are
/// skipped with a warning.
pub fn list_local(path: &Path) -> Result<Vec<String>, TransferError> {
    let err = |e: std::io::Error| TransferError::LocalListError {
        path: path.display().to_string(),
        detail: e.to_string(),
    };
    let mut names = Vec::new();
    for ent in std::fs::read_dir(path).map_err(err)? {
        let ent = ent.map_err(err)?;
        // metadata follows symlinks
        let is_dir = std::fs::metadata(ent.path()).map(|m| m.is_dir()).unwrap_or(false);
        if !is_dir {
            continue;
        }
        match ent.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(raw) => tracing::warn!("skipping non UTF-8 directory name {:?} in {}", raw, path.display()),
        }
    }
    Ok(names)
}

/// Children reported by `ls -1 <path>` on `host`.
pub fn list_remote(
    host: &str,
    path: &str,
    creds: &Credentials,
    opts: &SshOptions,
) -> Result<Vec<String>, TransferError> {
    let sess = connect_session(host, creds, opts)?;
    let command = remote_list_command(path);
    tracing::debug!("{}: {}", host, command);
    let out = exec_command(&sess, &command).map_err(|e| command_error(host, opts, e))?;
    if out.exit_status != 0 {
        let stderr = out.stderr.trim();
        return Err(TransferError::RemoteListError {
            host: host.to_string(),
            path: path.to_string(),
            detail: if stderr.is_empty() {
                format!("exit status {}", out.exit_status)
            } else {
                format!("exit status {}: {}", out.exit_status, stderr)
            },
        });
    }
    Ok(parse_listing(&out.stdout, &format!("{}:{}", host, path)))
}

pub fn remote_list_command(path: &str) -> String {
    format!("ls -1 {}", shell_quote_path(path))
}

/// One name per line; blank lines and `\r` line endings are dropped. Names
/// that are not UTF-8 are skipped with a warning, as the local lister does.
pub fn parse_listing(stdout: &[u8], origin: &str) -> Vec<String> {
    let mut names = Vec::new();
    for line in stdout.split(|b| *b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        match std::str::from_utf8(line) {
            Ok(name) => names.push(name.to_string()),
            Err(_) => tracing::warn!(
                "skipping non UTF-8 directory name {:?} in {}",
                String::from_utf8_lossy(line),
                origin
            ),
        }
    }
    names
}

/// Single-quote a path for a POSIX shell. A leading `~` or `~/` stays
/// outside the quotes so the remote shell still expands it.
pub fn shell_quote_path(path: &str) -> String {
    fn quote(s: &str) -> String {
        format!("'{}'", s.replace('\'', "'\\''"))
    }
    if path == "~" {
        return "~".to_string();
    }
    if let Some(rest) = path.strip_prefix("~/") {
        return if rest.is_empty() { "~/".to_string() } else { format!("~/{}", quote(rest)) };
    }
    quote(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_listing_drops_blank_entries() {
        assert_eq!(
            parse_listing(b"2023-01-01\n2023-02-01\n\n2023-03-01\n", "seq01:/runs"),
            vec!["2023-01-01", "2023-02-01", "2023-03-01"]
        );
        assert_eq!(parse_listing(b"a\r\nb\r\n", "seq01:/runs"), vec!["a", "b"]);
        assert!(parse_listing(b"", "seq01:/runs").is_empty());
    }

    #[test]
    fn parse_listing_skips_non_utf8_names() {
        let stdout = b"2023-01-01\nrun-\xff\xfe\n2023-02-01\n";
        assert_eq!(parse_listing(stdout, "seq01:/runs"), vec!["2023-01-01", "2023-02-01"]);
    }

    #[test]
    fn quoting_keeps_tilde_expandable() {
        assert_eq!(shell_quote_path("/data/runs"), "'/data/runs'");
        assert_eq!(shell_quote_path("~/runs"), "~/'runs'");
        assert_eq!(shell_quote_path("~"), "~");
        assert_eq!(shell_quote_path("/data/it's here"), "'/data/it'\\''s here'");
        assert_eq!(remote_list_command("/data/runs"), "ls -1 '/data/runs'");
    }

    #[test]
    fn local_listing_keeps_only_directories() {
        let dir = tempfile::tempdir().unwrap();
        for d in ["2023-01-01", "2023-02-01", ".hidden"] {
            std::fs::create_dir(dir.path().join(d)).unwrap();
        }
        std::fs::write(dir.path().join("README.txt"), b"notes").unwrap();
        let mut names = list_local(dir.path()).unwrap();
        names.sort();
        assert_eq!(names, vec![".hidden", "2023-01-01", "2023-02-01"]);
    }

    #[cfg(unix)]
    #[test]
    fn local_listing_follows_directory_symlinks() {
        let outside = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("real")).unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("linked")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("missing"), dir.path().join("dangling")).unwrap();
        let mut names = list_local(dir.path()).unwrap();
        names.sort();
        assert_eq!(names, vec!["linked", "real"]);
    }

    #[test]
    fn missing_local_source_is_list_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = list_local(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, TransferError::LocalListError { .. }));
        assert!(err.is_fatal_for_run());
    }
}
