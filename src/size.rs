use std::collections::VecDeque;
use std::path::Path;

use walkdir::WalkDir;

use crate::TransferError;
use crate::transfer::sftp_like::{SftpError, SftpLike};

pub const BYTES_PER_GB: f64 = 1_000_000_000.0;

/// Decimal gigabytes (10^9 bytes), rounded half away from zero to five
/// places.
pub fn bytes_to_gb(bytes: u64) -> f64 {
    let gb = bytes as f64 / BYTES_PER_GB;
    (gb * 100_000.0).round() / 100_000.0
}

/// Sum of regular-file sizes under `root`. Symbolic links are neither
/// followed nor counted.
pub fn local_tree_size(root: &Path) -> Result<u64, TransferError> {
    let mut total: u64 = 0;
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| TransferError::SizeComputationError {
            path: e
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| root.display().to_string()),
            detail: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let md = entry.metadata().map_err(|e| TransferError::SizeComputationError {
            path: entry.path().display().to_string(),
            detail: e.to_string(),
        })?;
        total += md.len();
    }
    Ok(total)
}

/// Sum of sizes under a remote directory. Entries whose mode marks a
/// directory are descended into; everything else, symlinks included,
/// counts at the size the server reports.
///
/// A refused request is a `SizeComputationError`; a failed session comes
/// back as the connection error it carries.
pub fn remote_tree_size(sftp: &dyn SftpLike, root: &str) -> Result<u64, TransferError> {
    let mut total: u64 = 0;
    let mut q: VecDeque<String> = VecDeque::new();
    q.push_back(root.to_string());
    while let Some(cur) = q.pop_front() {
        let entries = sftp.read_dir(Path::new(&cur)).map_err(|e| match e {
            SftpError::Request(detail) => TransferError::SizeComputationError { path: cur.clone(), detail },
            SftpError::Session(err) => err,
        })?;
        for entry in entries {
            if entry.is_dir {
                q.push_back(crate::location::join_remote(&cur, &entry.name));
            } else {
                total += entry.size;
            }
        }
    }
    Ok(total)
}
