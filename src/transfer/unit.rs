use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::location::{Location, join_remote};
use crate::record::{CompletionRecord, descriptor, iso_now};
use crate::size::{local_tree_size, remote_tree_size};
use crate::transfer::TransferContext;
use crate::transfer::session::{RemoteAccess, absolutize_remote};
use crate::{Stage, TransferError};

/// Why a unit failed and whether its data had already been copied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFailure {
    pub stage: Stage,
    pub error: TransferError,
}

/// Result of one transfer unit.
#[derive(Debug, Clone)]
pub struct UnitOutcome {
    pub name: String,
    /// The copy tool finished successfully, independent of provenance.
    pub copied: bool,
    pub elapsed: Duration,
    pub result: Result<CompletionRecord, UnitFailure>,
}

impl UnitOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn failure(&self) -> Option<&UnitFailure> {
        self.result.as_ref().err()
    }

    pub(crate) fn failed(name: &str, copied: bool, elapsed: Duration, stage: Stage, error: TransferError) -> Self {
        Self { name: name.to_string(), copied, elapsed, result: Err(UnitFailure { stage, error }) }
    }
}

/// Copy `name`, measure both sides and record provenance. Stages run strictly
/// in order and the first failure ends the unit.
pub fn execute(
    name: &str,
    ctx: &TransferContext,
    mut remote: Option<&mut dyn RemoteAccess>,
) -> UnitOutcome {
    let t0 = Instant::now();
    let started = iso_now();

    if let Err(e) = ctx.copier.copy(name, &ctx.source, &ctx.dest) {
        return UnitOutcome::failed(name, false, t0.elapsed(), Stage::Copy, e);
    }
    let completed = iso_now();

    // a copied symlink would route sizing and the record into its target
    let dest_dir = ctx.dest.join(name);
    if let Ok(md) = std::fs::symlink_metadata(&dest_dir)
        && md.file_type().is_symlink()
    {
        let e = TransferError::RecordWriteError {
            path: dest_dir.display().to_string(),
            detail: "destination is a symbolic link, not a copied directory".to_string(),
        };
        return UnitOutcome::failed(name, true, t0.elapsed(), Stage::Record, e);
    }

    let (src_desc, source_bytes) = match describe_source(name, ctx, &mut remote) {
        Ok(v) => v,
        Err(e) if e.stage() == Stage::Connect => {
            // a broken session is rebuilt by the next unit on this worker
            if let Some(r) = remote.as_deref_mut() {
                r.reset();
            }
            return UnitOutcome::failed(name, true, t0.elapsed(), Stage::Connect, e);
        }
        Err(e) => return UnitOutcome::failed(name, true, t0.elapsed(), Stage::SourceSize, e),
    };

    let dest_bytes = if ctx.record_sizes {
        match local_tree_size(&dest_dir) {
            Ok(n) => Some(n),
            Err(e) => return UnitOutcome::failed(name, true, t0.elapsed(), Stage::DestSize, e),
        }
    } else {
        None
    };

    let dest_desc = descriptor(&ctx.local_host, &absolute_display(&dest_dir));
    let mut record = CompletionRecord::new(src_desc, dest_desc, started, completed);
    if let (Some(s), Some(d)) = (source_bytes, dest_bytes) {
        record = record.with_sizes(s, d);
    }

    match record.write_to(&dest_dir) {
        Ok(path) => {
            tracing::debug!("completion record written: {}", path.display());
            UnitOutcome { name: name.to_string(), copied: true, elapsed: t0.elapsed(), result: Ok(record) }
        }
        Err(e) => UnitOutcome::failed(name, true, t0.elapsed(), Stage::Record, e),
    }
}

/// Source descriptor and, when sizes are recorded, the source byte total.
fn describe_source(
    name: &str,
    ctx: &TransferContext,
    remote: &mut Option<&mut dyn RemoteAccess>,
) -> Result<(String, Option<u64>), TransferError> {
    match &ctx.source {
        Location::Local { path } => {
            let dir = path.join(name);
            let bytes = if ctx.record_sizes { Some(local_tree_size(&dir)?) } else { None };
            Ok((descriptor(&ctx.local_host, &absolute_display(&dir)), bytes))
        }
        Location::Remote { host, path } => {
            let Some(access) = remote.as_deref_mut() else {
                return Err(TransferError::ConnectionError {
                    host: host.clone(),
                    detail: "no session available for remote source".to_string(),
                });
            };
            let raw = join_remote(path, name);
            let abs = if raw.starts_with('/') { raw } else { absolutize_remote(&raw, &access.home()?) };
            let bytes = if ctx.record_sizes {
                let sftp = access.sftp()?;
                Some(remote_tree_size(sftp, &abs)?)
            } else {
                None
            };
            Ok((descriptor(host, &abs), bytes))
        }
    }
}

fn absolute_display(p: &Path) -> String {
    std::path::absolute(p).unwrap_or_else(|_| PathBuf::from(p)).display().to_string()
}
