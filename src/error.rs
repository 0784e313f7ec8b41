/// Stage of a transfer unit an error belongs to. Used to tell operators
/// whether data moved before provenance failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Connect,
    Copy,
    SourceSize,
    DestSize,
    Record,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Connect => "connect",
            Stage::Copy => "copy",
            Stage::SourceSize => "source_size",
            Stage::DestSize => "dest_size",
            Stage::Record => "record",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured errors for listing, copying and provenance recording.
/// Per-unit variants end up in the run report; listing and preflight
/// variants abort the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    InvalidLocation(String, String),
    ConnectionError { host: String, detail: String },
    ConnectionTimeout { host: String, secs: u64 },
    RemoteListError { host: String, path: String, detail: String },
    LocalListError { path: String, detail: String },
    CopyToolMissing(String),
    CopyToolFailure { name: String, code: Option<i32>, stderr: String },
    SizeComputationError { path: String, detail: String },
    RecordWriteError { path: String, detail: String },
    WorkerPanic(String),
}

impl std::fmt::Display for TransferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use TransferError::*;
        match self {
            InvalidLocation(input, reason) => write!(f, "invalid location '{}': {}", input, reason),
            ConnectionError { host, detail } => {
                write!(f, "cannot establish SSH session to {}: {}", host, detail)
            }
            ConnectionTimeout { host, secs } => {
                write!(f, "SSH connection to {} timed out after {}s", host, secs)
            }
            RemoteListError { host, path, detail } => {
                write!(f, "remote listing of {}:{} failed: {}", host, path, detail)
            }
            LocalListError { path, detail } => {
                write!(f, "cannot list local directory {}: {}", path, detail)
            }
            CopyToolMissing(program) => write!(f, "copy tool not found in PATH: {}", program),
            CopyToolFailure { name, code, stderr } => {
                let code = code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string());
                let stderr = stderr.trim();
                if stderr.is_empty() {
                    write!(f, "copy of '{}' failed (exit {})", name, code)
                } else {
                    write!(f, "copy of '{}' failed (exit {}): {}", name, code, stderr)
                }
            }
            SizeComputationError { path, detail } => {
                write!(f, "size computation failed for {}: {}", path, detail)
            }
            RecordWriteError { path, detail } => {
                write!(f, "cannot write completion record {}: {}", path, detail)
            }
            WorkerPanic(name) => write!(f, "worker panicked while transferring '{}'", name),
        }
    }
}

impl std::error::Error for TransferError {}

impl TransferError {
    /// Stage a per-unit error is attributed to. Run-level variants map to the
    /// stage that would have needed them.
    pub fn stage(&self) -> Stage {
        use TransferError::*;
        match self {
            ConnectionError { .. } | ConnectionTimeout { .. } => Stage::Connect,
            CopyToolFailure { .. } | CopyToolMissing(_) | WorkerPanic(_) => Stage::Copy,
            SizeComputationError { .. } => Stage::SourceSize,
            RecordWriteError { .. } => Stage::Record,
            InvalidLocation(..) | RemoteListError { .. } | LocalListError { .. } => Stage::Connect,
        }
    }

    /// Variant name, stable across releases; written into failure logs.
    pub fn variant(&self) -> &'static str {
        use TransferError::*;
        match self {
            InvalidLocation(..) => "InvalidLocation",
            ConnectionError { .. } => "ConnectionError",
            ConnectionTimeout { .. } => "ConnectionTimeout",
            RemoteListError { .. } => "RemoteListError",
            LocalListError { .. } => "LocalListError",
            CopyToolMissing(_) => "CopyToolMissing",
            CopyToolFailure { .. } => "CopyToolFailure",
            SizeComputationError { .. } => "SizeComputationError",
            RecordWriteError { .. } => "RecordWriteError",
            WorkerPanic(_) => "WorkerPanic",
        }
    }

    /// Listing and preflight failures leave nothing to dispatch.
    pub fn is_fatal_for_run(&self) -> bool {
        use TransferError::*;
        matches!(
            self,
            InvalidLocation(..) | RemoteListError { .. } | LocalListError { .. } | CopyToolMissing(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_failure_display_includes_stderr() {
        let e = TransferError::CopyToolFailure {
            name: "2023-01-01".to_string(),
            code: Some(23),
            stderr: "rsync: link_stat failed\n".to_string(),
        };
        assert_eq!(e.to_string(), "copy of '2023-01-01' failed (exit 23): rsync: link_stat failed");
        assert_eq!(e.stage(), Stage::Copy);
    }

    #[test]
    fn copy_failure_without_code_is_signal() {
        let e = TransferError::CopyToolFailure {
            name: "run".to_string(),
            code: None,
            stderr: String::new(),
        };
        assert_eq!(e.to_string(), "copy of 'run' failed (exit signal)");
    }

    #[test]
    fn fatal_classification() {
        assert!(
            TransferError::RemoteListError {
                host: "h".into(),
                path: "/p".into(),
                detail: "exit 2".into()
            }
            .is_fatal_for_run()
        );
        assert!(!TransferError::ConnectionTimeout { host: "h".into(), secs: 30 }.is_fatal_for_run());
        assert!(
            !TransferError::RecordWriteError { path: "x".into(), detail: "denied".into() }
                .is_fatal_for_run()
        );
    }
}
