use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{Local, SecondsFormat};
use serde::{Deserialize, Serialize};

use crate::TransferError;

pub const RECORD_FILE_NAME: &str = "transfer_complete.json";
pub const OPERATION: &str = "data_migration";

/// Provenance written into each copied directory once its unit completes.
/// Field order is the on-disk key order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CompletionRecord {
    pub operation: String,
    pub src: String,
    pub dest: String,
    pub timestamp_transfer_start: String,
    pub timestamp_transfer_complete: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub total_size_on_source_gb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub total_size_on_destination_gb: Option<f64>,
}

impl CompletionRecord {
    pub fn new(src: String, dest: String, started: String, completed: String) -> Self {
        Self {
            operation: OPERATION.to_string(),
            src,
            dest,
            timestamp_transfer_start: started,
            timestamp_transfer_complete: completed,
            total_size_on_source_gb: None,
            total_size_on_destination_gb: None,
        }
    }

    pub fn with_sizes(mut self, source_bytes: u64, dest_bytes: u64) -> Self {
        self.total_size_on_source_gb = Some(crate::size::bytes_to_gb(source_bytes));
        self.total_size_on_destination_gb = Some(crate::size::bytes_to_gb(dest_bytes));
        self
    }

    /// Two-space indented JSON with a trailing newline.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let mut s = serde_json::to_string_pretty(self)?;
        s.push('\n');
        Ok(s)
    }

    /// Write `transfer_complete.json` into `dir`, replacing any previous
    /// record. The text goes to a hidden sibling first and is renamed into
    /// place, so readers never see a half-written file.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, TransferError> {
        let target = dir.join(RECORD_FILE_NAME);
        let err = |detail: String| TransferError::RecordWriteError {
            path: target.display().to_string(),
            detail,
        };
        let body = self.to_json().map_err(|e| err(e.to_string()))?;
        let tmp = dir.join(format!(".{}.{}.tmp", RECORD_FILE_NAME, std::process::id()));
        let write_tmp = || -> std::io::Result<()> {
            let mut f = std::fs::File::create(&tmp)?;
            f.write_all(body.as_bytes())?;
            f.sync_all()?;
            Ok(())
        };
        if let Err(e) = write_tmp() {
            let _ = std::fs::remove_file(&tmp);
            return Err(err(e.to_string()));
        }
        if let Err(e) = std::fs::rename(&tmp, &target) {
            let _ = std::fs::remove_file(&tmp);
            return Err(err(e.to_string()));
        }
        Ok(target)
    }

    pub fn read_from(dir: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(dir.join(RECORD_FILE_NAME))?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Current local time, ISO-8601 with UTC offset and microseconds.
pub fn iso_now() -> String {
    Local::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// `host:path` descriptor used for both record ends.
pub fn descriptor(host: &str, path: &str) -> String {
    format!("{}:{}", host, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CompletionRecord {
        CompletionRecord::new(
            "seq01:/data/runs/2023-01-01".to_string(),
            "archive:/srv/runs/2023-01-01".to_string(),
            "2023-01-02T10:00:00.000000+01:00".to_string(),
            "2023-01-02T10:05:00.000000+01:00".to_string(),
        )
    }

    #[test]
    fn json_layout_matches_record_format() {
        let json = sample().with_sizes(1_000_000_000, 1_234_560).to_json().unwrap();
        let expected = concat!(
            "{\n",
            "  \"operation\": \"data_migration\",\n",
            "  \"src\": \"seq01:/data/runs/2023-01-01\",\n",
            "  \"dest\": \"archive:/srv/runs/2023-01-01\",\n",
            "  \"timestamp_transfer_start\": \"2023-01-02T10:00:00.000000+01:00\",\n",
            "  \"timestamp_transfer_complete\": \"2023-01-02T10:05:00.000000+01:00\",\n",
            "  \"total_size_on_source_gb\": 1.0,\n",
            "  \"total_size_on_destination_gb\": 0.00123\n",
            "}\n",
        );
        assert_eq!(json, expected);
    }

    #[test]
    fn sizes_omitted_when_not_computed() {
        let json = sample().to_json().unwrap();
        assert!(!json.contains("total_size"));
        assert!(json.ends_with("}\n"));
    }

    #[test]
    fn write_overwrites_previous_record() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(RECORD_FILE_NAME), "stale content that is much longer").unwrap();
        let rec = sample().with_sizes(10, 10);
        let path = rec.write_to(dir.path()).unwrap();
        let back = CompletionRecord::read_from(dir.path()).unwrap();
        assert_eq!(back, rec);
        assert_eq!(path, dir.path().join(RECORD_FILE_NAME));
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn write_into_missing_dir_is_record_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = sample().write_to(&dir.path().join("not-copied")).unwrap_err();
        assert!(matches!(err, TransferError::RecordWriteError { .. }));
        assert_eq!(err.stage(), crate::Stage::Record);
    }

    #[test]
    fn iso_now_has_offset() {
        let ts = iso_now();
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok(), "not rfc3339: {ts}");
    }
}
