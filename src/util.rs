use std::fs::OpenOptions;
use std::io::{IsTerminal, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use cli_table::{Cell, CellStruct, Style, Table, format::Justify, print_stdout};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use owo_colors::OwoColorize;

use crate::transfer::RunReport;

/// Try to enable ANSI escape sequence support on Windows consoles.
#[cfg(windows)]
pub fn try_enable_ansi_on_windows() -> bool {
    enable_ansi_support::enable_ansi_support().is_ok()
}

#[cfg(not(windows))]
pub fn try_enable_ansi_on_windows() -> bool {
    true
}

/// Name of this machine as written into completion records.
pub fn local_hostname() -> String {
    os_hostname().unwrap_or_else(|| env_fallback(&["HOSTNAME", "COMPUTERNAME"], "localhost"))
}

/// Login name of the user running the process; never empty.
pub fn invoking_username() -> String {
    os_username().unwrap_or_else(|| env_fallback(&["USER", "USERNAME", "LOGNAME"], "unknown"))
}

#[cfg(unix)]
fn os_hostname() -> Option<String> {
    let name = nix::unistd::gethostname().ok()?;
    name.to_str().filter(|s| !s.is_empty()).map(|s| s.to_string())
}

#[cfg(not(unix))]
fn os_hostname() -> Option<String> {
    None
}

#[cfg(unix)]
fn os_username() -> Option<String> {
    let user = nix::unistd::User::from_uid(nix::unistd::getuid()).ok()??;
    Some(user.name).filter(|n| !n.is_empty())
}

#[cfg(not(unix))]
fn os_username() -> Option<String> {
    None
}

fn env_fallback(keys: &[&str], default: &str) -> String {
    keys.iter()
        .filter_map(|k| std::env::var(k).ok())
        .find(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Progress bar counting finished units on stderr, or a hidden bar when
/// output is suppressed or stderr is not a terminal.
pub fn unit_progress(total: usize, hidden: bool) -> ProgressBar {
    if hidden || !std::io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::with_draw_target(Some(total as u64), ProgressDrawTarget::stderr());
    // 进度条模板 — progress template
    match ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} units") {
        Ok(style) => pb.set_style(style.progress_chars("=> ")),
        Err(e) => tracing::debug!("invalid progress template: {}", e),
    }
    let _ = try_enable_ansi_on_windows();
    pb
}

/// Per-unit result table followed by a one-line total.
pub fn print_summary(report: &RunReport) {
    if !report.is_empty() {
        let title = vec![
            "Name".cell().bold(true),
            "Status".cell().bold(true),
            "Stage".cell().bold(true),
            "Source GB".cell().bold(true),
            "Dest GB".cell().bold(true),
            "Elapsed".cell().bold(true),
        ];
        let mut table: Vec<Vec<CellStruct>> = Vec::new();
        for o in &report.outcomes {
            let (status, stage, src_gb, dest_gb) = match &o.result {
                Ok(rec) => (
                    "ok".to_string(),
                    "-".to_string(),
                    fmt_gb(rec.total_size_on_source_gb),
                    fmt_gb(rec.total_size_on_destination_gb),
                ),
                Err(f) => (
                    if o.copied { "copied, no record" } else { "failed" }.to_string(),
                    f.stage.to_string(),
                    "-".to_string(),
                    "-".to_string(),
                ),
            };
            table.push(vec![
                o.name.clone().cell(),
                status.cell(),
                stage.cell(),
                src_gb.cell().justify(Justify::Right),
                dest_gb.cell().justify(Justify::Right),
                format!("{:.1}s", o.elapsed.as_secs_f64()).cell().justify(Justify::Right),
            ]);
        }
        if let Err(e) = print_stdout(table.table().title(title)) {
            tracing::warn!("cannot print summary table: {}", e);
        }
    }

    // piped output stays free of escape codes
    let color = std::io::stdout().is_terminal() && try_enable_ansi_on_windows();
    println!("{}", summary_line(report, color));
}

/// One-line totals; red when anything failed, green otherwise.
fn summary_line(report: &RunReport, color: bool) -> String {
    let failed = report.failed();
    let line = format!(
        "{} units | {} succeeded | {} failed | {:.1}s",
        report.len(),
        report.succeeded(),
        failed,
        report.elapsed.as_secs_f64()
    );
    if !color {
        line
    } else if failed > 0 {
        line.red().to_string()
    } else {
        line.green().to_string()
    }
}

fn fmt_gb(v: Option<f64>) -> String {
    v.map(|gb| format!("{:.5}", gb)).unwrap_or_else(|| "-".to_string())
}

/// Append one JSON object per failed unit to `path`.
pub fn write_failures_jsonl(path: &Path, report: &RunReport) -> Result<usize> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create {}", parent.display()))?;
    }
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("cannot open failures file {}", path.display()))?;
    let at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let mut n = 0;
    for (o, fail) in report.failures() {
        let obj = serde_json::json!({
            "name": o.name,
            "stage": fail.stage.as_str(),
            "variant": fail.error.variant(),
            "copied": o.copied,
            "message": fail.error.to_string(),
            "at": at,
        });
        writeln!(f, "{}", obj).with_context(|| format!("cannot write {}", path.display()))?;
        n += 1;
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::CompletionRecord;
    use crate::transfer::UnitOutcome;
    use crate::{Stage, TransferError};
    use std::time::Duration;

    fn report() -> RunReport {
        let ok = UnitOutcome {
            name: "2023-03-01".into(),
            copied: true,
            elapsed: Duration::from_secs(3),
            result: Ok(CompletionRecord::new("a:/x".into(), "b:/y".into(), "t0".into(), "t1".into())),
        };
        let bad = UnitOutcome::failed(
            "2023-02-01",
            true,
            Duration::from_secs(1),
            Stage::Record,
            TransferError::RecordWriteError { path: "/srv/2023-02-01".into(), detail: "read-only".into() },
        );
        RunReport { outcomes: vec![ok, bad], elapsed: Duration::from_secs(4) }
    }

    #[test]
    fn failures_file_is_appended_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("failures.jsonl");
        assert_eq!(write_failures_jsonl(&path, &report()).unwrap(), 1);
        assert_eq!(write_failures_jsonl(&path, &report()).unwrap(), 1);
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let v: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(v["name"], "2023-02-01");
        assert_eq!(v["stage"], "record");
        assert_eq!(v["variant"], "RecordWriteError");
        assert_eq!(v["copied"], true);
        assert!(v["at"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn host_facts_are_never_empty() {
        assert!(!local_hostname().is_empty());
        assert!(!invoking_username().is_empty());
    }

    #[test]
    fn hidden_progress_when_quiet() {
        assert!(unit_progress(3, true).is_hidden());
    }

    #[test]
    fn summary_line_is_plain_when_uncolored() {
        let plain = summary_line(&report(), false);
        assert_eq!(plain, "2 units | 1 succeeded | 1 failed | 4.0s");
        assert!(!plain.contains('\x1b'));
        assert!(summary_line(&report(), true).contains('\x1b'));
    }

    #[test]
    fn gb_formatting() {
        assert_eq!(fmt_gb(Some(1.0)), "1.00000");
        assert_eq!(fmt_gb(None), "-");
    }
}
