// transfer module: bounded worker pool over transfer units
pub mod session;
pub mod sftp_like;
pub mod unit;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded};
use indicatif::ProgressBar;

use crate::copy_tool::Copier;
use crate::location::Location;
use crate::{Stage, TransferError};
use self::session::{RemoteAccess, SessionFactory};
pub use self::unit::{UnitFailure, UnitOutcome, execute};

/// Upper bound on worker threads regardless of the requested concurrency.
pub const MAX_WORKERS: usize = 32;

/// Read-only configuration shared by every worker of a run.
pub struct TransferContext {
    pub source: Location,
    pub dest: PathBuf,
    pub copier: Arc<dyn Copier>,
    pub sessions: Arc<dyn SessionFactory>,
    /// Reconcile sizes on both sides and store them in the record.
    pub record_sizes: bool,
    pub local_host: String,
}

/// Log sink the orchestrator reports unit progress to. Callbacks run on
/// worker threads.
pub trait RunObserver: Send + Sync {
    fn unit_started(&self, _worker_id: usize, _name: &str) {}
    fn unit_finished(&self, _worker_id: usize, _outcome: &UnitOutcome) {}
}

/// Default observer: `tracing` events, optionally advancing a progress bar.
#[derive(Default)]
pub struct TracingObserver {
    pb: Option<ProgressBar>,
}

impl TracingObserver {
    pub fn with_progress(pb: ProgressBar) -> Self {
        Self { pb: Some(pb) }
    }

    fn emit(&self, f: impl FnOnce()) {
        match &self.pb {
            Some(pb) => pb.suspend(f),
            None => f(),
        }
    }
}

impl RunObserver for TracingObserver {
    fn unit_started(&self, worker_id: usize, name: &str) {
        self.emit(|| tracing::info!(worker_id, "transfer started: {}", name));
    }

    fn unit_finished(&self, worker_id: usize, outcome: &UnitOutcome) {
        self.emit(|| match &outcome.result {
            Ok(rec) => tracing::info!(
                worker_id,
                elapsed_secs = outcome.elapsed.as_secs_f64(),
                "transfer complete: {} -> {}",
                rec.src,
                rec.dest
            ),
            Err(f) => tracing::error!(
                worker_id,
                stage = f.stage.as_str(),
                copied = outcome.copied,
                "transfer failed: {}: {}",
                outcome.name,
                f.error
            ),
        });
        if let Some(pb) = &self.pb {
            pb.inc(1);
        }
    }
}

/// All outcomes of one run, in work-list order.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub outcomes: Vec<UnitOutcome>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = (&UnitOutcome, &UnitFailure)> {
        self.outcomes.iter().filter_map(|o| o.failure().map(|f| (o, f)))
    }

    /// Machine-readable run summary.
    pub fn summary_json(&self) -> serde_json::Value {
        let failures: Vec<serde_json::Value> = self
            .failures()
            .map(|(o, f)| {
                serde_json::json!({
                    "name": o.name,
                    "stage": f.stage.as_str(),
                    "copied": o.copied,
                    "error": f.error.to_string(),
                })
            })
            .collect();
        serde_json::json!({
            "units": self.len(),
            "succeeded": self.succeeded(),
            "failed": self.failed(),
            "elapsed_secs": self.elapsed.as_secs_f64(),
            "failures": failures,
        })
    }
}

/// Number of worker threads `run` starts: at least one, never more than
/// the units to process or `MAX_WORKERS`.
pub fn calc_workers(concurrency: usize, total_units: usize) -> usize {
    let workers = if concurrency == 0 { 1 } else { concurrency };
    workers.min(MAX_WORKERS).min(total_units.max(1))
}

/// Run one transfer unit per name on a pool of `concurrency` threads and
/// block until all of them have finished.
///
/// Units are queued in work-list order; completion order is whatever the
/// workers produce. A failing unit never stops its siblings and nothing is
/// retried. Each worker opens its own remote session on first use and drops
/// it when the queue is drained.
pub fn run(
    work_list: Arc<[String]>,
    ctx: Arc<TransferContext>,
    concurrency: usize,
    observer: Arc<dyn RunObserver>,
) -> RunReport {
    let start = Instant::now();
    let total = work_list.len();
    if total == 0 {
        return RunReport { outcomes: Vec::new(), elapsed: start.elapsed() };
    }
    let workers = calc_workers(concurrency, total);
    if workers < concurrency {
        tracing::debug!("using {} workers for {} units (requested {})", workers, total, concurrency);
    }

    let (job_tx, job_rx) = bounded::<usize>(workers * 2);
    let (done_tx, done_rx) = unbounded::<(usize, UnitOutcome)>();

    let mut handles = Vec::with_capacity(workers);
    for worker_id in 0..workers {
        let job_rx = job_rx.clone();
        let done_tx = done_tx.clone();
        let ctx = ctx.clone();
        let work_list = work_list.clone();
        let observer = observer.clone();
        let handle = std::thread::spawn(move || {
            // 每个工作线程独占自己的会话 — each worker owns its own session
            let mut remote: Option<Box<dyn RemoteAccess>> = None;
            while let Ok(idx) = job_rx.recv() {
                let name = &work_list[idx];
                observer.unit_started(worker_id, name);
                if remote.is_none() {
                    if let Location::Remote { host, .. } = &ctx.source {
                        remote = Some(ctx.sessions.open(host));
                    }
                }
                let outcome = execute(name, &ctx, remote.as_deref_mut().map(|r| r as &mut dyn RemoteAccess));
                observer.unit_finished(worker_id, &outcome);
                if done_tx.send((idx, outcome)).is_err() {
                    break;
                }
            }
            tracing::debug!(worker_id, "worker drained queue");
        });
        handles.push(handle);
    }
    drop(job_rx);
    drop(done_tx);

    for idx in 0..total {
        // blocking send applies backpressure
        if job_tx.send(idx).is_err() {
            break;
        }
    }
    drop(job_tx);

    for (worker_id, h) in handles.into_iter().enumerate() {
        if h.join().is_err() {
            tracing::error!(worker_id, "worker thread panicked");
        }
    }

    let mut slots: Vec<Option<UnitOutcome>> = vec![None; total];
    for (idx, outcome) in done_rx.into_iter() {
        slots[idx] = Some(outcome);
    }
    let outcomes = slots
        .into_iter()
        .enumerate()
        .map(|(idx, slot)| {
            slot.unwrap_or_else(|| {
                let name = &work_list[idx];
                UnitOutcome::failed(
                    name,
                    false,
                    Duration::ZERO,
                    Stage::Copy,
                    TransferError::WorkerPanic(name.clone()),
                )
            })
        })
        .collect();
    RunReport { outcomes, elapsed: start.elapsed() }
}
