use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::cli::Cli;
use crate::config::{FileConfig, Settings};
use crate::copy_tool::Rsync;
use crate::listing::list_children;
use crate::location::Location;
use crate::selection::SelectionPolicy;
use crate::transfer::session::SshSessionFactory;
use crate::transfer::{self, RunObserver, RunReport, TracingObserver, TransferContext};

pub const EXIT_OK: i32 = 0;
pub const EXIT_UNIT_FAILURES: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

/// Everything resolved before the first unit is dispatched.
#[derive(Debug, Clone)]
pub struct Plan {
    pub source: Location,
    pub dest: PathBuf,
    pub settings: Settings,
    pub work_list: Vec<String>,
}

/// Resolve settings, parse both locations, list the source and apply the
/// selection policy. Any error here is fatal for the run.
pub fn plan(cli: &Cli) -> Result<Plan> {
    let file = match cli.config.clone().or_else(FileConfig::default_path) {
        Some(path) => FileConfig::load(&path)?,
        None => FileConfig::default(),
    };
    let settings = Settings::resolve(cli.overrides(), file);
    tracing::debug!("settings: {:?}", settings);

    let source = Location::parse(&cli.src)?;
    let dest = match cli.dest.to_str() {
        Some(s) => Location::parse(s)?.require_local()?.to_path_buf(),
        None => cli.dest.clone(),
    };

    let names = list_children(&source, &settings.credentials, &settings.ssh)
        .with_context(|| format!("cannot list {}", source))?;
    tracing::debug!("{} directories found at {}", names.len(), source);

    let policy = SelectionPolicy {
        ascending: cli.ascending,
        before: cli.before.clone(),
        after: cli.after.clone(),
    };
    let work_list = policy.select(names);
    Ok(Plan { source, dest, settings, work_list })
}

/// Run the whole command and return the process exit code.
pub fn handle_sync(cli: &Cli) -> Result<i32> {
    let plan = plan(cli)?;

    if cli.list {
        if cli.json {
            println!("{}", serde_json::to_string(&plan.work_list)?);
        } else {
            for name in &plan.work_list {
                println!("{}", name);
            }
        }
        return Ok(EXIT_OK);
    }

    if plan.work_list.is_empty() {
        tracing::warn!("no directories selected at {}", plan.source);
        if cli.json {
            println!("{}", RunReport::default().summary_json());
        }
        return Ok(EXIT_OK);
    }

    let rsync = Rsync::new(plan.settings.rsync_path.clone(), &plan.settings.credentials, &plan.settings.ssh);
    let program = rsync.check_available()?;
    tracing::debug!("copy tool: {}", program.display());

    std::fs::create_dir_all(&plan.dest)
        .with_context(|| format!("cannot create destination {}", plan.dest.display()))?;

    let report = execute_plan(&plan, Arc::new(rsync), !cli.no_size, cli.quiet || cli.json);

    if cli.json {
        println!("{}", report.summary_json());
    } else if !cli.quiet {
        crate::util::print_summary(&report);
    }
    if let Some(path) = &cli.failures {
        let n = crate::util::write_failures_jsonl(path, &report)?;
        if n > 0 {
            tracing::info!("{} failures written to {}", n, path.display());
        }
    }

    Ok(if report.all_succeeded() { EXIT_OK } else { EXIT_UNIT_FAILURES })
}

fn execute_plan(plan: &Plan, rsync: Arc<Rsync>, record_sizes: bool, hide_progress: bool) -> RunReport {
    let total = plan.work_list.len();
    let workers = transfer::calc_workers(plan.settings.processes, total);
    tracing::info!(
        "transferring {} directories from {} to {} with {} workers",
        total,
        plan.source,
        plan.dest.display(),
        workers
    );

    let pb = crate::util::unit_progress(total, hide_progress);
    let observer: Arc<dyn RunObserver> = Arc::new(TracingObserver::with_progress(pb.clone()));
    let ctx = Arc::new(TransferContext {
        source: plan.source.clone(),
        dest: plan.dest.clone(),
        copier: rsync,
        sessions: Arc::new(SshSessionFactory {
            creds: plan.settings.credentials.clone(),
            opts: plan.settings.ssh,
        }),
        record_sizes,
        local_host: crate::util::local_hostname(),
    });
    let report = transfer::run(plan.work_list.clone().into(), ctx, plan.settings.processes, observer);
    pb.finish_and_clear();

    let summary = report.summary_json();
    tracing::info!(
        "run finished: {} succeeded, {} failed in {:.1}s",
        summary["succeeded"],
        summary["failed"],
        report.elapsed.as_secs_f64()
    );
    report
}
