//! `dovetail` command-line entry point.

mod args;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use dovetail::config::{apply_env_overrides, default_config_path};
use dovetail::logging::json_requested_by_env;
use dovetail::{
    init_tracing, load_config, CommandStepRunner, Config, DirectoryScanner, DovetailError, JobId,
    JobQueue, JobRecord, RunMode, Worker, WorkerError,
};

use args::{Cli, Command};

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.json_logs || json_requested_by_env());

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn resolve_config(explicit: Option<&Path>) -> dovetail::Result<Config> {
    let mut config = match explicit {
        Some(path) => load_config(path)?,
        None => match default_config_path().filter(|p| p.is_file()) {
            Some(path) => {
                info!("Using config {}", path.display());
                load_config(&path)?
            }
            None => Config::default(),
        },
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

fn run(cli: Cli) -> dovetail::Result<()> {
    let config = resolve_config(cli.config.as_deref())?;
    let queue = JobQueue::from_config(&config);

    match cli.command {
        Command::Worker {
            once,
            drain,
            worker_id,
        } => {
            let mode = if once {
                RunMode::Once
            } else if drain {
                RunMode::Drain
            } else {
                RunMode::Poll
            };
            run_worker(&config, mode, worker_id)
        }
        Command::Scan {
            root,
            job_type,
            dry_run,
        } => {
            let root = root
                .or_else(|| config.scan.video_root.clone())
                .ok_or_else(|| {
                    DovetailError::Config(dovetail::ConfigError::Validation {
                        message: "no scan root given (use --root or scan.video_root)".to_string(),
                    })
                })?;
            let scanner = DirectoryScanner::from_config(&root, &config.scan);

            if dry_run {
                let queued: std::collections::HashSet<String> =
                    queue.get_all_input_paths()?.into_iter().collect();
                for path in scanner.scan()? {
                    let known = path.to_str().is_some_and(|key| queued.contains(key));
                    let marker = if known { "queued" } else { "new" };
                    println!("{:<6} {}", marker, path.display());
                }
                return Ok(());
            }

            let job_type = job_type.unwrap_or(config.scan.default_job_type);
            let report = scanner.enqueue_into(&queue, job_type)?;
            println!(
                "Found {} source videos, queued {} new {} jobs",
                report.found, report.queued, job_type
            );
            Ok(())
        }
        Command::Enqueue { path, job_type } => {
            let path = absolute(&path);
            let job_type = job_type.unwrap_or(config.scan.default_job_type);
            if queue.add_job(&path, job_type)? {
                println!("Queued {} ({})", path.display(), job_type);
            } else {
                println!("Already queued: {}", path.display());
            }
            Ok(())
        }
        Command::Status { json } => {
            let jobs = queue.list_jobs()?;
            if json {
                let rendered = serde_json::to_string_pretty(&jobs)
                    .map_err(dovetail::StoreError::from)?;
                println!("{}", rendered);
                return Ok(());
            }

            let counts = queue.counts_by_status()?;
            println!(
                "pending {}  running {}  failed {}  failed_permanent {}  done {}  (total {})",
                counts.pending,
                counts.running,
                counts.failed,
                counts.failed_permanent,
                counts.done,
                counts.total()
            );
            for job in &jobs {
                println!("{}", job_line(job));
            }
            Ok(())
        }
        Command::Reset { job_id, from_step } => {
            let id: JobId = job_id.parse().map_err(|e| {
                DovetailError::Config(dovetail::ConfigError::Validation {
                    message: format!("invalid job id '{}': {}", job_id, e),
                })
            })?;
            let job = queue.reset_job_progress(id, from_step)?;
            println!("Reset {} from step {}", job.input_path, from_step);
            println!("{}", job_line(&job));
            Ok(())
        }
        Command::ForceReset {
            input_path,
            from_step,
        } => {
            let job = queue.force_reset_job_progress(&absolute(&input_path), from_step)?;
            println!("Reset {} from step {}", job.input_path, from_step);
            println!("{}", job_line(&job));
            Ok(())
        }
        Command::Stale { hours } => {
            let threshold = match hours {
                Some(h) => chrono::Duration::hours(i64::from(h)),
                None => config.stale_threshold(),
            };
            let stale = queue.find_stale_jobs(threshold)?;
            if stale.is_empty() {
                println!("No stale jobs (threshold {}h)", threshold.num_hours());
            }
            for job in &stale {
                println!("{}", job_line(job));
            }
            Ok(())
        }
    }
}

fn run_worker(config: &Config, mode: RunMode, worker_id: Option<String>) -> dovetail::Result<()> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::Relaxed) {
            warn!("Shutdown already requested; finishing the current job");
        } else {
            info!("Shutdown requested; finishing the current job");
        }
    })
    .map_err(|e| WorkerError::SignalHandler(e.to_string()))?;

    let runner = Arc::new(CommandStepRunner::new(config.tools.clone()));
    let mut worker = Worker::new(config, runner, shutdown);
    if let Some(id) = worker_id {
        worker = worker.with_worker_id(id);
    }

    let summary = worker.run(mode)?;
    println!(
        "Worker {} finished: {} completed, {} failed",
        worker.worker_id(),
        summary.completed,
        summary.failed
    );
    Ok(())
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn job_line(job: &JobRecord) -> String {
    let steps: Vec<String> = job
        .steps
        .iter()
        .map(|(step, status)| format!("{}={}", step, status))
        .collect();
    format!(
        "{}  {:<16} {:<8} retries={} worker={} {}  [{}]",
        job.id,
        job.status,
        job.job_type,
        job.retries,
        job.worker_id.as_deref().unwrap_or("-"),
        job.input_path,
        steps.join(" ")
    )
}
