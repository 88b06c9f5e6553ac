use clap::{Parser, Subcommand};
use dovetail::JobType;
use std::path::PathBuf;

/// Upper bound for `stale --hours`, matching the config schema.
const MAX_STALE_HOURS: i64 = 87_600;

/// dovetail - shared-queue transcoding workers
#[derive(Parser, Debug)]
#[command(name = "dovetail")]
#[command(version)]
#[command(about = "Coordinate transcoding workers through a shared, lock-protected job queue", long_about = None)]
pub struct Cli {
    /// Path to the JSON config file (default: ~/.dovetail/config.json if present)
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON (also enabled by LOG_FORMAT=json)
    #[arg(long = "json-logs", global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Claim and process jobs from the queue
    Worker {
        /// Process at most one job, then exit
        #[arg(long, conflicts_with = "drain")]
        once: bool,

        /// Process until no job is eligible, then exit
        #[arg(long)]
        drain: bool,

        /// Worker identifier recorded on claimed jobs (default: <hostname>-<pid>)
        #[arg(long = "worker-id")]
        worker_id: Option<String>,
    },

    /// Scan a directory tree and enqueue new source videos
    Scan {
        /// Root directory (default: scan.video_root from config)
        #[arg(long)]
        root: Option<PathBuf>,

        /// Pipeline variant for new jobs (default: scan.default_job_type)
        #[arg(long = "job-type")]
        job_type: Option<JobType>,

        /// List candidates without touching the queue
        #[arg(long = "dry-run")]
        dry_run: bool,
    },

    /// Enqueue a single file
    Enqueue {
        path: PathBuf,

        #[arg(long = "job-type")]
        job_type: Option<JobType>,
    },

    /// Show queue counts and jobs
    Status {
        /// Print jobs as JSON
        #[arg(long)]
        json: bool,
    },

    /// Roll a job back to a step (1-based) and make it claimable again
    Reset {
        job_id: String,

        #[arg(long = "from-step", default_value_t = 1)]
        from_step: usize,
    },

    /// Same as reset, addressing the job by its input path
    ForceReset {
        input_path: PathBuf,

        #[arg(long = "from-step", default_value_t = 1)]
        from_step: usize,
    },

    /// List running jobs whose claim is older than the threshold
    Stale {
        /// Threshold in hours, at most ten years (default: queue.stale_job_threshold_hours)
        #[arg(long, value_parser = clap::value_parser!(u32).range(0..=MAX_STALE_HOURS))]
        hours: Option<u32>,
    },
}
