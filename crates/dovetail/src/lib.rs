pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod queue;
pub mod worker;

pub use config::{load_config, load_config_from_str, Config};
pub use error::{ConfigError, DovetailError, Result, WorkerError};
pub use logging::{init_tracing, JobLog};
pub use pipeline::{
    CommandStepRunner, JobContext, PipelineConfig, PipelineError, PipelineExecutor,
    PipelineOutcome, StepOutcome, StepRunner,
};
pub use queue::{
    JobId, JobQueue, JobRecord, JobStatus, JobType, QueueCounts, QueueStore, RetryPolicy, Step,
    StepStatus, StoreError,
};
pub use worker::{DirectoryScanner, RunMode, ScanReport, Worker, WorkerSummary};
