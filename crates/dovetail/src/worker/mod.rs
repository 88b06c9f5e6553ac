pub mod runner;
pub mod scanner;

pub use runner::{default_worker_id, RunMode, Worker, WorkerSummary};
pub use scanner::{DirectoryScanner, ScanReport};
