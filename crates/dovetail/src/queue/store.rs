//! File-backed queue store.
//!
//! Every access goes through [`QueueStore::execute_with_lock`]: take an
//! exclusive advisory lock on the lock file, load the whole document, run the
//! operation, rewrite the whole document, release the lock. The lock file is
//! the only thing shared between worker processes.

use std::cell::Cell;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, error, warn};

use super::error::StoreError;
use super::state::QueueState;

thread_local! {
    static IN_TRANSACTION: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as inside a transaction until dropped.
struct TransactionGuard;

impl TransactionGuard {
    fn enter() -> Result<Self, StoreError> {
        IN_TRANSACTION.with(|flag| {
            if flag.get() {
                Err(StoreError::Reentrant)
            } else {
                flag.set(true);
                Ok(TransactionGuard)
            }
        })
    }
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        IN_TRANSACTION.with(|flag| flag.set(false));
    }
}

/// Holds the exclusive lock for the lifetime of the value.
struct LockHandle {
    file: File,
    path: PathBuf,
}

impl LockHandle {
    fn acquire(path: &Path) -> Result<Self, StoreError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| StoreError::Lock {
                path: path.to_path_buf(),
                source: e,
            })?;

        fs2::FileExt::lock_exclusive(&file).map_err(|e| StoreError::Lock {
            path: path.to_path_buf(),
            source: e,
        })?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if let Err(e) = fs2::FileExt::unlock(&self.file) {
            warn!("Failed to release lock on {}: {}", self.path.display(), e);
        }
    }
}

/// Durable container for job records.
#[derive(Debug, Clone)]
pub struct QueueStore {
    queue_path: PathBuf,
    lock_path: PathBuf,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError {
    let path = path.to_path_buf();
    move |source| StoreError::Io { path, source }
}

impl QueueStore {
    pub fn new(queue_path: impl Into<PathBuf>, lock_path: impl Into<PathBuf>) -> Self {
        Self {
            queue_path: queue_path.into(),
            lock_path: lock_path.into(),
        }
    }

    /// Store rooted in `shared_dir` using the standard file names.
    pub fn in_dir(shared_dir: &Path) -> Self {
        Self::new(
            shared_dir.join("job_queue.json"),
            shared_dir.join("job_queue.lock"),
        )
    }

    pub fn queue_path(&self) -> &Path {
        &self.queue_path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Runs `operation` against the current state as one atomic transaction.
    ///
    /// The state is persisted only when the operation returns `Ok`. Calling
    /// this again from inside `operation` fails with [`StoreError::Reentrant`].
    pub fn execute_with_lock<T, F>(&self, operation: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut QueueState) -> Result<T, StoreError>,
    {
        let _guard = TransactionGuard::enter()?;
        self.ensure_parent_dirs()?;
        let _lock = LockHandle::acquire(&self.lock_path)?;

        let mut state = self.load()?;
        let value = operation(&mut state)?;
        self.persist(&state)?;
        Ok(value)
    }

    fn ensure_parent_dirs(&self) -> Result<(), StoreError> {
        for path in [&self.queue_path, &self.lock_path] {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent).map_err(|e| StoreError::Io {
                        path: parent.to_path_buf(),
                        source: e,
                    })?;
                }
            }
        }
        Ok(())
    }

    fn load(&self) -> Result<QueueState, StoreError> {
        let bytes = match fs::read(&self.queue_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(QueueState::default()),
            Err(e) => {
                return Err(StoreError::Io {
                    path: self.queue_path.clone(),
                    source: e,
                })
            }
        };

        let parsed = match String::from_utf8(bytes) {
            Ok(text) if text.trim().is_empty() => return Ok(QueueState::default()),
            Ok(text) => QueueState::parse(&text),
            Err(e) => Err(format!("queue document is not valid UTF-8: {}", e)),
        };

        match parsed {
            Ok(state) => Ok(state),
            Err(reason) => Ok(self.recover_corrupt(&reason, &self.corrupt_aside_path())),
        }
    }

    fn corrupt_aside_path(&self) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.6fZ");
        let mut name = self.queue_path.as_os_str().to_owned();
        name.push(format!(".corrupt-{}", stamp));
        PathBuf::from(name)
    }

    /// Moves the corrupt document to `aside` and starts over empty. If the move
    /// fails the document stays put and the next persist overwrites it.
    fn recover_corrupt(&self, reason: &str, aside: &Path) -> QueueState {
        warn!(
            "Queue document {} is corrupt: {}",
            self.queue_path.display(),
            reason
        );
        match fs::rename(&self.queue_path, aside) {
            Ok(()) => error!(
                "Moved corrupt queue document to {}; continuing with an empty queue",
                aside.display()
            ),
            Err(e) => error!(
                "Could not move corrupt queue document {} to {}: {}; continuing with an empty queue",
                self.queue_path.display(),
                aside.display(),
                e
            ),
        }
        QueueState::default()
    }

    fn persist(&self, state: &QueueState) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(state)?;

        let mut tmp_name = self.queue_path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let mut file = File::create(&tmp_path).map_err(io_err(&tmp_path))?;
        file.write_all(&data).map_err(io_err(&tmp_path))?;
        file.sync_all().map_err(io_err(&tmp_path))?;
        drop(file);

        fs::rename(&tmp_path, &self.queue_path).map_err(io_err(&self.queue_path))?;
        debug!(
            "Persisted {} jobs to {}",
            state.jobs.len(),
            self.queue_path.display()
        );
        Ok(())
    }
}
