//! Runtime error types.

use std::path::PathBuf;

use thiserror::Error;

/// The compute module could not be loaded or initialized.
///
/// Fatal on the single-thread path; on the multi-thread path it only
/// degrades the bundle to single-thread.
#[derive(Debug, Error)]
pub enum ModuleLoadError {
    #[error("compute module not found at {}", .0.display())]
    Missing(PathBuf),

    #[error("failed to read compute module {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("engine configuration rejected: {0}")]
    Engine(String),

    #[error("compute module rejected by host: {0}")]
    Compile(String),

    #[error("failed to instantiate compute module: {0}")]
    Instantiate(String),

    #[error("compute module init failed: {0}")]
    Init(String),

    #[error("module load task aborted: {0}")]
    Aborted(String),
}

/// The worker thread pool could not be started.
#[derive(Debug, Error)]
pub enum ThreadPoolError {
    #[error("thread pool requires a handle loaded with threading enabled")]
    NotThreaded,

    #[error("failed to spawn pool thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("pool worker {index} failed to start: {reason}")]
    WorkerStart { index: usize, reason: String },

    #[error("compute module rejected the thread pool (init_thread_pool returned {code})")]
    Rejected { code: i32 },
}

/// A single call into a compute module export failed.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("export not found: {0}")]
    MissingExport(String),

    #[error("bad call to `{export}`: {reason}")]
    Signature { export: String, reason: String },

    #[error("guest memory error: {0}")]
    Memory(String),

    #[error("`{export}` trapped: {message}")]
    Trap { export: String, message: String },

    #[error("thread pool is shut down")]
    PoolClosed,

    #[error("call task aborted: {0}")]
    Aborted(String),

    #[error("module instance lock poisoned")]
    Poisoned,
}

pub type CallResult<T> = Result<T, CallError>;
