//! Wire types exchanged between the main thread and the worker.
//!
//! Everything here is plain data: requests and responses derive serde so
//! they can be logged or printed as JSON.

use rshrink_core::{Value, Variant};
use rshrink_runtime::{CallError, CapabilityBundle, ModuleHandle};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Request {
    /// Describe the capability bundle.
    Handlers,
    Call {
        variant: Variant,
        export: String,
        args: Vec<Value>,
    },
    /// One call per batch of arguments, results in batch order.
    CallMany {
        variant: Variant,
        export: String,
        batches: Vec<Vec<Value>>,
    },
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Handlers => "handlers",
            Request::Call { .. } => "call",
            Request::CallMany { .. } => "call_many",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum Response {
    Handlers(HandlersInfo),
    Value(Value),
    Values(Vec<Result<Value, RemoteError>>),
}

/// Shape of the worker's capability bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlersInfo {
    pub module: String,
    pub single_thread: VariantInfo,
    pub supports_threads: bool,
    pub multi_thread: Option<VariantInfo>,
    /// Why `multi_thread` is absent.
    pub unavailable: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantInfo {
    pub variant: Variant,
    pub exports: Vec<String>,
    pub pool_size: Option<usize>,
    /// Largest linear memory any instance of this variant has reached, in bytes.
    pub peak_memory: usize,
    pub memory_limit: usize,
}

impl From<&ModuleHandle> for VariantInfo {
    fn from(handle: &ModuleHandle) -> Self {
        let memory = handle.memory_usage();
        VariantInfo {
            variant: handle.variant(),
            exports: handle.exports().to_vec(),
            pool_size: handle.pool_size(),
            peak_memory: memory.peak,
            memory_limit: memory.limit,
        }
    }
}

impl From<&CapabilityBundle> for HandlersInfo {
    fn from(bundle: &CapabilityBundle) -> Self {
        HandlersInfo {
            module: bundle.single_thread().name().to_string(),
            single_thread: bundle.single_thread().into(),
            supports_threads: bundle.supports_threads(),
            multi_thread: bundle.multi_thread().map(VariantInfo::from),
            unavailable: bundle.unavailable().map(ToString::to_string),
        }
    }
}

/// Failure reported by the worker. Carries strings only so it can cross
/// the thread boundary and be cloned to every waiting request.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteError {
    #[error("capability bundle failed to build: {reason}")]
    BuildFailed { reason: String },

    #[error("{variant} variant unavailable: {reason}")]
    VariantUnavailable { variant: Variant, reason: String },

    #[error("call to `{export}` failed: {message}")]
    Call { export: String, message: String },
}

impl RemoteError {
    pub(crate) fn call(export: &str, error: &CallError) -> Self {
        RemoteError::Call {
            export: export.to_string(),
            message: error.to_string(),
        }
    }
}

pub(crate) type Reply = oneshot::Sender<Result<Response, RemoteError>>;

/// A request in flight to the worker, with the channel its answer goes to.
pub(crate) struct Envelope {
    pub id: u64,
    pub request: Request,
    pub reply: Reply,
}
