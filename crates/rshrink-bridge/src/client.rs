//! Client — the main thread's entry point.
//!
//! Spawns the worker, waits for its capability bundle and routes every
//! computation to the best variant available.

use rshrink_core::Value;
use rshrink_runtime::RuntimeOptions;
use tracing::info;

use crate::error::BridgeError;
use crate::protocol::RemoteError;
use crate::proxy::Handlers;
use crate::worker::Worker;

pub struct Client {
    worker: Worker,
    handlers: Handlers,
}

impl Client {
    /// Spawn a worker for `options` and wait until it is ready.
    pub async fn start(options: RuntimeOptions) -> Result<Self, BridgeError> {
        Self::connect(Worker::spawn(options)?).await
    }

    /// Wait for an already spawned worker to become ready.
    ///
    /// The worker is terminated if its bundle fails to build.
    pub async fn connect(worker: Worker) -> Result<Self, BridgeError> {
        let handlers = match worker.proxy().handlers().await {
            Ok(handlers) => handlers,
            Err(err) => {
                worker.terminate().await;
                return Err(err);
            }
        };

        match handlers.multi_thread() {
            Some(multi) => info!(pool_size = ?multi.pool_size(), "threads supported"),
            None => info!(
                reason = handlers.info().unavailable.as_deref().unwrap_or("unknown"),
                "threads not supported"
            ),
        }

        Ok(Self { worker, handlers })
    }

    pub fn handlers(&self) -> &Handlers {
        &self.handlers
    }

    pub fn supports_threads(&self) -> bool {
        self.handlers.supports_threads()
    }

    /// Call `export` on the multi-thread variant if available, else on the
    /// single-thread one.
    pub async fn compute(&self, export: &str, args: Vec<Value>) -> Result<Value, BridgeError> {
        self.handlers.preferred().call(export, args).await
    }

    pub async fn compute_many(
        &self,
        export: &str,
        batches: Vec<Vec<Value>>,
    ) -> Result<Vec<Result<Value, RemoteError>>, BridgeError> {
        self.handlers.preferred().call_many(export, batches).await
    }

    /// Terminate the worker and wait for it to finish.
    pub async fn shutdown(self) {
        self.worker.terminate().await;
    }
}
