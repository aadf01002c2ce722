//! RemoteProxy — the main thread's view of the worker's capability bundle.
//!
//! Every method is a round trip to the worker: a request goes out with its
//! own `oneshot` reply channel and the caller awaits the answer.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use rshrink_core::{Value, Variant};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::BridgeError;
use crate::protocol::{Envelope, HandlersInfo, RemoteError, Request, Response, VariantInfo};

/// Cloneable sender side of the worker's request channel.
#[derive(Clone)]
pub struct RemoteProxy {
    sender: mpsc::UnboundedSender<Envelope>,
    next_id: Arc<AtomicU64>,
}

impl RemoteProxy {
    pub(crate) fn new(sender: mpsc::UnboundedSender<Envelope>, next_id: Arc<AtomicU64>) -> Self {
        Self { sender, next_id }
    }

    /// Send a request and wait for the worker's response.
    pub async fn request(&self, request: Request) -> Result<Response, BridgeError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply, response) = oneshot::channel();
        debug!(id, kind = request.kind(), "sending request to worker");

        self.sender
            .send(Envelope { id, request, reply })
            .map_err(|_| BridgeError::Terminated)?;

        let response = response.await.map_err(|_| BridgeError::Terminated)??;
        Ok(response)
    }

    /// Resolve the worker's capability bundle.
    ///
    /// Waits for the worker to finish building it.
    pub async fn handlers(&self) -> Result<Handlers, BridgeError> {
        match self.request(Request::Handlers).await? {
            Response::Handlers(info) => Ok(Handlers {
                info,
                proxy: self.clone(),
            }),
            _ => Err(BridgeError::Protocol { request: "handlers" }),
        }
    }

    pub async fn call(&self, variant: Variant, export: &str, args: Vec<Value>) -> Result<Value, BridgeError> {
        let request = Request::Call {
            variant,
            export: export.to_string(),
            args,
        };
        match self.request(request).await? {
            Response::Value(value) => Ok(value),
            _ => Err(BridgeError::Protocol { request: "call" }),
        }
    }

    /// Call an export once per batch. The outer error is about the worker or
    /// the variant; the inner ones are per batch.
    pub async fn call_many(
        &self,
        variant: Variant,
        export: &str,
        batches: Vec<Vec<Value>>,
    ) -> Result<Vec<Result<Value, RemoteError>>, BridgeError> {
        let request = Request::CallMany {
            variant,
            export: export.to_string(),
            batches,
        };
        match self.request(request).await? {
            Response::Values(results) => Ok(results),
            _ => Err(BridgeError::Protocol { request: "call_many" }),
        }
    }
}

/// Main-thread stand-in for the capability bundle.
#[derive(Clone)]
pub struct Handlers {
    info: HandlersInfo,
    proxy: RemoteProxy,
}

impl Handlers {
    pub fn info(&self) -> &HandlersInfo {
        &self.info
    }

    pub fn supports_threads(&self) -> bool {
        self.info.supports_threads
    }

    pub fn single_thread(&self) -> RemoteModule {
        RemoteModule {
            info: self.info.single_thread.clone(),
            proxy: self.proxy.clone(),
        }
    }

    /// `None` unless the worker supports threads.
    pub fn multi_thread(&self) -> Option<RemoteModule> {
        self.info.multi_thread.as_ref().map(|info| RemoteModule {
            info: info.clone(),
            proxy: self.proxy.clone(),
        })
    }

    /// The multi-thread variant when available, else single-thread.
    pub fn preferred(&self) -> RemoteModule {
        self.multi_thread().unwrap_or_else(|| self.single_thread())
    }
}

/// One variant of the compute module, reached through the worker.
#[derive(Clone)]
pub struct RemoteModule {
    info: VariantInfo,
    proxy: RemoteProxy,
}

impl RemoteModule {
    pub fn variant(&self) -> Variant {
        self.info.variant
    }

    pub fn exports(&self) -> &[String] {
        &self.info.exports
    }

    pub fn pool_size(&self) -> Option<usize> {
        self.info.pool_size
    }

    /// Peak linear memory in bytes when the handlers snapshot was taken.
    pub fn peak_memory(&self) -> usize {
        self.info.peak_memory
    }

    pub async fn call(&self, export: &str, args: Vec<Value>) -> Result<Value, BridgeError> {
        self.proxy.call(self.info.variant, export, args).await
    }

    pub async fn call_many(
        &self,
        export: &str,
        batches: Vec<Vec<Value>>,
    ) -> Result<Vec<Result<Value, RemoteError>>, BridgeError> {
        self.proxy.call_many(self.info.variant, export, batches).await
    }
}
