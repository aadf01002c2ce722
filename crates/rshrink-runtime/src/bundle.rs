//! Capability bundle — the single-thread and (optional) multi-thread
//! variants of the compute module, negotiated once per worker.
//!
//! ```text
//! build()
//!   ├── Task A: load(single-thread)                     ── failure is fatal
//!   └── Task B: probe ─ no ─▶ Unavailable(Unsupported)
//!                     └ yes ─▶ load(multi-thread) + init_pool(size)
//!               (all of Task B runs under init_timeout) ── failure degrades
//! ```

use std::time::Duration;

use rshrink_core::Variant;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::error::{ModuleLoadError, ThreadPoolError};
use crate::handle::ModuleHandle;
use crate::loader::ModuleLoader;
use crate::pool::{PoolSize, init_pool};
use crate::probe::FeatureProbe;

/// Default deadline for the multi-thread initialization path.
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Why the multi-thread variant is absent.
#[derive(Debug, Error)]
pub enum Unavailable {
    #[error("host does not support shared-memory threads")]
    Unsupported,

    #[error("multi-thread module failed to load: {0}")]
    LoadFailed(#[source] ModuleLoadError),

    #[error("thread pool failed to start: {0}")]
    PoolFailed(#[source] ThreadPoolError),

    #[error("multi-thread initialization did not finish within {0:?}")]
    TimedOut(Duration),
}

/// Outcome of the multi-thread initialization path.
pub enum MultiThread {
    Ready(ModuleHandle),
    Unavailable(Unavailable),
}

/// Everything the worker can offer, built once and never mutated.
pub struct CapabilityBundle {
    single_thread: ModuleHandle,
    multi_thread: MultiThread,
}

impl CapabilityBundle {
    pub fn single_thread(&self) -> &ModuleHandle {
        &self.single_thread
    }

    /// True iff the multi-thread variant is ready.
    pub fn supports_threads(&self) -> bool {
        matches!(self.multi_thread, MultiThread::Ready(_))
    }

    pub fn multi_thread(&self) -> Option<&ModuleHandle> {
        match &self.multi_thread {
            MultiThread::Ready(handle) => Some(handle),
            MultiThread::Unavailable(_) => None,
        }
    }

    /// Reason the multi-thread variant is absent, if it is.
    pub fn unavailable(&self) -> Option<&Unavailable> {
        match &self.multi_thread {
            MultiThread::Ready(_) => None,
            MultiThread::Unavailable(reason) => Some(reason),
        }
    }

    pub fn variant(&self, variant: Variant) -> Option<&ModuleHandle> {
        match variant {
            Variant::SingleThread => Some(&self.single_thread),
            Variant::MultiThread => self.multi_thread(),
        }
    }

    /// The multi-thread variant when available, else single-thread.
    pub fn preferred(&self) -> &ModuleHandle {
        self.multi_thread().unwrap_or(&self.single_thread)
    }
}

/// Builds a [`CapabilityBundle`].
pub struct BundleBuilder<P> {
    loader: ModuleLoader,
    probe: P,
    pool_size: PoolSize,
    init_timeout: Option<Duration>,
}

impl<P: FeatureProbe> BundleBuilder<P> {
    pub fn new(loader: ModuleLoader, probe: P) -> Self {
        Self {
            loader,
            probe,
            pool_size: PoolSize::Auto,
            init_timeout: Some(DEFAULT_INIT_TIMEOUT),
        }
    }

    /// Builder method: set the multi-thread pool size.
    pub fn with_pool_size(self, pool_size: PoolSize) -> Self {
        Self { pool_size, ..self }
    }

    /// Builder method: set the multi-thread deadline (`None` waits forever).
    pub fn with_init_timeout(self, init_timeout: Option<Duration>) -> Self {
        Self {
            init_timeout,
            ..self
        }
    }

    /// Run both initialization paths concurrently and assemble the bundle.
    ///
    /// Fails only when the single-thread variant cannot be loaded.
    pub async fn build(self) -> Result<CapabilityBundle, ModuleLoadError> {
        let (single_thread, multi_thread) = tokio::join!(
            self.loader.load(Variant::SingleThread),
            self.init_multi_thread(),
        );

        let single_thread = match single_thread {
            Ok(handle) => handle,
            Err(err) => {
                error!(module = %self.loader.name(), error = %err, "single-thread initialization failed");
                return Err(err);
            }
        };

        let bundle = CapabilityBundle {
            single_thread,
            multi_thread,
        };
        info!(
            module = %self.loader.name(),
            supports_threads = bundle.supports_threads(),
            pool_size = ?bundle.multi_thread().and_then(ModuleHandle::pool_size),
            "capability bundle ready"
        );
        Ok(bundle)
    }

    async fn init_multi_thread(&self) -> MultiThread {
        let outcome = match self.init_timeout {
            Some(limit) => tokio::time::timeout(limit, self.negotiate())
                .await
                .unwrap_or(Err(Unavailable::TimedOut(limit))),
            None => self.negotiate().await,
        };

        match outcome {
            Ok(handle) => MultiThread::Ready(handle),
            Err(Unavailable::Unsupported) => {
                info!(module = %self.loader.name(), "threads unsupported, skipping multi-thread variant");
                MultiThread::Unavailable(Unavailable::Unsupported)
            }
            Err(reason) => {
                warn!(
                    module = %self.loader.name(),
                    %reason,
                    "multi-thread variant unavailable, degrading to single-thread"
                );
                MultiThread::Unavailable(reason)
            }
        }
    }

    async fn negotiate(&self) -> Result<ModuleHandle, Unavailable> {
        if !self.probe.supports_threads().await {
            return Err(Unavailable::Unsupported);
        }

        let size = self.pool_size.resolve();
        let mut handle = self
            .loader
            .load(Variant::MultiThread)
            .await
            .map_err(Unavailable::LoadFailed)?;
        init_pool(&mut handle, size)
            .await
            .map_err(Unavailable::PoolFailed)?;
        Ok(handle)
    }
}
