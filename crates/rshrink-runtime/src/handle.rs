//! ModuleHandle — the callable surface of one loaded compute module.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rshrink_core::{Value, Variant};
use tracing::debug;

use crate::error::{CallError, CallResult};
use crate::instance::{InstanceFactory, WasmInstance};
use crate::limiter::MemoryUsage;
use crate::pool::ThreadPool;

/// A loaded and initialized compute module.
///
/// Without a pool, calls run one at a time on the primary instance via the
/// blocking task pool. Once [`crate::pool::init_pool`] has registered a
/// pool, calls are dispatched to idle pool workers instead.
pub struct ModuleHandle {
    factory: InstanceFactory,
    exports: Vec<String>,
    primary: Arc<Mutex<WasmInstance>>,
    pool: Option<ThreadPool>,
    peak_memory: Arc<AtomicUsize>,
}

impl std::fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("exports", &self.exports)
            .finish_non_exhaustive()
    }
}

impl ModuleHandle {
    pub(crate) fn new(factory: InstanceFactory, primary: WasmInstance) -> Self {
        let exports = factory.module().exports();
        let peak_memory = Arc::new(AtomicUsize::new(primary.peak_memory()));
        Self {
            factory,
            exports,
            primary: Arc::new(Mutex::new(primary)),
            pool: None,
            peak_memory,
        }
    }

    pub fn name(&self) -> &str {
        self.factory.module().name()
    }

    pub fn variant(&self) -> Variant {
        self.factory.module().variant()
    }

    /// Exported domain functions, sorted by name.
    pub fn exports(&self) -> &[String] {
        &self.exports
    }

    /// Peak linear memory across the primary instance and every pool
    /// worker, as of the last completed call.
    pub fn memory_usage(&self) -> MemoryUsage {
        MemoryUsage {
            peak: self.peak_memory.load(Ordering::Relaxed),
            limit: self.factory.memory_limit(),
        }
    }

    /// Number of pool workers, if a pool is registered.
    pub fn pool_size(&self) -> Option<usize> {
        self.pool.as_ref().map(ThreadPool::size)
    }

    pub(crate) fn factory(&self) -> &InstanceFactory {
        &self.factory
    }

    pub(crate) fn peak_memory_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.peak_memory)
    }

    pub(crate) fn attach_pool(&mut self, pool: ThreadPool) {
        self.pool = Some(pool);
    }

    /// Call an export with marshaled arguments.
    pub async fn call(&self, export: &str, args: Vec<Value>) -> CallResult<Value> {
        debug!(module = %self.name(), variant = %self.variant(), %export, "calling export");
        let export = export.to_string();
        match &self.pool {
            Some(pool) => pool.run(move |instance| instance.invoke(&export, &args)).await?,
            None => self.call_primary(export, args).await,
        }
    }

    /// Call an export once per batch of arguments.
    ///
    /// With a pool every batch is queued up front so they run in parallel
    /// across the workers. Results keep the order of `batches`.
    pub async fn call_many(&self, export: &str, batches: Vec<Vec<Value>>) -> Vec<CallResult<Value>> {
        debug!(
            module = %self.name(),
            variant = %self.variant(),
            %export,
            batches = batches.len(),
            "calling export in batch"
        );

        let Some(pool) = &self.pool else {
            let mut results = Vec::with_capacity(batches.len());
            for args in batches {
                results.push(self.call_primary(export.to_string(), args).await);
            }
            return results;
        };

        let pending: Vec<_> = batches
            .into_iter()
            .map(|args| {
                let export = export.to_string();
                pool.submit(move |instance| instance.invoke(&export, &args))
            })
            .collect();

        let mut results = Vec::with_capacity(pending.len());
        for submitted in pending {
            let result = match submitted {
                Ok(rx) => rx.await.unwrap_or(Err(CallError::PoolClosed)),
                Err(err) => Err(err),
            };
            results.push(result);
        }
        results
    }

    async fn call_primary(&self, export: String, args: Vec<Value>) -> CallResult<Value> {
        let primary = Arc::clone(&self.primary);
        let peak_memory = Arc::clone(&self.peak_memory);
        tokio::task::spawn_blocking(move || {
            let mut instance = primary.lock().map_err(|_| CallError::Poisoned)?;
            let result = instance.invoke(&export, &args);
            peak_memory.fetch_max(instance.peak_memory(), Ordering::Relaxed);
            result
        })
        .await
        .map_err(|e| CallError::Aborted(e.to_string()))?
    }
}
