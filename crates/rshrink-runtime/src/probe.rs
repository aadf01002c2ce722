//! Feature probe — does the host support shared-memory parallelism?
//!
//! The host probe enables the WebAssembly threads proposal on a throwaway
//! engine, creates a shared linear memory and spawns a thread. Any failure
//! means "no": the probe itself never errors.

use std::future::Future;
use std::sync::OnceLock;

use rshrink_core::ThreadMode;
use tracing::debug;
use wasmtime::{Config, Engine, MemoryType, SharedMemory};

/// Answers whether the multi-thread variant should be attempted.
pub trait FeatureProbe: Send + Sync {
    fn supports_threads(&self) -> impl Future<Output = bool> + Send;
}

/// Probes the running host. The result is computed once per process.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostProbe;

static HOST_SUPPORTS_THREADS: OnceLock<bool> = OnceLock::new();

impl FeatureProbe for HostProbe {
    fn supports_threads(&self) -> impl Future<Output = bool> + Send {
        async {
            if let Some(cached) = HOST_SUPPORTS_THREADS.get() {
                return *cached;
            }
            let supported = match tokio::task::spawn_blocking(probe_host).await {
                Ok(Ok(())) => true,
                Ok(Err(reason)) => {
                    debug!(%reason, "thread support probe negative");
                    false
                }
                Err(e) => {
                    debug!(error = %e, "thread support probe aborted");
                    false
                }
            };
            *HOST_SUPPORTS_THREADS.get_or_init(|| supported)
        }
    }
}

fn probe_host() -> Result<(), String> {
    let mut config = Config::new();
    config.wasm_threads(true);
    let engine = Engine::new(&config).map_err(|e| format!("threads proposal unavailable: {e:#}"))?;

    SharedMemory::new(&engine, MemoryType::shared(1, 1))
        .map_err(|e| format!("shared memory rejected: {e:#}"))?;

    std::thread::Builder::new()
        .name("rshrink-probe".to_string())
        .spawn(|| {})
        .map_err(|e| format!("cannot spawn threads: {e}"))?
        .join()
        .map_err(|_| "probe thread panicked".to_string())
}

impl FeatureProbe for ThreadMode {
    fn supports_threads(&self) -> impl Future<Output = bool> + Send {
        let mode = *self;
        async move {
            match mode {
                ThreadMode::Auto => HostProbe.supports_threads().await,
                ThreadMode::Off => false,
                ThreadMode::Force => true,
            }
        }
    }
}
