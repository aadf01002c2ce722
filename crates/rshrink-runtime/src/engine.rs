//! ComputeEngine — a `wasmtime::Engine` + `Linker` pair for one module variant.
//!
//! Each variant of the compute module gets its own engine so the
//! single-thread and multi-thread initializations never share compiled code
//! or configuration. The multi-thread engine enables the WebAssembly threads
//! proposal and epoch interruption, so a pool that is torn down mid-startup
//! can stop guest code that never returns.

use std::sync::Arc;

use rshrink_core::Variant;
use wasmtime::{Config, Engine, Linker};

use crate::limiter::ComputeLimiter;

/// Per-instance store data.
pub struct InstanceState {
    /// Memory and table enforcement for this instance.
    pub limiter: ComputeLimiter,
}

/// Engine configured for one variant of the compute module.
///
/// Cheap to clone (holds `Arc` references internally).
#[derive(Clone)]
pub struct ComputeEngine {
    engine: Engine,
    linker: Arc<Linker<InstanceState>>,
    variant: Variant,
}

impl ComputeEngine {
    /// Create a fresh engine for `variant`.
    pub fn new(variant: Variant) -> anyhow::Result<Self> {
        let mut config = Config::new();
        config.wasm_threads(variant == Variant::MultiThread);
        config.epoch_interruption(variant == Variant::MultiThread);

        let engine = Engine::new(&config)?;
        // The compute module ABI has no imports, so the linker stays empty.
        let linker = Linker::new(&engine);

        tracing::debug!(%variant, "compute engine initialized");

        Ok(Self {
            engine,
            linker: Arc::new(linker),
            variant,
        })
    }

    /// Get a reference to the underlying `wasmtime::Engine`.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Get a reference to the configured `Linker`.
    pub fn linker(&self) -> &Linker<InstanceState> {
        &self.linker
    }

    /// The variant this engine was configured for.
    pub fn variant(&self) -> Variant {
        self.variant
    }

    /// Whether stores on this engine observe epoch deadlines.
    pub fn interruptible(&self) -> bool {
        self.variant == Variant::MultiThread
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_thread_engine_creates_successfully() {
        let engine = ComputeEngine::new(Variant::SingleThread).unwrap();
        assert_eq!(engine.variant(), Variant::SingleThread);
    }

    #[test]
    fn engines_are_independent() {
        let a = ComputeEngine::new(Variant::SingleThread).unwrap();
        let b = ComputeEngine::new(Variant::SingleThread).unwrap();
        assert!(!Engine::same(a.engine(), b.engine()));
    }

    #[test]
    fn only_multi_thread_engines_are_interruptible() {
        assert!(!ComputeEngine::new(Variant::SingleThread).unwrap().interruptible());
        assert!(ComputeEngine::new(Variant::MultiThread).unwrap().interruptible());
    }
}
