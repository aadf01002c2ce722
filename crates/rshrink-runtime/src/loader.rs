//! Module loader — reads, compiles, instantiates and initializes a fresh
//! copy of the compute module for one variant.

use std::path::PathBuf;
use std::sync::Arc;

use rshrink_core::Variant;
use tracing::info;

use crate::engine::ComputeEngine;
use crate::error::ModuleLoadError;
use crate::handle::ModuleHandle;
use crate::instance::{CompiledModule, InstanceFactory};
use crate::limiter::DEFAULT_MEMORY_LIMIT;

/// Where the compute module artifact comes from.
#[derive(Debug, Clone)]
pub enum ModuleSource {
    /// A `.wasm` binary (or `.wat` text) file, re-read on every load.
    File(PathBuf),
    Bytes(Arc<[u8]>),
}

impl ModuleSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        ModuleSource::File(path.into())
    }

    pub fn bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        ModuleSource::Bytes(bytes.into())
    }

    async fn read(&self) -> Result<Arc<[u8]>, ModuleLoadError> {
        match self {
            ModuleSource::File(path) => match tokio::fs::read(path).await {
                Ok(bytes) => Ok(bytes.into()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(ModuleLoadError::Missing(path.clone()))
                }
                Err(source) => Err(ModuleLoadError::Read {
                    path: path.clone(),
                    source,
                }),
            },
            ModuleSource::Bytes(bytes) => Ok(Arc::clone(bytes)),
        }
    }
}

/// Loads independent copies of one compute module.
#[derive(Debug, Clone)]
pub struct ModuleLoader {
    name: String,
    source: ModuleSource,
    memory_limit: usize,
}

impl ModuleLoader {
    pub fn new(name: impl Into<String>, source: ModuleSource) -> Self {
        Self {
            name: name.into(),
            source,
            memory_limit: DEFAULT_MEMORY_LIMIT,
        }
    }

    /// Builder method: set the per-instance memory limit (bytes).
    pub fn with_memory_limit(self, memory_limit: usize) -> Self {
        Self {
            memory_limit,
            ..self
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Load a fresh copy of the module for `variant`.
    ///
    /// Every call gets its own engine, compiled module and primary instance,
    /// and the module's `init` export has run before this returns.
    pub async fn load(&self, variant: Variant) -> Result<ModuleHandle, ModuleLoadError> {
        let bytes = self.source.read().await?;
        let name = self.name.clone();
        let memory_limit = self.memory_limit;

        tokio::task::spawn_blocking(move || load_blocking(&name, variant, &bytes, memory_limit))
            .await
            .map_err(|e| ModuleLoadError::Aborted(e.to_string()))?
    }
}

fn load_blocking(
    name: &str,
    variant: Variant,
    bytes: &[u8],
    memory_limit: usize,
) -> Result<ModuleHandle, ModuleLoadError> {
    let engine = ComputeEngine::new(variant).map_err(|e| ModuleLoadError::Engine(format!("{e:#}")))?;
    let module = CompiledModule::from_bytes(engine, name, bytes)
        .map_err(|e| ModuleLoadError::Compile(format!("{e:#}")))?;
    let factory = InstanceFactory::new(module, memory_limit);

    let mut primary = factory
        .create_instance()
        .map_err(|e| ModuleLoadError::Instantiate(format!("{e:#}")))?;
    let ran_init = primary
        .run_init()
        .map_err(|e| ModuleLoadError::Init(e.to_string()))?;

    let handle = ModuleHandle::new(factory, primary);
    info!(
        %name,
        %variant,
        exports = handle.exports().len(),
        ran_init,
        "compute module loaded"
    );
    Ok(handle)
}
