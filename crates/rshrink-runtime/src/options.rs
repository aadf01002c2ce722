//! RuntimeOptions — everything the worker needs to build a bundle.
//!
//! Built from an `rshrink-core::BridgeConfig` (the user-facing TOML config)
//! or programmatically through the builder methods.

use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use rshrink_core::{BridgeConfig, ThreadMode, parse_duration};

use crate::bundle::{BundleBuilder, DEFAULT_INIT_TIMEOUT};
use crate::limiter::DEFAULT_MEMORY_LIMIT;
use crate::loader::{ModuleLoader, ModuleSource};
use crate::pool::PoolSize;

#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Human-readable name for logging.
    pub module_name: String,
    pub source: ModuleSource,
    pub thread_mode: ThreadMode,
    pub pool_size: PoolSize,
    /// Deadline for the multi-thread path; `None` waits forever.
    pub init_timeout: Option<Duration>,
    /// Per-instance linear-memory cap in bytes.
    pub memory_limit: usize,
}

impl RuntimeOptions {
    pub fn new(module_name: impl Into<String>, source: ModuleSource) -> Self {
        Self {
            module_name: module_name.into(),
            source,
            thread_mode: ThreadMode::Auto,
            pool_size: PoolSize::Auto,
            init_timeout: Some(DEFAULT_INIT_TIMEOUT),
            memory_limit: DEFAULT_MEMORY_LIMIT,
        }
    }

    /// Create options from an `rshrink.toml`, resolving the module path
    /// against `base_dir`.
    pub fn from_config(config: &BridgeConfig, base_dir: &Path) -> anyhow::Result<Self> {
        let mut options = Self::new(
            config.module.name.clone(),
            ModuleSource::File(config.module_path(base_dir)),
        );

        if let Some(threads) = &config.threads {
            if let Some(mode) = &threads.mode {
                options.thread_mode = mode.parse::<ThreadMode>().context("invalid [threads].mode")?;
            }
            if let Some(size) = threads.pool_size {
                let Some(size) = NonZeroUsize::new(size as usize) else {
                    bail!("[threads].pool_size must be at least 1");
                };
                options.pool_size = PoolSize::Fixed(size);
            }
            if let Some(timeout) = &threads.init_timeout {
                let Some(timeout) = parse_duration(timeout) else {
                    bail!("invalid [threads].init_timeout: {timeout:?}");
                };
                options.init_timeout = (!timeout.is_zero()).then_some(timeout);
            }
        }

        if let Some(limit_mb) = config.limits.as_ref().and_then(|l| l.memory_limit_mb) {
            if limit_mb == 0 {
                bail!("[limits].memory_limit_mb must be at least 1");
            }
            options.memory_limit = usize::try_from(limit_mb)
                .ok()
                .and_then(|mb| mb.checked_mul(1024 * 1024))
                .context("[limits].memory_limit_mb is too large")?;
        }

        Ok(options)
    }

    /// Builder method: set the thread mode.
    pub fn with_thread_mode(self, thread_mode: ThreadMode) -> Self {
        Self {
            thread_mode,
            ..self
        }
    }

    /// Builder method: set the pool size.
    pub fn with_pool_size(self, pool_size: PoolSize) -> Self {
        Self { pool_size, ..self }
    }

    /// Builder method: set the multi-thread deadline.
    pub fn with_init_timeout(self, init_timeout: Option<Duration>) -> Self {
        Self {
            init_timeout,
            ..self
        }
    }

    /// Builder method: set the per-instance memory limit (bytes).
    pub fn with_memory_limit(self, memory_limit: usize) -> Self {
        Self {
            memory_limit,
            ..self
        }
    }

    pub fn loader(&self) -> ModuleLoader {
        ModuleLoader::new(self.module_name.clone(), self.source.clone())
            .with_memory_limit(self.memory_limit)
    }

    /// A bundle builder that probes according to `thread_mode`.
    pub fn bundle_builder(&self) -> BundleBuilder<ThreadMode> {
        BundleBuilder::new(self.loader(), self.thread_mode)
            .with_pool_size(self.pool_size)
            .with_init_timeout(self.init_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn parse(toml_str: &str) -> BridgeConfig {
        toml::from_str(toml_str).unwrap()
    }

    #[test]
    fn defaults_without_optional_sections() {
        let config = parse(
            r#"
[module]
name = "rshrink"
path = "pkg/rshrink.wasm"
"#,
        );
        let options = RuntimeOptions::from_config(&config, Path::new("/srv")).unwrap();

        assert_eq!(options.thread_mode, ThreadMode::Auto);
        assert_eq!(options.pool_size, PoolSize::Auto);
        assert_eq!(options.init_timeout, Some(DEFAULT_INIT_TIMEOUT));
        assert_eq!(options.memory_limit, DEFAULT_MEMORY_LIMIT);
        assert!(matches!(
            options.source,
            ModuleSource::File(ref path) if *path == PathBuf::from("/srv/pkg/rshrink.wasm")
        ));
    }

    #[test]
    fn maps_threads_and_limits() {
        let config = parse(
            r#"
[module]
name = "rshrink"
path = "rshrink.wasm"

[threads]
mode = "force"
pool_size = 4
init_timeout = "250ms"

[limits]
memory_limit_mb = 16
"#,
        );
        let options = RuntimeOptions::from_config(&config, Path::new(".")).unwrap();

        assert_eq!(options.thread_mode, ThreadMode::Force);
        assert_eq!(options.pool_size, PoolSize::Fixed(NonZeroUsize::new(4).unwrap()));
        assert_eq!(options.init_timeout, Some(Duration::from_millis(250)));
        assert_eq!(options.memory_limit, 16 * 1024 * 1024);
    }

    #[test]
    fn zero_timeout_disables_deadline() {
        let config = parse(
            r#"
[module]
name = "rshrink"
path = "rshrink.wasm"

[threads]
init_timeout = "0"
"#,
        );
        let options = RuntimeOptions::from_config(&config, Path::new(".")).unwrap();
        assert_eq!(options.init_timeout, None);
    }

    #[test]
    fn rejects_invalid_values() {
        for threads in [
            r#"mode = "sometimes""#,
            "pool_size = 0",
            r#"init_timeout = "later""#,
        ] {
            let config = parse(&format!(
                "[module]\nname = \"m\"\npath = \"m.wasm\"\n\n[threads]\n{threads}\n"
            ));
            assert!(
                RuntimeOptions::from_config(&config, Path::new(".")).is_err(),
                "{threads} should be rejected"
            );
        }
    }

    #[test]
    fn builder_methods_chain() {
        let options = RuntimeOptions::new("m", ModuleSource::bytes(&b""[..]))
            .with_thread_mode(ThreadMode::Off)
            .with_pool_size(PoolSize::Fixed(NonZeroUsize::new(2).unwrap()))
            .with_init_timeout(None)
            .with_memory_limit(1024);

        assert_eq!(options.thread_mode, ThreadMode::Off);
        assert_eq!(options.init_timeout, None);
        assert_eq!(options.memory_limit, 1024);
        assert_eq!(options.loader().name(), "m");
    }
}
