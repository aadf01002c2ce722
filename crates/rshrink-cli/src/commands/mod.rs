pub mod call;
pub mod init;
pub mod inspect;
pub mod probe;

use std::num::NonZeroUsize;
use std::path::Path;

use anyhow::Context;
use rshrink_core::{BridgeConfig, ThreadMode};
use rshrink_runtime::{ModuleSource, PoolSize, RuntimeOptions};
use tracing::debug;

/// Resolve runtime options from `rshrink.toml` and command-line overrides.
///
/// With `--module` the config file is optional; without it the config must
/// exist and name the module.
pub fn runtime_options(
    config: &str,
    module: Option<&str>,
    threads: Option<&str>,
    pool_size: Option<usize>,
) -> anyhow::Result<RuntimeOptions> {
    let config_path = Path::new(config);

    let mut options = match module {
        Some(module) if !config_path.exists() => {
            let path = Path::new(module);
            let name = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or("module");
            RuntimeOptions::new(name, ModuleSource::file(path))
        }
        _ => {
            let parsed = BridgeConfig::from_file(config_path)
                .with_context(|| format!("failed to read {}", config_path.display()))?;
            let base_dir = config_path.parent().unwrap_or(Path::new("."));
            let mut options = RuntimeOptions::from_config(&parsed, base_dir)
                .with_context(|| format!("invalid {}", config_path.display()))?;
            if let Some(module) = module {
                options.source = ModuleSource::file(module);
            }
            options
        }
    };

    if let Some(threads) = threads {
        let mode: ThreadMode = threads.parse()?;
        options = options.with_thread_mode(mode);
    }
    if let Some(size) = pool_size {
        let size = NonZeroUsize::new(size).context("--pool-size must be at least 1")?;
        options = options.with_pool_size(PoolSize::Fixed(size));
    }

    debug!(
        module = %options.module_name,
        threads = ?options.thread_mode,
        pool_size = ?options.pool_size,
        init_timeout = ?options.init_timeout,
        "resolved runtime options"
    );
    Ok(options)
}
