//! rshrink.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub module: ModuleConfig,
    pub threads: Option<ThreadsConfig>,
    pub limits: Option<LimitsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub name: String,
    /// Path to the `.wasm` (or `.wat`) artifact. Relative paths resolve
    /// against the directory holding the config file.
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadsConfig {
    /// `auto`, `off` or `force`.
    pub mode: Option<String>,
    pub pool_size: Option<u32>,
    /// Deadline for the multi-thread initialization path, e.g. "30s".
    /// "0" disables the deadline.
    pub init_timeout: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub memory_limit_mb: Option<u64>,
}

impl BridgeConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: BridgeConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Resolve the module path relative to `base_dir`.
    pub fn module_path(&self, base_dir: &Path) -> PathBuf {
        let path = Path::new(&self.module.path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Scaffold a minimal rshrink.toml for a module artifact.
    pub fn scaffold(name: &str, module_path: &str) -> Self {
        BridgeConfig {
            module: ModuleConfig {
                name: name.to_string(),
                path: module_path.to_string(),
            },
            threads: Some(ThreadsConfig {
                mode: Some("auto".to_string()),
                pool_size: None,
                init_timeout: Some("30s".to_string()),
            }),
            limits: Some(LimitsConfig {
                memory_limit_mb: Some(64),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaffold() {
        let config = BridgeConfig::scaffold("rshrink", "pkg/rshrink.wasm");
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("rshrink"));
        assert!(toml_str.contains("pkg/rshrink.wasm"));
        assert!(toml_str.contains("auto"));
    }

    #[test]
    fn test_parse_minimal() {
        let toml_str = r#"
[module]
name = "rshrink"
path = "pkg/rshrink.wasm"
"#;
        let config: BridgeConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.module.name, "rshrink");
        assert!(config.threads.is_none());
        assert!(config.limits.is_none());
    }

    #[test]
    fn test_parse_full() {
        let toml_str = r#"
[module]
name = "rshrink"
path = "/opt/rshrink.wasm"

[threads]
mode = "force"
pool_size = 4
init_timeout = "500ms"

[limits]
memory_limit_mb = 128
"#;
        let config: BridgeConfig = toml::from_str(toml_str).unwrap();
        let threads = config.threads.as_ref().unwrap();
        assert_eq!(threads.mode.as_deref(), Some("force"));
        assert_eq!(threads.pool_size, Some(4));
        assert_eq!(threads.init_timeout.as_deref(), Some("500ms"));
        assert_eq!(config.limits.unwrap().memory_limit_mb, Some(128));
    }

    #[test]
    fn module_path_resolves_relative_to_base() {
        let config = BridgeConfig::scaffold("rshrink", "pkg/rshrink.wasm");
        assert_eq!(
            config.module_path(Path::new("/srv/app")),
            PathBuf::from("/srv/app/pkg/rshrink.wasm")
        );

        let config = BridgeConfig::scaffold("rshrink", "/abs/rshrink.wasm");
        assert_eq!(
            config.module_path(Path::new("/srv/app")),
            PathBuf::from("/abs/rshrink.wasm")
        );
    }

    #[test]
    fn scaffold_round_trips_through_toml() {
        let config = BridgeConfig::scaffold("demo", "demo.wasm");
        let parsed: BridgeConfig = toml::from_str(&config.to_toml_string().unwrap()).unwrap();
        assert_eq!(parsed.module.path, "demo.wasm");
        assert_eq!(parsed.threads.unwrap().init_timeout.as_deref(), Some("30s"));
    }
}
