use std::path::Path;

use rshrink_core::BridgeConfig;

pub fn init(path: &str, name: &str, module_path: &str, force: bool) -> anyhow::Result<()> {
    let output = Path::new(path).join("rshrink.toml");
    if output.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", output.display());
    }

    let config = BridgeConfig::scaffold(name, module_path);
    std::fs::write(&output, config.to_toml_string()?)?;
    println!("✓ Generated {}", output.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_scaffold_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap();

        init(path, "demo", "demo.wasm", false).unwrap();
        let config = BridgeConfig::from_file(&dir.path().join("rshrink.toml")).unwrap();
        assert_eq!(config.module.name, "demo");

        assert!(init(path, "demo", "demo.wasm", false).is_err());
        init(path, "other", "demo.wasm", true).unwrap();
        let config = BridgeConfig::from_file(&dir.path().join("rshrink.toml")).unwrap();
        assert_eq!(config.module.name, "other");
    }
}
