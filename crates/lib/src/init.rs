//! Initialize the configuration directory: create ~/.switchboard, a default config, and the
//! `packages` and `data` subdirectories.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config;

/// Ensure the configuration directory has been initialized (config file and package root exist).
pub fn require_initialized(config_path: &Path, config: &config::Config) -> Result<()> {
    if !config_path.exists() {
        anyhow::bail!(
            "configuration not initialized; run `switchboard init` first (config file not found: {})",
            config_path.display()
        );
    }
    let packages_dir = config::resolve_packages_dir(config, config_path);
    if !packages_dir.exists() {
        anyhow::bail!(
            "configuration not initialized; run `switchboard init` first (packages directory not found: {})",
            packages_dir.display()
        );
    }
    Ok(())
}

/// Create the config directory and default layout if missing. Existing files are left alone.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config::config_dir(config_path);
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        std::fs::write(config_path, b"{}")
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    }

    for dir in [config::packages_dir(config_path), config::data_dir(config_path)] {
        if dir.exists() {
            log::debug!("{} already exists, skipping", dir.display());
            continue;
        }
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating directory {}", dir.display()))?;
        log::info!("created {}", dir.display());
    }

    Ok(config_dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_then_require_initialized() {
        let dir = std::env::temp_dir().join(format!("switchboard-init-{}", uuid::Uuid::new_v4()));
        let config_path = dir.join("config.json");
        let config = config::Config::default();
        assert!(require_initialized(&config_path, &config).is_err());

        let created = init_config_dir(&config_path).unwrap();
        assert_eq!(created, dir);
        assert_eq!(std::fs::read_to_string(&config_path).unwrap(), "{}");
        assert!(dir.join("packages").is_dir());
        assert!(dir.join("data").is_dir());
        require_initialized(&config_path, &config).unwrap();

        // idempotent; keeps an edited config
        std::fs::write(&config_path, r#"{"gateway":{"port":1}}"#).unwrap();
        init_config_dir(&config_path).unwrap();
        assert!(std::fs::read_to_string(&config_path).unwrap().contains("port"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
