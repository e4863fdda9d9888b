// Configuration loader
// Loads overrides from <config dir>/config.toml; a missing file means defaults

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use super::settings::{default_config_dir, Config};

/// Load configuration from the default per-user config directory
pub fn load_config() -> Result<Config> {
    load_config_from(&default_config_dir())
}

/// Load configuration rooted at `config_dir`
pub fn load_config_from(config_dir: &Path) -> Result<Config> {
    let config_path = config_dir.join("config.toml");

    if !config_path.exists() {
        tracing::debug!(path = %config_path.display(), "No config file, using defaults");
        return Ok(Config::with_config_dir(config_dir));
    }

    let contents = fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read config file {}", config_path.display()))?;

    let mut config: Config = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", config_path.display()))?;
    config.config_dir = config_dir.to_path_buf();

    config
        .validate()
        .context("Configuration validation failed")?;

    tracing::debug!(path = %config_path.display(), "Loaded config");
    Ok(config)
}
