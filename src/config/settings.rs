// Configuration structs

use super::constants::{
    CONFIG_DIR_NAME, DEFAULT_DEVKIT_HTTP_PORT, DISCOVERY_TIMEOUT, REQUEST_TIMEOUT,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Overrides for the external programs the transport shells out to.
///
/// Anything left unset is looked up on `PATH` when first needed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// OpenSSH client binary
    #[serde(default)]
    pub ssh: Option<PathBuf>,

    /// rsync binary
    #[serde(default)]
    pub rsync: Option<PathBuf>,

    /// Known-hosts file handed to ssh. Defaults to one under the config dir,
    /// so trust-on-first-use entries never touch the user's own file.
    #[serde(default)]
    pub known_hosts: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the keypair, game details and this config file.
    /// Not read from the file itself.
    #[serde(skip)]
    pub config_dir: PathBuf,

    /// Port of the devkit HTTP service (metadata, registration)
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Timeout for metadata requests and ssh connects, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Timeout for a synchronous discovery lookup, in seconds
    #[serde(default = "default_discovery_timeout_secs")]
    pub discovery_timeout_secs: u64,

    #[serde(default)]
    pub tools: ToolsConfig,
}

fn default_http_port() -> u16 {
    DEFAULT_DEVKIT_HTTP_PORT
}

fn default_request_timeout_secs() -> u64 {
    REQUEST_TIMEOUT.as_secs()
}

fn default_discovery_timeout_secs() -> u64 {
    DISCOVERY_TIMEOUT.as_secs()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            http_port: default_http_port(),
            request_timeout_secs: default_request_timeout_secs(),
            discovery_timeout_secs: default_discovery_timeout_secs(),
            tools: ToolsConfig::default(),
        }
    }
}

impl Config {
    /// Defaults rooted at an explicit directory (used by tests and `--config-dir`).
    pub fn with_config_dir(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            ..Self::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }

    /// Where the managed keypair lives
    pub fn key_dir(&self) -> PathBuf {
        self.config_dir.clone()
    }

    /// Per-game JSON files
    pub fn games_dir(&self) -> PathBuf {
        self.config_dir.join("games")
    }

    pub fn known_hosts_path(&self) -> PathBuf {
        self.tools
            .known_hosts
            .clone()
            .unwrap_or_else(|| self.config_dir.join("known_hosts"))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.http_port == 0 {
            anyhow::bail!("http_port must be non-zero");
        }
        if self.request_timeout_secs == 0 || self.discovery_timeout_secs == 0 {
            anyhow::bail!("timeouts must be at least one second");
        }
        Ok(())
    }
}

/// `<platform config dir>/steamos-devkit`, falling back to the working directory
/// on systems without one.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_constants() {
        let config = Config::with_config_dir("/tmp/devkit");
        assert_eq!(config.http_port, 32000);
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.discovery_timeout(), Duration::from_secs(10));
        assert_eq!(config.games_dir(), PathBuf::from("/tmp/devkit/games"));
        assert_eq!(
            config.known_hosts_path(),
            PathBuf::from("/tmp/devkit/known_hosts")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_port_rejected() {
        let mut config = Config::with_config_dir("/tmp/devkit");
        config.http_port = 0;
        assert!(config.validate().is_err());
    }
}
