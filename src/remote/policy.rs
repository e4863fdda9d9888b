// SSH authentication and host-trust policy
//
// Commands, interactive shells and rsync all go through the system OpenSSH
// client with the same options: the managed key only, no prompts, and
// trust-on-first-use host keys kept in our own known-hosts file.

use crate::config::Config;
use crate::errors::{DevkitError, Result};
use crate::keys::KeyMaterial;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

/// Resolve an external program, preferring an explicit override.
pub fn locate_tool(name: &str, override_path: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = override_path {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(DevkitError::Configuration(format!(
            "{} not found at configured path {}",
            name,
            path.display()
        )));
    }
    which::which(name)
        .map_err(|_| DevkitError::Configuration(format!("{} not found - please install", name)))
}

#[derive(Debug, Clone)]
pub struct SshPolicy {
    pub ssh: PathBuf,
    pub identity: PathBuf,
    pub known_hosts: PathBuf,
    pub connect_timeout: Duration,
}

impl SshPolicy {
    pub fn new(
        ssh: impl Into<PathBuf>,
        identity: impl Into<PathBuf>,
        known_hosts: impl Into<PathBuf>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            ssh: ssh.into(),
            identity: identity.into(),
            known_hosts: known_hosts.into(),
            connect_timeout,
        }
    }

    pub fn from_config(config: &Config, key: &KeyMaterial) -> Result<Self> {
        let ssh = locate_tool("ssh", config.tools.ssh.as_deref())?;
        Ok(Self::new(
            ssh,
            &key.private_key_path,
            config.known_hosts_path(),
            config.request_timeout(),
        ))
    }

    /// Options shared by every ssh invocation
    pub fn options(&self) -> Vec<String> {
        vec![
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            format!("UserKnownHostsFile={}", self.known_hosts.display()),
            "-o".to_string(),
            "IdentitiesOnly=yes".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
            "-i".to_string(),
            self.identity.display().to_string(),
        ]
    }

    /// Non-interactive `ssh login@address <command>`
    pub fn command(&self, login: &str, address: &str, remote_command: &str) -> Command {
        let mut command = Command::new(&self.ssh);
        command
            .args(self.options())
            .arg(format!("{}@{}", login, address))
            .arg(remote_command);
        hide_console_window(&mut command);
        command
    }

    /// argv for an interactive shell (forces a tty), optionally running one command
    pub fn interactive_argv(
        &self,
        login: &str,
        address: &str,
        remote_command: Option<&str>,
    ) -> Vec<String> {
        let mut argv = vec![self.ssh.display().to_string()];
        argv.extend(self.options());
        argv.push("-t".to_string());
        argv.push(format!("{}@{}", login, address));
        if let Some(remote_command) = remote_command {
            argv.push(remote_command.to_string());
        }
        argv
    }

    /// The ssh invocation as a single shell-quoted string, for `rsync -e`
    pub fn rsh(&self) -> Result<String> {
        let mut words = vec![self.ssh.display().to_string()];
        words.extend(self.options());
        shlex::try_join(words.iter().map(String::as_str))
            .map_err(|e| DevkitError::Configuration(format!("cannot quote ssh command: {}", e)))
    }
}

#[cfg(windows)]
pub(crate) fn hide_console_window(command: &mut Command) {
    use std::os::windows::process::CommandExt;
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    command.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
pub(crate) fn hide_console_window(_command: &mut Command) {}
