// Directory synchronization through rsync over the managed ssh policy

use crate::config::Config;
use crate::errors::{DevkitError, Result};
use crate::remote::policy::{hide_console_window, locate_tool, SshPolicy};
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};

/// Permissions applied on the receiving side
const CHMOD: &str = "--chmod=Du=rwx,Dgo=rx,Fu=rwx,Fog=rx";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// local -> remote
    #[default]
    Upload,
    Download,
}

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Remove files on the receiving side that the sender does not have
    pub delete_extraneous: bool,
    /// Leave files that are newer on the receiving side untouched
    pub skip_newer_files: bool,
    pub verify_checksums: bool,
    /// Passed through before the paths, typically filters
    pub extra_args: Vec<String>,
}

/// Stops the transfer in progress, from any thread.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    running: Arc<Mutex<Option<Child>>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        if let Some(child) = self.slot().as_mut() {
            tracing::info!("Cancelling transfer (pid {})", child.id());
            if let Err(e) = child.kill() {
                tracing::warn!("Failed to stop rsync: {}", e);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.slot().is_some()
    }

    fn slot(&self) -> MutexGuard<'_, Option<Child>> {
        // A poisoned slot still holds a valid child handle
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct SyncEngine {
    rsync: PathBuf,
    policy: SshPolicy,
    cancel: CancelHandle,
}

impl SyncEngine {
    pub fn new(rsync: impl Into<PathBuf>, policy: SshPolicy) -> Self {
        Self {
            rsync: rsync.into(),
            policy,
            cancel: CancelHandle::default(),
        }
    }

    pub fn from_config(config: &Config, policy: SshPolicy) -> Result<Self> {
        let rsync = locate_tool("rsync", config.tools.rsync.as_deref())?;
        Ok(Self::new(rsync, policy))
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Make `remote_dir` mirror `local_dir` (or the reverse for downloads).
    /// Returns rsync's exit code, which is always 0 on success.
    pub fn sync(
        &self,
        local_dir: &Path,
        user: &str,
        address: &str,
        remote_dir: &str,
        options: &SyncOptions,
        direction: Direction,
    ) -> Result<i32> {
        if !local_dir.is_dir() {
            return Err(DevkitError::Configuration(format!(
                "Source directory does not exist: {}",
                local_dir.display()
            )));
        }

        let args = rsync_args(
            &self.policy.rsh()?,
            local_dir,
            user,
            address,
            remote_dir,
            options,
            direction,
        );
        let mut command = Command::new(&self.rsync);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        hide_console_window(&mut command);
        tracing::info!(
            "{} {}",
            self.rsync.display(),
            shlex::try_join(args.iter().map(String::as_str)).unwrap_or_else(|_| args.join(" "))
        );

        let mut child = command.spawn().map_err(|e| {
            DevkitError::Configuration(format!("failed to run {}: {}", self.rsync.display(), e))
        })?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        *self.cancel.slot() = Some(child);

        std::thread::scope(|scope| {
            if let Some(stderr) = stderr {
                scope.spawn(move || relay_progress(stderr));
            }
            if let Some(stdout) = stdout {
                relay_progress(stdout);
            }
        });

        let child = self.cancel.slot().take();
        let status = match child {
            Some(mut child) => child.wait()?,
            None => {
                return Err(DevkitError::Io(io::Error::new(
                    io::ErrorKind::Other,
                    "rsync process handle lost",
                )))
            }
        };

        let code = status.code().unwrap_or(-1);
        if code != 0 {
            return Err(DevkitError::TransferFailed {
                path: local_dir.to_path_buf(),
                code,
            });
        }
        Ok(code)
    }
}

fn relay_progress(stream: impl Read) {
    for line in BufReader::new(stream).split(b'\n') {
        match line {
            Ok(line) => {
                let text = String::from_utf8_lossy(&line);
                let text = text.trim();
                if !text.is_empty() {
                    tracing::info!("{}", text);
                }
            }
            Err(e) => {
                tracing::debug!("rsync output closed: {}", e);
                break;
            }
        }
    }
}

/// Directory-to-directory form: exactly one trailing slash
fn as_dir(path: &str) -> String {
    format!("{}/", path.trim_end_matches('/'))
}

pub(crate) fn rsync_args(
    rsh: &str,
    local_dir: &Path,
    user: &str,
    address: &str,
    remote_dir: &str,
    options: &SyncOptions,
    direction: Direction,
) -> Vec<String> {
    let mut args = vec![
        "-av".to_string(),
        CHMOD.to_string(),
        "-e".to_string(),
        rsh.to_string(),
    ];
    if options.delete_extraneous {
        args.extend(["--delete", "--delete-excluded", "--delete-delay"].map(String::from));
    }
    if options.skip_newer_files {
        args.push("--update".to_string());
    }
    if options.verify_checksums {
        if options.skip_newer_files {
            tracing::warn!(
                "combining --update and --checksum in rsync command line - may cause unexpected behavior"
            );
        }
        args.push("--checksum".to_string());
    }
    args.extend(options.extra_args.iter().cloned());

    let local = as_dir(&local_dir.to_string_lossy());
    let remote = format!("{}@{}:{}", user, address, as_dir(remote_dir));
    match direction {
        Direction::Upload => args.extend([local, remote]),
        Direction::Download => args.extend([remote, local]),
    }
    args
}
