// Capture and session recipes
//
// Each recipe has the same shape: clean up leftovers, trigger something on the
// devkit, poll for the outcome with a bounded budget, then fetch or report.
// Running out of budget is a `Timeout`, never a `CommandFailed`.

pub mod gpu_trace;
pub mod rgp;
pub mod screenshot;
pub mod steamos;

pub use gpu_trace::capture_gpu_trace;
pub use rgp::capture_rgp;
pub use screenshot::{capture_screenshot, ScreenshotRequest};
pub use steamos::{get_status, switch_session, SteamosStatus};

use crate::errors::{DevkitError, Result};
use crate::remote::{ExecutionResult, Session};
use std::path::Path;
use std::time::Duration;

/// The two remote operations the recipes need.
pub trait RemoteShell {
    /// Run a command and report its output whatever the exit status
    fn run(&mut self, command: &str) -> Result<ExecutionResult>;

    fn fetch(&mut self, remote_path: &str, local_path: &Path) -> Result<u64>;
}

impl RemoteShell for Session {
    fn run(&mut self, command: &str) -> Result<ExecutionResult> {
        Session::run(self, command)
    }

    fn fetch(&mut self, remote_path: &str, local_path: &Path) -> Result<u64> {
        Session::fetch(self, remote_path, local_path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub attempts: u32,
}

impl PollPolicy {
    pub const SCREENSHOT: PollPolicy = PollPolicy {
        interval: Duration::from_millis(100),
        attempts: 100,
    };

    pub const SESSION_SWITCH: PollPolicy = PollPolicy {
        interval: Duration::from_secs(1),
        attempts: 5,
    };

    /// 2s for the trace file to appear
    pub const RGP: PollPolicy = PollPolicy {
        interval: Duration::from_millis(100),
        attempts: 20,
    };

    pub const fn new(interval: Duration, attempts: u32) -> Self {
        Self { interval, attempts }
    }

    /// Sleep-then-check up to `attempts` times; first `Some` wins.
    pub(crate) fn poll<T>(
        &self,
        mut check: impl FnMut() -> Result<Option<T>>,
    ) -> Result<Option<T>> {
        for _ in 0..self.attempts {
            std::thread::sleep(self.interval);
            if let Some(found) = check()? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }
}

/// `run`, but a non-zero exit is an error
pub(crate) fn run_checked(shell: &mut dyn RemoteShell, command: &str) -> Result<ExecutionResult> {
    let result = shell.run(command)?;
    if !result.success() {
        return Err(DevkitError::CommandFailed {
            command: command.to_string(),
            code: result.exit_status,
            stderr: result.stderr,
        });
    }
    Ok(result)
}

/// Last path component of a remote POSIX path
pub(crate) fn remote_file_name(remote_path: &str) -> &str {
    remote_path.rsplit('/').next().unwrap_or(remote_path)
}
