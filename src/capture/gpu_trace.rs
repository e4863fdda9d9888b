// GPU trace capture via the devkit's gpu-trace service

use crate::errors::{DevkitError, Result};
use std::path::Path;

use super::{run_checked, RemoteShell};

const CAPTURE_FAILED_MARKER: &str = "Failed to capture trace";

/// Capture a trace into `local_path`. If the first capture fails, tracing is
/// assumed to be off: it is started once and the capture retried once.
pub fn capture_gpu_trace(shell: &mut dyn RemoteShell, local_path: &Path) -> Result<()> {
    // Reserve a unique name, then free it for gpu-trace to write
    let reserved = run_checked(shell, "mktemp -p /tmp XXXXXXXXX-gpu-trace.zip")?;
    let remote_path = reserved.stdout_text().trim().to_string();
    if remote_path.is_empty() {
        return Err(DevkitError::Protocol {
            source_name: "mktemp".to_string(),
            reason: "empty temp path".to_string(),
        });
    }
    let quoted = shlex::try_quote(&remote_path).map_err(|e| DevkitError::Protocol {
        source_name: "mktemp".to_string(),
        reason: e.to_string(),
    })?;
    run_checked(shell, &format!("rm {}", quoted))?;

    let capture = format!("gpu-trace --capture --no-gpuvis -o {}", quoted);
    let mut result = shell.run(&capture)?;
    if !result.success() || result.stderr.contains(CAPTURE_FAILED_MARKER) {
        tracing::info!("start tracing and try again");
        shell.run("gpu-trace --start")?;
        result = shell.run(&capture)?;
    }
    if !result.success() {
        return Err(DevkitError::CommandFailed {
            command: capture,
            code: result.exit_status,
            stderr: result.stderr,
        });
    }

    shell.fetch(&remote_path, local_path)?;

    // /tmp is small on the devkit; older gpu-trace may leave it undeletable
    if let Ok(cleanup) = shell.run(&format!("rm {}", quoted)) {
        if !cleanup.success() {
            tracing::debug!("could not remove {}: {}", remote_path, cleanup.stderr.trim());
        }
    }
    tracing::info!("Trace saved to {}", local_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::testing::FakeShell;
    use tempfile::TempDir;

    const TEMP: &str = "/tmp/abc123-gpu-trace.zip";

    #[test]
    fn test_capture_succeeds_first_time() {
        let tmp = TempDir::new().unwrap();
        let local = tmp.path().join("trace.zip");
        let mut shell = FakeShell::default().reply("mktemp", 0, &format!("{}\n", TEMP), "");

        capture_gpu_trace(&mut shell, &local).unwrap();

        assert_eq!(shell.count("gpu-trace --start"), 0);
        assert_eq!(shell.count("gpu-trace --capture"), 1);
        assert_eq!(shell.fetched, vec![(TEMP.to_string(), local)]);
        assert_eq!(shell.count("rm "), 2);
    }

    #[test]
    fn test_capture_retries_once_after_starting_tracing() {
        let tmp = TempDir::new().unwrap();
        let mut shell = FakeShell::default()
            .reply("mktemp", 0, TEMP, "")
            .reply("gpu-trace --capture", 0, "", "Failed to capture trace: not tracing")
            .reply("gpu-trace --capture", 0, "", "");

        capture_gpu_trace(&mut shell, &tmp.path().join("trace.zip")).unwrap();

        assert_eq!(shell.count("gpu-trace --start"), 1);
        assert_eq!(shell.count("gpu-trace --capture"), 2);
        assert_eq!(shell.fetched.len(), 1);
    }

    #[test]
    fn test_second_failure_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let mut shell = FakeShell::default()
            .reply("mktemp", 0, TEMP, "")
            .reply("gpu-trace --capture", 127, "", "command not found");

        let err = capture_gpu_trace(&mut shell, &tmp.path().join("trace.zip")).unwrap_err();

        assert!(matches!(err, DevkitError::CommandFailed { code: 127, .. }));
        assert_eq!(shell.count("gpu-trace --capture"), 2);
        assert!(shell.fetched.is_empty());
    }
}
