// Radeon GPU Profiler capture
//
// The Steam client sets RADV_THREAD_TRACE_TRIGGER=/tmp/rgp.trigger; touching
// that file makes RADV write a trace to /tmp.

use crate::errors::{DevkitError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{remote_file_name, run_checked, PollPolicy, RemoteShell};

/// How long a trace may keep growing before giving up
const SETTLE_ATTEMPTS: u32 = 120;

pub const SETTLE_INTERVAL: Duration = Duration::from_millis(500);

/// Trigger a capture and download it into `local_folder`.
///
/// `appear` bounds the wait for the trace file; `settle_interval` is the gap
/// between size checks while RADV is still writing it.
pub fn capture_rgp(
    shell: &mut dyn RemoteShell,
    local_folder: &Path,
    appear: PollPolicy,
    settle_interval: Duration,
) -> Result<PathBuf> {
    shell.run("rm -f /tmp/*.rgp")?;
    shell.run("touch /tmp/rgp.trigger")?;

    let remote_path = appear
        .poll(|| {
            let listed = shell.run("ls -1t /tmp/*.rgp")?;
            let newest = listed.stdout_text().lines().next().unwrap_or("").trim();
            Ok((listed.success() && !newest.is_empty()).then(|| newest.to_string()))
        })?
        .ok_or_else(|| {
            tracing::error!(
                "Have you enabled RGP capture in the Steam client, are you running a Vulkan title?"
            );
            DevkitError::Timeout {
                operation: "RGP capture file".to_string(),
            }
        })?;

    wait_for_complete_write(shell, &remote_path, settle_interval)?;

    fs::create_dir_all(local_folder)?;
    let local_path = local_folder.join(remote_file_name(&remote_path));
    shell.fetch(&remote_path, &local_path)?;
    tracing::info!("Downloaded to {}", local_path.display());
    Ok(local_path)
}

/// Wait until the file size is non-zero and unchanged between two checks.
fn wait_for_complete_write(
    shell: &mut dyn RemoteShell,
    remote_path: &str,
    interval: Duration,
) -> Result<()> {
    let quoted = shlex::try_quote(remote_path).map_err(|e| DevkitError::Protocol {
        source_name: remote_path.to_string(),
        reason: e.to_string(),
    })?;
    let command = format!("stat -c %s {}", quoted);

    let mut size = 0u64;
    for _ in 0..SETTLE_ATTEMPTS {
        let output = run_checked(shell, &command)?;
        let updated: u64 = output
            .stdout_text()
            .trim()
            .parse()
            .map_err(|e: std::num::ParseIntError| DevkitError::Protocol {
                source_name: command.clone(),
                reason: e.to_string(),
            })?;
        if updated != 0 && updated == size {
            return Ok(());
        }
        size = updated;
        std::thread::sleep(interval);
    }
    Err(DevkitError::Timeout {
        operation: format!("{} to finish writing", remote_path),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::testing::{FakeShell, FAST};
    use tempfile::TempDir;

    #[test]
    fn test_waits_for_size_to_settle_then_fetches() {
        let tmp = TempDir::new().unwrap();
        let mut shell = FakeShell::default()
            .reply("ls -1t", 2, "", "No such file or directory")
            .reply("ls -1t", 0, "/tmp/game_20240131.rgp\n/tmp/older.rgp\n", "")
            .reply("stat", 0, "0\n", "")
            .reply("stat", 0, "4096\n", "")
            .reply("stat", 0, "8192\n", "")
            .reply("stat", 0, "8192\n", "");

        let local = capture_rgp(&mut shell, tmp.path(), FAST, Duration::ZERO).unwrap();

        assert_eq!(local, tmp.path().join("game_20240131.rgp"));
        assert_eq!(shell.commands[0], "rm -f /tmp/*.rgp");
        assert_eq!(shell.commands[1], "touch /tmp/rgp.trigger");
        assert_eq!(shell.count("stat"), 4);
        assert_eq!(shell.fetched[0].0, "/tmp/game_20240131.rgp");
    }

    #[test]
    fn test_no_trace_is_timeout() {
        let tmp = TempDir::new().unwrap();
        let mut shell = FakeShell::default().reply("ls -1t", 2, "", "");
        let err = capture_rgp(&mut shell, tmp.path(), FAST, Duration::ZERO).unwrap_err();
        assert!(matches!(err, DevkitError::Timeout { .. }));
        assert_eq!(shell.count("stat"), 0);
    }

    #[test]
    fn test_garbled_size_is_protocol_error() {
        let tmp = TempDir::new().unwrap();
        let mut shell = FakeShell::default()
            .reply("ls -1t", 0, "/tmp/a.rgp", "")
            .reply("stat", 0, "huge", "");
        let err = capture_rgp(&mut shell, tmp.path(), FAST, Duration::ZERO).unwrap_err();
        assert!(matches!(err, DevkitError::Protocol { .. }));
    }
}
