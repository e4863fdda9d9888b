// Screenshot capture from the gamescope compositor
//
// gamescope writes the screenshot asynchronously, so old files are cleared
// first and the new one is polled for after signalling.

use crate::errors::{DevkitError, Result};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use super::{remote_file_name, run_checked, PollPolicy, RemoteShell};

const FIND_SCREENSHOT: &str = r#"find /tmp -maxdepth 1 -type f -name "gamescope*.png""#;

static TIMESTAMP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_[0-9][0-9_-]*").expect("timestamp pattern is valid"));

#[derive(Debug, Clone)]
pub struct ScreenshotRequest {
    /// Destination folder; the working directory when unset
    pub folder: Option<PathBuf>,
    /// Local file name; the remote name when unset. Its extension is replaced.
    pub filename: Option<String>,
    /// Append the capture time to the file name
    pub timestamp: bool,
    /// Request through the gamescope xprop instead of SIGUSR2
    pub xprop: Option<String>,
    pub poll: PollPolicy,
}

impl Default for ScreenshotRequest {
    fn default() -> Self {
        Self {
            folder: None,
            filename: None,
            timestamp: true,
            xprop: None,
            poll: PollPolicy::SCREENSHOT,
        }
    }
}

/// Take a screenshot and download it. Returns the local path written.
pub fn capture_screenshot(
    shell: &mut dyn RemoteShell,
    request: &ScreenshotRequest,
) -> Result<PathBuf> {
    shell.run("rm -f /tmp/gamescope*.png")?;
    match &request.xprop {
        None => run_checked(shell, "kill -USR2 $(pidof gamescope)")?,
        Some(value) => run_checked(
            shell,
            &format!(
                "DISPLAY=:0 xprop -root -f GAMESCOPECTRL_DEBUG_REQUEST_SCREENSHOT 32c \
                 -set GAMESCOPECTRL_DEBUG_REQUEST_SCREENSHOT {}",
                value
            ),
        )?,
    };

    let remote_path = request
        .poll
        .poll(|| {
            let found = shell.run(FIND_SCREENSHOT)?;
            let first = found.stdout_text().lines().next().unwrap_or("").trim();
            Ok((found.success() && !first.is_empty()).then(|| first.to_string()))
        })?
        .ok_or_else(|| DevkitError::Timeout {
            operation: "screenshot".to_string(),
        })?;

    let folder = match &request.folder {
        Some(folder) if !folder.as_os_str().is_empty() => folder.clone(),
        _ => {
            let cwd = std::env::current_dir()?;
            tracing::warn!("Screenshot folder is not set - forcing to {}", cwd.display());
            cwd
        }
    };

    let remote_name = remote_file_name(&remote_path);
    let local_path = next_free_path(local_screenshot_path(
        &folder,
        request.filename.as_deref(),
        remote_name,
        request.timestamp,
    ));
    if let Some(parent) = local_path.parent() {
        fs::create_dir_all(parent)?;
    }

    shell.fetch(&remote_path, &local_path)?;
    tracing::info!("Downloaded to {}", local_path.display());
    Ok(local_path)
}

/// Timestamp embedded in a gamescope file name, such as `_2024-01-31_12-00-00`
fn embedded_timestamp(remote_name: &str) -> Option<String> {
    TIMESTAMP.find(remote_name).map(|m| m.as_str().to_string())
}

fn local_screenshot_path(
    folder: &Path,
    filename: Option<&str>,
    remote_name: &str,
    timestamp: bool,
) -> PathBuf {
    let suffix = Path::new(remote_name)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    let base = filename.filter(|f| !f.is_empty()).unwrap_or(remote_name);
    let stem = Path::new(base).with_extension("");
    let stem = stem.to_string_lossy();

    let stamp = if timestamp {
        embedded_timestamp(remote_name).unwrap_or_else(|| {
            // newer gamescope builds no longer put the time in the name
            chrono::Local::now().format("-%Y%m%d%H%M%S").to_string()
        })
    } else {
        String::new()
    };
    folder.join(format!("{}{}{}", stem, stamp, suffix))
}

/// `path`, or `<stem>_NNN<ext>` with the first free NNN
fn next_free_path(path: PathBuf) -> PathBuf {
    if !path.exists() {
        return path;
    }
    let suffix = path
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    let base = path.with_extension("");
    let base = base.to_string_lossy();
    (0u32..)
        .map(|i| PathBuf::from(format!("{}_{:03}{}", base, i, suffix)))
        .find(|candidate| !candidate.exists())
        .unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::testing::{FakeShell, FAST};
    use tempfile::TempDir;

    #[test]
    fn test_local_path_uses_remote_timestamp() {
        let path = local_screenshot_path(
            Path::new("/shots"),
            Some("mygame.jpg"),
            "gamescope_2024-01-31_12-00-00.png",
            true,
        );
        assert_eq!(path, PathBuf::from("/shots/mygame_2024-01-31_12-00-00.png"));
    }

    #[test]
    fn test_embedded_timestamp_across_calls() {
        for _ in 0..3 {
            assert_eq!(
                embedded_timestamp("gamescope_2024-01-31_12-00-00.png").as_deref(),
                Some("_2024-01-31_12-00-00")
            );
            assert_eq!(embedded_timestamp("gamescope.png"), None);
        }
    }

    #[test]
    fn test_local_path_without_timestamp_keeps_remote_name() {
        let path = local_screenshot_path(Path::new("/shots"), None, "gamescope_1.png", false);
        assert_eq!(path, PathBuf::from("/shots/gamescope_1.png"));
    }

    #[test]
    fn test_local_path_synthesizes_timestamp() {
        let path = local_screenshot_path(Path::new("/shots"), None, "gamescope.png", true);
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        let pattern = Regex::new(r"^gamescope-[0-9]{14}\.png$").unwrap();
        assert!(pattern.is_match(&name), "{}", name);
    }

    #[test]
    fn test_next_free_path_counts_up() {
        let tmp = TempDir::new().unwrap();
        let wanted = tmp.path().join("shot.png");
        assert_eq!(next_free_path(wanted.clone()), wanted);

        fs::write(&wanted, b"").unwrap();
        fs::write(tmp.path().join("shot_000.png"), b"").unwrap();
        assert_eq!(next_free_path(wanted), tmp.path().join("shot_001.png"));
    }

    #[test]
    fn test_absent_absent_present_fetches_disambiguated_file() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("capture.png"), b"older").unwrap();

        let mut shell = FakeShell::default()
            .reply("find /tmp", 1, "", "")
            .reply("find /tmp", 0, "", "")
            .reply("find /tmp", 0, "/tmp/gamescope_7.png\n", "");
        let request = ScreenshotRequest {
            folder: Some(tmp.path().to_path_buf()),
            filename: Some("capture".to_string()),
            timestamp: false,
            xprop: None,
            poll: FAST,
        };

        let local = capture_screenshot(&mut shell, &request).unwrap();

        assert_eq!(local, tmp.path().join("capture_000.png"));
        assert_eq!(shell.count("find /tmp"), 3);
        assert_eq!(shell.count("kill -USR2"), 1);
        assert_eq!(shell.commands[0], "rm -f /tmp/gamescope*.png");
        assert_eq!(shell.fetched[0].0, "/tmp/gamescope_7.png");
        assert_eq!(fs::read(tmp.path().join("capture.png")).unwrap(), b"older");
    }

    #[test]
    fn test_xprop_request() {
        let tmp = TempDir::new().unwrap();
        let mut shell =
            FakeShell::default().reply("find /tmp", 0, "/tmp/gamescope_1.png\n", "");
        let request = ScreenshotRequest {
            folder: Some(tmp.path().join("nested")),
            xprop: Some("1".to_string()),
            poll: FAST,
            ..Default::default()
        };

        let local = capture_screenshot(&mut shell, &request).unwrap();

        assert!(local.starts_with(tmp.path().join("nested")));
        assert_eq!(shell.count("DISPLAY=:0 xprop"), 1);
        assert_eq!(shell.count("kill"), 0);
    }

    #[test]
    fn test_never_appearing_is_timeout() {
        let mut shell = FakeShell::default().reply("find /tmp", 0, "", "");
        let request = ScreenshotRequest {
            folder: Some(PathBuf::from("/unused")),
            poll: FAST,
            ..Default::default()
        };
        let err = capture_screenshot(&mut shell, &request).unwrap_err();
        assert!(matches!(err, DevkitError::Timeout { .. }));
        assert_eq!(shell.count("find /tmp"), FAST.attempts as usize);
    }

    #[test]
    fn test_signal_failure_is_command_failed() {
        let mut shell = FakeShell::default().reply("kill -USR2", 1, "", "no process");
        let request = ScreenshotRequest {
            poll: FAST,
            ..Default::default()
        };
        let err = capture_screenshot(&mut shell, &request).unwrap_err();
        assert!(matches!(err, DevkitError::CommandFailed { code: 1, .. }));
        assert_eq!(shell.count("find"), 0);
    }
}
