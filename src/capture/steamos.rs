// SteamOS session status and switching

use crate::errors::Result;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{PollPolicy, RemoteShell};

const GET_STATUS: &str = "python3 ~/devkit-utils/steamos-get-status --json";
const SESSION_TYPE_MARKER: &str = r#"${XDG_CONF_DIR:-"$HOME/.config"}/steamos-session-type"#;
const STEAM_NOT_RUNNING: &str = "SteamStatus.NOT_RUNNING";

/// Output of `steamos-get-status --json`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SteamosStatus {
    #[serde(default)]
    pub session_status: Option<String>,
    #[serde(default)]
    pub steam_status: Option<String>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl SteamosStatus {
    /// Whether the devkit has settled into `session`. Game mode also needs the
    /// Steam client up.
    fn settled_in(&self, session: &str) -> bool {
        if self.session_status.as_deref() != Some(session) {
            return false;
        }
        session != "gamescope" || self.steam_status.as_deref() != Some(STEAM_NOT_RUNNING)
    }
}

/// Current session state, or `None` if the status script failed.
pub fn get_status(shell: &mut dyn RemoteShell) -> Result<Option<SteamosStatus>> {
    let result = shell.run(GET_STATUS)?;
    if !result.success() {
        tracing::warn!("{}", result.stderr.trim());
        return Ok(None);
    }
    match serde_json::from_str(result.stdout_text()) {
        Ok(status) => Ok(Some(status)),
        Err(e) => {
            tracing::warn!("Could not parse steamos-get-status --json output: {}", e);
            Ok(None)
        }
    }
}

/// Switch the devkit to `session` (`gamescope`, `plasma-x11`, `plasma-wayland`, ...).
///
/// With `wait`, polls until the session is reported active and returns that
/// status; on timeout the last status seen is returned instead of an error.
pub fn switch_session(
    shell: &mut dyn RemoteShell,
    session: &str,
    wait: Option<PollPolicy>,
) -> Result<Option<SteamosStatus>> {
    let (select_arg, wayland) = match session {
        "plasma-x11" => ("plasma", false),
        "plasma-wayland" => ("plasma", true),
        other => (other, false),
    };

    if wayland {
        shell.run(&format!("echo wayland > {}", SESSION_TYPE_MARKER))?;
    } else {
        shell.run(&format!("rm -f {}", SESSION_TYPE_MARKER))?;
    }
    let selected = shell.run(&format!("steamos-session-select {}", select_arg))?;
    if !selected.success() {
        tracing::warn!("steamos-session-select {}: {}", select_arg, selected.stderr.trim());
    }

    let Some(policy) = wait else {
        return Ok(None);
    };

    let mut last = None;
    for _ in 0..policy.attempts {
        std::thread::sleep(policy.interval);
        let Some(status) = get_status(shell)? else {
            continue;
        };
        if status.settled_in(session) {
            return Ok(Some(status));
        }
        last = Some(status);
    }
    tracing::warn!("timeout waiting for requested session change");
    Ok(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::testing::{FakeShell, FAST};

    fn status_json(session: &str, steam: &str) -> String {
        format!(
            r#"{{"session_status": "{}", "steam_status": "{}", "os_version": "3.5"}}"#,
            session, steam
        )
    }

    #[test]
    fn test_get_status_failures_are_none() {
        let mut failing = FakeShell::default().reply("python3", 1, "", "no such file");
        assert!(get_status(&mut failing).unwrap().is_none());

        let mut garbled = FakeShell::default().reply("python3", 0, "not json", "");
        assert!(get_status(&mut garbled).unwrap().is_none());

        let mut ok = FakeShell::default().reply("python3", 0, &status_json("plasma-x11", "x"), "");
        let status = get_status(&mut ok).unwrap().unwrap();
        assert_eq!(status.session_status.as_deref(), Some("plasma-x11"));
        assert_eq!(status.other["os_version"], "3.5");
    }

    #[test]
    fn test_switch_to_wayland_writes_marker() {
        let mut shell = FakeShell::default();
        let status = switch_session(&mut shell, "plasma-wayland", None).unwrap();
        assert!(status.is_none());
        assert!(shell.commands[0].starts_with("echo wayland > "));
        assert_eq!(shell.commands[1], "steamos-session-select plasma");
        assert_eq!(shell.count("python3"), 0);
    }

    #[test]
    fn test_gamescope_waits_for_steam_client() {
        let mut shell = FakeShell::default()
            .reply("python3", 0, &status_json("plasma-x11", STEAM_NOT_RUNNING), "")
            .reply("python3", 0, &status_json("gamescope", STEAM_NOT_RUNNING), "")
            .reply("python3", 0, &status_json("gamescope", "SteamStatus.RUNNING"), "");

        let status = switch_session(&mut shell, "gamescope", Some(FAST))
            .unwrap()
            .unwrap();

        assert!(shell.commands[0].starts_with("rm -f "));
        assert_eq!(status.steam_status.as_deref(), Some("SteamStatus.RUNNING"));
        assert_eq!(shell.count("python3"), 3);
    }

    #[test]
    fn test_timeout_returns_last_status() {
        let mut shell = FakeShell::default()
            .reply("python3", 0, &status_json("plasma-x11", "x"), "")
            .reply("python3", 1, "", "");

        let last = switch_session(&mut shell, "gamescope", Some(FAST)).unwrap();

        assert_eq!(
            last.and_then(|s| s.session_status).as_deref(),
            Some("plasma-x11")
        );
        assert_eq!(shell.count("python3"), FAST.attempts as usize);
    }

    #[test]
    fn test_timeout_without_any_status_is_none() {
        let mut shell = FakeShell::default().reply("python3", 1, "", "");
        assert!(switch_session(&mut shell, "desktop", Some(FAST))
            .unwrap()
            .is_none());
    }
}
