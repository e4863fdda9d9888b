// Interactive remote shell
//
// Building the ssh argv is ours; opening a terminal window around it belongs
// to whatever front end is running, so that part sits behind a trait.

use crate::errors::{DevkitError, Result};
use std::io;
use std::process::{Child, Command};

use super::policy::SshPolicy;

pub trait TerminalLauncher {
    fn launch(&self, argv: &[String]) -> io::Result<Child>;
}

/// Runs the shell in the current terminal, inheriting stdio.
#[derive(Debug, Default, Clone, Copy)]
pub struct InheritTerminal;

impl TerminalLauncher for InheritTerminal {
    fn launch(&self, argv: &[String]) -> io::Result<Child> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty argv"))?;
        Command::new(program).args(args).spawn()
    }
}

pub fn remote_shell_argv(
    policy: &SshPolicy,
    login: &str,
    address: &str,
    remote_command: Option<&str>,
) -> Vec<String> {
    policy.interactive_argv(login, address, remote_command)
}

pub fn open_remote_shell(
    launcher: &dyn TerminalLauncher,
    policy: &SshPolicy,
    login: &str,
    address: &str,
    remote_command: Option<&str>,
) -> Result<Child> {
    let argv = remote_shell_argv(policy, login, address, remote_command);
    tracing::info!("{}", argv.join(" "));
    launcher
        .launch(&argv)
        .map_err(|e| DevkitError::Configuration(format!("failed to open terminal: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::path::PathBuf;
    use std::time::Duration;

    struct Recording {
        argv: RefCell<Vec<String>>,
    }

    impl TerminalLauncher for Recording {
        fn launch(&self, argv: &[String]) -> io::Result<Child> {
            *self.argv.borrow_mut() = argv.to_vec();
            Command::new("true").spawn()
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_launcher_receives_interactive_argv() {
        let policy = SshPolicy::new(
            "ssh",
            PathBuf::from("/keys/devkit_ed25519"),
            PathBuf::from("/keys/known_hosts"),
            Duration::from_secs(5),
        );
        let launcher = Recording {
            argv: RefCell::new(Vec::new()),
        };
        let mut child =
            open_remote_shell(&launcher, &policy, "deck", "10.0.0.7", None).unwrap();
        child.wait().unwrap();

        let argv = launcher.argv.borrow();
        assert_eq!(argv[0], "ssh");
        assert!(argv.contains(&"-t".to_string()));
        assert_eq!(argv.last().unwrap(), "deck@10.0.0.7");
    }

    #[test]
    fn test_inherit_terminal_rejects_empty_argv() {
        let err = InheritTerminal.launch(&[]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
