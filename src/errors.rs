// Error taxonomy
//
// Every failure the library surfaces is one of these kinds, carrying the
// offending identifier (machine name, command, path) rather than prose.
// Presentation is left to the caller.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = DevkitError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum DevkitError {
    /// Missing tool, unreadable key, unrepairable permissions. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No address could be established for the machine.
    #[error("machine {name:?} not found: {reason}")]
    MachineNotFound { name: String, reason: String },

    /// A remote command exited non-zero.
    #[error("command {command:?} failed with exit code {code}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    /// The directory transfer process exited non-zero (or was cancelled).
    #[error("transfer of {} failed with exit code {code}", path.display())]
    TransferFailed { path: PathBuf, code: i32 },

    /// Connect or HTTP failure against the devkit.
    #[error("network error talking to {target}: {reason}")]
    Network { target: String, reason: String },

    /// A polling recipe ran out of attempts.
    #[error("timed out waiting for {operation}")]
    Timeout { operation: String },

    /// Remote output did not match the expected format.
    #[error("unexpected output from {source_name}: {reason}")]
    Protocol { source_name: String, reason: String },

    /// The devkit rejected the public key registration.
    #[error("registration with {address} rejected: HTTP {status}")]
    Registration { address: String, status: u16 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DevkitError {
    pub fn machine_not_found(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MachineNotFound {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn is_machine_not_found(&self) -> bool {
        matches!(self, Self::MachineNotFound { .. })
    }

    /// Exit code carried by command or transfer failures.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::CommandFailed { code, .. } | Self::TransferFailed { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_only_for_process_failures() {
        let failed = DevkitError::CommandFailed {
            command: "exit 7".to_string(),
            code: 7,
            stderr: String::new(),
        };
        assert_eq!(failed.exit_code(), Some(7));
        assert_eq!(DevkitError::machine_not_found("deck", "gone").exit_code(), None);
    }

    #[test]
    fn test_machine_not_found_display_names_machine() {
        let err = DevkitError::machine_not_found("steamdeck", "no record");
        assert!(err.is_machine_not_found());
        assert!(err.to_string().contains("steamdeck"));
    }
}
