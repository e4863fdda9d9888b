// Remote execution over the system OpenSSH client

pub mod policy;
pub mod session;
pub mod shell;

pub use policy::{locate_tool, SshPolicy};
pub use session::{ExecutionResult, Session, SshTransport, StdoutPayload, Transport};
pub use shell::{open_remote_shell, remote_shell_argv, InheritTerminal, TerminalLauncher};
