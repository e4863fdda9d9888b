// Remote execution session
//
// Each command is one child process (normally `ssh`). Its stdout and stderr
// are drained on two scoped worker threads while the calling thread feeds
// stdin and waits for exit, so neither pipe can fill up and stall the remote
// side. Both workers are joined before `execute` returns.

use crate::errors::{DevkitError, Result};
use serde_json::Value;
use std::fs;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::Path;
use std::process::{ChildStderr, ChildStdin, ChildStdout, Command, Stdio};
use std::thread::ScopedJoinHandle;

use super::policy::SshPolicy;

/// ssh reserves this exit code for its own connection and auth failures
const SSH_CONNECTION_FAILURE: i32 = 255;

/// Something that turns a remote command line into a local process.
pub trait Transport: Send + Sync {
    fn command(&self, remote_command: &str) -> Command;

    /// `login@address`, for logs and errors
    fn target(&self) -> String;
}

pub struct SshTransport {
    policy: SshPolicy,
    login: String,
    address: String,
}

impl Transport for SshTransport {
    fn command(&self, remote_command: &str) -> Command {
        self.policy
            .command(&self.login, &self.address, remote_command)
    }

    fn target(&self) -> String {
        format!("{}@{}", self.login, self.address)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StdoutPayload {
    /// Parsed JSON document (structured commands)
    Json(Value),
    /// Raw text (simple commands)
    Text(String),
    /// Bytes forwarded to the caller's writer
    Forwarded(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub stdout: StdoutPayload,
    pub stderr: String,
    pub exit_status: i32,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    /// Stdout as text; empty for JSON or forwarded payloads
    pub fn stdout_text(&self) -> &str {
        match &self.stdout {
            StdoutPayload::Text(text) => text,
            _ => "",
        }
    }
}

/// Where stdout goes while draining
enum StdoutSink<'a> {
    Capture,
    Forward(&'a mut (dyn Write + Send)),
}

enum Drained {
    Captured(Vec<u8>),
    Forwarded(u64),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum StderrLog {
    Info,
    Debug,
}

struct Completed {
    stdout: Drained,
    stderr: String,
    exit_status: i32,
}

/// An authenticated remote session. One command at a time; run concurrent
/// commands on separate sessions.
pub struct Session {
    transport: Box<dyn Transport>,
}

impl Session {
    /// Open a session as `login@address` with the given policy, running `true`
    /// once so authentication problems surface here.
    pub fn connect(address: &str, login: &str, policy: &SshPolicy) -> Result<Self> {
        tracing::debug!(
            "Connecting to {}@{} with private key {}",
            login,
            address,
            policy.identity.display()
        );
        let mut session = Self::with_transport(SshTransport {
            policy: policy.clone(),
            login: login.to_string(),
            address: address.to_string(),
        });

        let check = session.spawn_and_drain("true", None, StdoutSink::Capture, StderrLog::Debug)?;
        match check.exit_status {
            0 => Ok(session),
            SSH_CONNECTION_FAILURE => Err(DevkitError::Network {
                target: session.transport.target(),
                reason: check.stderr.trim().to_string(),
            }),
            code => Err(DevkitError::CommandFailed {
                command: "true".to_string(),
                code,
                stderr: check.stderr,
            }),
        }
    }

    /// Session over an arbitrary transport, without a connection check
    pub fn with_transport(transport: impl Transport + 'static) -> Self {
        Self {
            transport: Box::new(transport),
        }
    }

    pub fn target(&self) -> String {
        self.transport.target()
    }

    /// Run a structured command. With `stream_to`, stdout is copied there
    /// verbatim; otherwise it must be a JSON document. Non-zero exit is an error.
    pub fn execute(
        &mut self,
        command: &str,
        stdin: Option<&[u8]>,
        stream_to: Option<&mut (dyn Write + Send)>,
    ) -> Result<ExecutionResult> {
        tracing::debug!("{}: {}", self.transport.target(), command);
        let sink = match stream_to {
            Some(writer) => StdoutSink::Forward(writer),
            None => StdoutSink::Capture,
        };
        let completed = self.spawn_and_drain(command, stdin, sink, StderrLog::Info)?;
        tracing::info!("exit status: {}", completed.exit_status);

        if completed.exit_status != 0 {
            return Err(DevkitError::CommandFailed {
                command: command.to_string(),
                code: completed.exit_status,
                stderr: completed.stderr,
            });
        }

        let stdout = match completed.stdout {
            Drained::Forwarded(bytes) => StdoutPayload::Forwarded(bytes),
            Drained::Captured(bytes) => {
                let json = serde_json::from_slice(&bytes).map_err(|e| {
                    tracing::error!("output does not parse as json:");
                    tracing::error!("{}", String::from_utf8_lossy(&bytes));
                    DevkitError::Protocol {
                        source_name: command.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                StdoutPayload::Json(json)
            }
        };

        Ok(ExecutionResult {
            stdout,
            stderr: completed.stderr,
            exit_status: completed.exit_status,
        })
    }

    /// Run a plain command and return its output whatever the exit status.
    pub fn run(&mut self, command: &str) -> Result<ExecutionResult> {
        tracing::debug!("{}: {}", self.transport.target(), command);
        let completed = self.spawn_and_drain(command, None, StdoutSink::Capture, StderrLog::Debug)?;
        let text = match completed.stdout {
            Drained::Captured(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Drained::Forwarded(_) => String::new(),
        };
        Ok(ExecutionResult {
            stdout: StdoutPayload::Text(text),
            stderr: completed.stderr,
            exit_status: completed.exit_status,
        })
    }

    /// Copy a remote file to `local_path`. A partial local file is removed on failure.
    pub fn fetch(&mut self, remote_path: &str, local_path: &Path) -> Result<u64> {
        let quoted = shlex::try_quote(remote_path).map_err(|e| DevkitError::Protocol {
            source_name: remote_path.to_string(),
            reason: e.to_string(),
        })?;
        if let Some(parent) = local_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut file = fs::File::create(local_path)?;
        let result = self.execute(&format!("cat -- {}", quoted), None, Some(&mut file));
        drop(file);

        match result {
            Ok(ExecutionResult {
                stdout: StdoutPayload::Forwarded(bytes),
                ..
            }) => {
                tracing::info!("Downloaded {} to {}", remote_path, local_path.display());
                Ok(bytes)
            }
            Ok(_) => Ok(0),
            Err(e) => {
                let _ = fs::remove_file(local_path);
                Err(e)
            }
        }
    }

    fn spawn_and_drain(
        &mut self,
        command: &str,
        stdin: Option<&[u8]>,
        sink: StdoutSink<'_>,
        stderr_log: StderrLog,
    ) -> Result<Completed> {
        let mut child = self
            .transport
            .command(command)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                DevkitError::Configuration(format!("failed to spawn command transport: {}", e))
            })?;

        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;
        let stdin_pipe = child.stdin.take();

        // The scope joins both workers on every path out of it, panics included
        let (written, status, stdout, stderr) = std::thread::scope(|scope| {
            let stdout_worker = scope.spawn(move || drain_stdout(stdout, sink));
            let stderr_worker = scope.spawn(move || drain_stderr(stderr, stderr_log));

            let written = write_stdin(stdin_pipe, stdin);
            let status = child.wait();

            (
                written,
                status,
                join_worker(stdout_worker),
                join_worker(stderr_worker),
            )
        });

        let status = status?;
        written?;
        let stdout = stdout??;
        let stderr = stderr??;

        Ok(Completed {
            stdout,
            stderr,
            exit_status: status.code().unwrap_or(-1),
        })
    }
}

/// Write all of `data`, then close our end so the remote sees EOF.
fn write_stdin(pipe: Option<ChildStdin>, data: Option<&[u8]>) -> io::Result<()> {
    let (Some(mut pipe), Some(data)) = (pipe, data) else {
        return Ok(());
    };
    tracing::info!("Writing {} bytes of stdin data to command input", data.len());
    match pipe.write_all(data).and_then(|()| pipe.flush()) {
        Ok(()) => Ok(()),
        // The command exited without reading everything; its status tells the story
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
            tracing::debug!("stdin closed early by command");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn drain_stdout(mut stdout: ChildStdout, sink: StdoutSink<'_>) -> io::Result<Drained> {
    match sink {
        StdoutSink::Capture => {
            let mut buf = Vec::new();
            stdout.read_to_end(&mut buf)?;
            Ok(Drained::Captured(buf))
        }
        StdoutSink::Forward(writer) => {
            let copied = io::copy(&mut stdout, writer)?;
            writer.flush()?;
            Ok(Drained::Forwarded(copied))
        }
    }
}

fn drain_stderr(stderr: ChildStderr, log: StderrLog) -> io::Result<String> {
    let mut reader = BufReader::new(stderr);
    let mut collected = String::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        let text = String::from_utf8_lossy(&line);
        let trimmed = text.trim_end_matches(['\r', '\n']);
        match log {
            StderrLog::Info => tracing::info!("{}", trimmed),
            StderrLog::Debug => tracing::debug!("{}", trimmed),
        }
        collected.push_str(&text);
    }
    Ok(collected)
}

fn join_worker<T>(worker: ScopedJoinHandle<'_, io::Result<T>>) -> Result<io::Result<T>> {
    worker
        .join()
        .map_err(|_| DevkitError::Io(io::Error::new(io::ErrorKind::Other, "drain worker panicked")))
}

fn missing_pipe(name: &str) -> DevkitError {
    DevkitError::Io(io::Error::new(
        io::ErrorKind::BrokenPipe,
        format!("{} was not captured", name),
    ))
}
