//! Shell command execution with a fixed timeout and dry-run support

use crate::{Error, Result};
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

/// Upper bound for any single external command (apt can be slow)
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(600);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Output from a command execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Something that can run shell command lines.
///
/// `run` only fails when the command could not be executed at all or timed
/// out; a non-zero exit code is reported through [`CommandOutput`].
pub trait CommandRunner {
    fn run(&self, command: &str, stdin: Option<&str>) -> Result<CommandOutput>;

    /// Whether commands are only being reported, not executed
    fn is_dry_run(&self) -> bool {
        false
    }

    /// Run a command and turn a non-zero exit code into an error
    fn run_checked(&self, command: &str, stdin: Option<&str>) -> Result<CommandOutput> {
        let output = self.run(command, stdin)?;
        if !output.success() {
            return Err(Error::CommandFailed {
                cmd: command.to_string(),
                code: output.exit_code,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }
}

/// Runs commands through `sh -c` on the local host
#[derive(Debug, Clone)]
pub struct SystemRunner {
    pub timeout: Duration,
    pub dry_run: bool,
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_COMMAND_TIMEOUT,
            dry_run: false,
        }
    }
}

impl SystemRunner {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn spawn_error(command: &str, e: std::io::Error) -> Error {
        Error::Command {
            cmd: command.to_string(),
            message: e.to_string(),
        }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, command: &str, stdin: Option<&str>) -> Result<CommandOutput> {
        if self.dry_run {
            log::info!("[check] {}", command);
            return Ok(CommandOutput::default());
        }
        log::debug!("Running: {}", command);

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Self::spawn_error(command, e))?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes())
                .map_err(|e| Self::spawn_error(command, e))?;
            // pipe dropped here so the child sees EOF
        }

        // Drain both pipes while polling, a full pipe would otherwise block the child
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let timed_out = || Error::Timeout {
            cmd: command.to_string(),
            secs: self.timeout.as_secs(),
        };
        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait()? {
                Some(status) => break status,
                None if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(timed_out());
                }
                None => thread::sleep(POLL_INTERVAL),
            }
        };

        // A background descendant can hold the pipes open after `sh` exits
        let stdout = collect(&stdout, deadline).ok_or_else(timed_out)?;
        let stderr = collect(&stderr, deadline).ok_or_else(timed_out)?;
        let output = CommandOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout: stdout.trim().to_string(),
            stderr: stderr.trim().to_string(),
        };
        log::debug!("Exit code {} for: {}", output.exit_code, command);
        Ok(output)
    }

    fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
    });
    rx
}

/// Drained pipe content, or `None` once `deadline` has passed
fn collect(rx: &Receiver<String>, deadline: Instant) -> Option<String> {
    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(text) => Some(text),
        Err(RecvTimeoutError::Disconnected) => Some(String::new()),
        Err(RecvTimeoutError::Timeout) => None,
    }
}
