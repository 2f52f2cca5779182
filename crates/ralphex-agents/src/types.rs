use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::thread;

use ralphex_core::CancelToken;

use crate::error::AgentError;
use crate::signal::Signal;

/// Called with each surfaced output line (newline included) as it streams.
pub type OutputHandler = Box<dyn Fn(&str) + Send + Sync>;

/// Which of the child's standard channels carries the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamChannel {
    Stdout,
    Stderr,
}

/// Result of one executor invocation. `output` is the surfaced (possibly
/// filtered) text; the signal is the last sentinel seen in the raw stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutcome {
    pub output: String,
    pub signal: Option<Signal>,
}

/// Common contract of the primary and external executors.
pub trait Executor: Send + Sync {
    fn run(&self, cancel: &CancelToken, prompt: &str) -> Result<ExecOutcome, AgentError>;
}

/// A started child whose stream is consumed by the executor.
pub trait ChildProcess: Send {
    /// The streaming channel. Returns None on the second call.
    fn take_stream(&mut self) -> Option<Box<dyn Read + Send>>;
    /// Non-blocking exit check: true once the child has exited. Exit-status
    /// evaluation stays with [`wait`].
    ///
    /// [`wait`]: ChildProcess::wait
    fn try_wait(&mut self) -> Result<bool, AgentError>;
    /// Block until the child exits; Ok for a zero exit status.
    fn wait(&mut self) -> Result<(), AgentError>;
    /// Terminate the child. Used on cancellation; failures are ignored.
    fn kill(&mut self);
}

/// Spawn seam so executor tests can substitute canned streams for real
/// child processes.
pub trait CommandRunner: Send + Sync {
    fn start(
        &self,
        command: &str,
        args: &[String],
        stdin_payload: Option<&str>,
        channel: StreamChannel,
    ) -> Result<Box<dyn ChildProcess>, AgentError>;
}

/// Default runner backed by `std::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecRunner;

struct ExecChild {
    command: String,
    child: std::process::Child,
    stream: Option<Box<dyn Read + Send>>,
    stdin_writer: Option<thread::JoinHandle<()>>,
}

impl ChildProcess for ExecChild {
    fn take_stream(&mut self) -> Option<Box<dyn Read + Send>> {
        self.stream.take()
    }

    fn try_wait(&mut self) -> Result<bool, AgentError> {
        match self.child.try_wait() {
            Ok(status) => Ok(status.is_some()),
            Err(source) => Err(AgentError::Stream { source }),
        }
    }

    fn wait(&mut self) -> Result<(), AgentError> {
        if let Some(writer) = self.stdin_writer.take() {
            let _ = writer.join();
        }
        let status = self.child.wait().map_err(|source| AgentError::Stream { source })?;
        if status.success() {
            Ok(())
        } else {
            Err(AgentError::Exited {
                command: self.command.clone(),
                status: status.code(),
            })
        }
    }

    fn kill(&mut self) {
        let _ = self.child.kill();
    }
}

impl CommandRunner for ExecRunner {
    fn start(
        &self,
        command: &str,
        args: &[String],
        stdin_payload: Option<&str>,
        channel: StreamChannel,
    ) -> Result<Box<dyn ChildProcess>, AgentError> {
        let mut cmd = Command::new(command);
        cmd.args(args);
        cmd.stdin(if stdin_payload.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        match channel {
            StreamChannel::Stdout => {
                cmd.stdout(Stdio::piped());
                cmd.stderr(Stdio::null());
            }
            StreamChannel::Stderr => {
                cmd.stdout(Stdio::null());
                cmd.stderr(Stdio::piped());
            }
        }

        let mut child = cmd.spawn().map_err(|source| AgentError::Spawn {
            command: command.to_string(),
            source,
        })?;

        // feed the prompt from a separate thread so a child that fills its
        // output pipe before draining stdin cannot deadlock the executor
        let stdin_writer = match (stdin_payload, child.stdin.take()) {
            (Some(payload), Some(mut stdin)) => {
                let payload = payload.to_string();
                Some(thread::spawn(move || {
                    let _ = stdin.write_all(payload.as_bytes());
                }))
            }
            _ => None,
        };

        let stream: Option<Box<dyn Read + Send>> = match channel {
            StreamChannel::Stdout => child.stdout.take().map(|s| Box::new(s) as _),
            StreamChannel::Stderr => child.stderr.take().map(|s| Box::new(s) as _),
        };

        Ok(Box::new(ExecChild {
            command: command.to_string(),
            child,
            stream,
            stdin_writer,
        }))
    }
}
