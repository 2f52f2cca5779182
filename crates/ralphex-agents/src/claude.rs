use ralphex_core::CancelToken;

use crate::error::AgentError;
use crate::linereader::stream_lines;
use crate::signal::detect_signal;
use crate::types::{CommandRunner, ExecOutcome, ExecRunner, Executor, OutputHandler, StreamChannel};

/// Primary agent executor. Writes the prompt to the child's stdin and
/// streams its stdout; every line is surfaced unfiltered. A reader thread
/// owns the blocking reads; cancellation kills the child mid-stream.
pub struct ClaudeExecutor {
    command: String,
    args: Vec<String>,
    output_handler: Option<OutputHandler>,
    runner: Box<dyn CommandRunner>,
}

impl ClaudeExecutor {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            output_handler: None,
            runner: Box::new(ExecRunner),
        }
    }

    pub fn with_output_handler(mut self, handler: OutputHandler) -> Self {
        self.output_handler = Some(handler);
        self
    }

    pub fn with_runner(mut self, runner: Box<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }
}

impl Executor for ClaudeExecutor {
    fn run(&self, cancel: &CancelToken, prompt: &str) -> Result<ExecOutcome, AgentError> {
        let mut child = self.runner.start(
            &self.command,
            &self.args,
            Some(prompt),
            StreamChannel::Stdout,
        )?;

        let mut raw = String::new();
        stream_lines(cancel, &mut child, |line| {
            raw.push_str(line);
            raw.push('\n');
            if let Some(handler) = &self.output_handler {
                handler(&format!("{line}\n"));
            }
        })?;

        let signal = detect_signal(&raw);
        Ok(ExecOutcome { output: raw, signal })
    }
}
