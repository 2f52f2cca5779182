use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::OnceLock;

use ralphex_core::CancelToken;
use regex::Regex;

use crate::error::AgentError;
use crate::linereader::stream_lines;
use crate::signal::detect_signal;
use crate::types::{CommandRunner, ExecOutcome, ExecRunner, Executor, OutputHandler, StreamChannel};

/// Startup header prefixes the filter whitelists.
const HEADER_PREFIXES: [&str; 11] = [
    "OpenAI Codex",
    "workdir:",
    "model:",
    "provider:",
    "approval:",
    "sandbox:",
    "reasoning effort:",
    "reasoning summaries:",
    "session id:",
    "project_doc:",
    "--------",
];

/// External reviewer executor. Runs the codex CLI with the prompt as an
/// argument and streams its stderr through a whitelist filter; the raw
/// stream is kept for signal detection.
pub struct CodexExecutor {
    pub command: String,
    pub model: String,
    pub reasoning_effort: String,
    pub sandbox: String,
    pub stream_idle_timeout_ms: u64,
    /// Number of startup lines in which only header prefixes are surfaced.
    pub header_lines: usize,
    pub project_doc: Option<PathBuf>,
    output_handler: Option<OutputHandler>,
    runner: Box<dyn CommandRunner>,
}

impl Default for CodexExecutor {
    fn default() -> Self {
        Self {
            command: "codex".to_string(),
            model: "gpt-5.2-codex".to_string(),
            reasoning_effort: "xhigh".to_string(),
            sandbox: "read-only".to_string(),
            stream_idle_timeout_ms: 3_600_000,
            header_lines: 20,
            project_doc: None,
            output_handler: None,
            runner: Box::new(ExecRunner),
        }
    }
}

/// Whitelist filter state. Starts in the header window; the review marker
/// switches to show-everything.
struct FilterState {
    in_header: bool,
    in_review: bool,
    seen_bold: HashSet<String>,
    line_count: usize,
}

impl FilterState {
    fn new() -> Self {
        Self {
            in_header: true,
            in_review: false,
            seen_bold: HashSet::new(),
            line_count: 0,
        }
    }
}

impl CodexExecutor {
    /// Build an executor from the external-reviewer configuration section.
    pub fn from_config(cfg: &ralphex_core::config::ExternalConfig) -> Self {
        Self {
            command: cfg.command.clone(),
            model: cfg.model.clone(),
            reasoning_effort: cfg.reasoning_effort.clone(),
            sandbox: cfg.sandbox.clone(),
            stream_idle_timeout_ms: cfg.stream_idle_timeout_ms,
            header_lines: cfg.header_lines,
            project_doc: cfg.project_doc.clone(),
            ..Self::default()
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

    fn build_args(&self, prompt: &str) -> Vec<String> {
        let mut args = vec![
            "exec".to_string(),
            "--sandbox".to_string(),
            self.sandbox.clone(),
            "-c".to_string(),
            format!("model=\"{}\"", self.model),
            "-c".to_string(),
            format!("model_reasoning_effort={}", self.reasoning_effort),
            "-c".to_string(),
            format!("stream_idle_timeout_ms={}", self.stream_idle_timeout_ms),
        ];
        if let Some(doc) = &self.project_doc {
            args.push("-c".to_string());
            args.push(format!("project_doc=\"{}\"", doc.display()));
        }
        args.push(prompt.to_string());
        args
    }

    /// Decide whether a line is surfaced, returning the cleaned text.
    fn should_display(&self, line: &str, state: &mut FilterState) -> Option<String> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }

        state.line_count += 1;

        // review section marker: show it and everything after
        if trimmed.contains("Full review comments:") {
            state.in_review = true;
            state.in_header = false;
            return Some(line.to_string());
        }
        if state.in_review {
            return Some(strip_bold(line));
        }

        // explicit clean result
        let upper = trimmed.to_uppercase();
        if upper.contains("NO ISSUES FOUND") || upper.contains("NO ISSUES") {
            state.in_header = false;
            return Some(line.to_string());
        }

        // bold summaries, deduplicated on stripped content
        if trimmed.starts_with("**") {
            state.in_header = false;
            let cleaned = strip_bold(trimmed);
            if !state.seen_bold.insert(cleaned.clone()) {
                return None;
            }
            return Some(cleaned);
        }

        // priority findings
        if trimmed.starts_with("- [P") {
            state.in_header = false;
            return Some(strip_bold(line));
        }

        // file:line references
        if contains_file_line_ref(trimmed) {
            state.in_header = false;
            return Some(strip_bold(line));
        }

        if state.in_header && state.line_count <= self.header_lines {
            for prefix in HEADER_PREFIXES {
                if trimmed.starts_with(prefix) {
                    return Some(line.to_string());
                }
            }
            return None;
        }
        if state.in_header && state.line_count > self.header_lines {
            state.in_header = false;
        }

        None
    }
}

impl Executor for CodexExecutor {
    fn run(&self, cancel: &CancelToken, prompt: &str) -> Result<ExecOutcome, AgentError> {
        let args = self.build_args(prompt);
        let mut child = self
            .runner
            .start(&self.command, &args, None, StreamChannel::Stderr)?;

        let mut state = FilterState::new();
        let mut raw = String::new();
        let mut filtered = String::new();

        stream_lines(cancel, &mut child, |line| {
            raw.push_str(line);
            raw.push('\n');
            if let Some(shown) = self.should_display(line, &mut state) {
                filtered.push_str(&shown);
                filtered.push('\n');
                if let Some(handler) = &self.output_handler {
                    handler(&format!("{shown}\n"));
                }
            }
        })?;

        let signal = detect_signal(&raw);
        Ok(ExecOutcome {
            output: filtered,
            signal,
        })
    }
}

fn file_line_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:^|[^A-Za-z0-9/])([A-Za-z0-9_./-]+[A-Za-z0-9_]):(\d+)")
            .expect("file line ref regex")
    })
}

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https?://\S+").expect("url regex"))
}

/// True when the line carries a file:line reference. URLs are removed first
/// so `host:port` does not count as a match.
fn contains_file_line_ref(line: &str) -> bool {
    if line.contains("://") {
        let without_urls = url_re().replace_all(line, " ");
        return file_line_ref_re().is_match(&without_urls);
    }
    file_line_ref_re().is_match(line)
}

/// Remove paired markdown bold markers, keeping the text between them.
fn strip_bold(text: &str) -> String {
    let mut result = text.to_string();
    loop {
        let Some(start) = result.find("**") else {
            break;
        };
        let Some(offset) = result[start + 2..].find("**") else {
            break;
        };
        let end = start + 2 + offset;
        result = format!("{}{}{}", &result[..start], &result[start + 2..end], &result[end + 2..]);
    }
    result
}
