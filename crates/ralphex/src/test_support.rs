use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use ralphex_agents::{AgentError, ExecOutcome, Executor, Signal};
use ralphex_core::{CancelToken, Phase};

use crate::progress::RunnerLog;

pub fn unique_temp_dir(prefix: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let path = std::env::temp_dir().join(format!("ralphex-test-{prefix}-{now}"));
    std::fs::create_dir_all(&path).expect("create temp dir");
    path
}

pub fn plain(output: impl Into<String>) -> Result<ExecOutcome, AgentError> {
    Ok(ExecOutcome {
        output: output.into(),
        signal: None,
    })
}

pub fn done(signal: Signal) -> Result<ExecOutcome, AgentError> {
    Ok(ExecOutcome {
        output: format!("done\n{}\n", signal.token()),
        signal: Some(signal),
    })
}

pub fn failed() -> Result<ExecOutcome, AgentError> {
    Ok(ExecOutcome {
        output: format!("error\n{}\n", Signal::TaskFailed.token()),
        signal: Some(Signal::TaskFailed),
    })
}

/// Shared invocation counter handed out before an executor moves into the
/// runner.
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicU32>);

impl CallCounter {
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Executor returning predefined results in order; running out of results is
/// an error, which doubles as a "must not be called" assertion.
pub struct ScriptedExecutor {
    results: Mutex<VecDeque<Result<ExecOutcome, AgentError>>>,
    calls: CallCounter,
}

impl ScriptedExecutor {
    pub fn new(results: Vec<Result<ExecOutcome, AgentError>>) -> Self {
        Self {
            results: Mutex::new(results.into_iter().collect()),
            calls: CallCounter::default(),
        }
    }

    pub fn calls(&self) -> CallCounter {
        self.calls.clone()
    }
}

impl Executor for ScriptedExecutor {
    fn run(&self, _cancel: &CancelToken, _prompt: &str) -> Result<ExecOutcome, AgentError> {
        self.calls.0.fetch_add(1, Ordering::SeqCst);
        self.results
            .lock()
            .expect("results lock")
            .pop_front()
            .unwrap_or_else(|| {
                Err(AgentError::Stream {
                    source: std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "no more scripted results",
                    ),
                })
            })
    }
}

/// Executor driven by a closure; used where the fake agent must touch the
/// plan file between iterations.
pub struct FnExecutor {
    f: Box<dyn Fn(&str) -> Result<ExecOutcome, AgentError> + Send + Sync>,
}

impl FnExecutor {
    pub fn new(f: impl Fn(&str) -> Result<ExecOutcome, AgentError> + Send + Sync + 'static) -> Self {
        Self { f: Box::new(f) }
    }
}

impl Executor for FnExecutor {
    fn run(&self, _cancel: &CancelToken, prompt: &str) -> Result<ExecOutcome, AgentError> {
        (self.f)(prompt)
    }
}

/// In-memory logger capturing everything the runner writes.
pub struct MockLog {
    path: PathBuf,
    printed: Mutex<Vec<String>>,
    sections: Mutex<Vec<String>>,
    phases: Mutex<Vec<Phase>>,
    task_events: Mutex<Vec<(bool, usize)>>,
}

impl MockLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            printed: Mutex::new(Vec::new()),
            sections: Mutex::new(Vec::new()),
            phases: Mutex::new(Vec::new()),
            task_events: Mutex::new(Vec::new()),
        }
    }

    pub fn printed(&self) -> Vec<String> {
        self.printed.lock().expect("printed lock").clone()
    }

    pub fn printed_contains(&self, needle: &str) -> bool {
        self.printed().iter().any(|line| line.contains(needle))
    }

    pub fn sections(&self) -> Vec<String> {
        self.sections.lock().expect("sections lock").clone()
    }

    pub fn phases(&self) -> Vec<Phase> {
        self.phases.lock().expect("phases lock").clone()
    }

    pub fn task_events(&self) -> Vec<(bool, usize)> {
        self.task_events.lock().expect("task events lock").clone()
    }
}

impl RunnerLog for MockLog {
    fn set_phase(&self, phase: Phase) {
        self.phases.lock().expect("phases lock").push(phase);
    }

    fn print(&self, message: &str) {
        self.printed
            .lock()
            .expect("printed lock")
            .push(message.to_string());
    }

    fn print_raw(&self, text: &str) {
        self.printed
            .lock()
            .expect("printed lock")
            .push(text.to_string());
    }

    fn print_section(&self, label: &str) {
        self.sections
            .lock()
            .expect("sections lock")
            .push(label.to_string());
    }

    fn print_aligned(&self, line: &str) {
        self.printed
            .lock()
            .expect("printed lock")
            .push(line.to_string());
    }

    fn log_diff_stats(&self, files: u64, additions: u64, deletions: u64) {
        self.printed
            .lock()
            .expect("printed lock")
            .push(format!("changed {files} files, +{additions}/-{deletions}"));
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn task_started(&self, position: usize) {
        self.task_events
            .lock()
            .expect("task events lock")
            .push((true, position));
    }

    fn task_ended(&self, position: usize) {
        self.task_events
            .lock()
            .expect("task events lock")
            .push((false, position));
    }
}
