use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// Pipeline phase. One shared [`PhaseHolder`] is the canonical current
/// phase for a run; the progress logger and the dashboard read from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Tasks,
    ReviewFirst,
    ReviewPreExternal,
    External,
    ExternalEval,
    ReviewPostExternal,
    Finalize,
    PlanCreate,
    Idle,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tasks => "tasks",
            Self::ReviewFirst => "review-first",
            Self::ReviewPreExternal => "review-pre-external",
            Self::External => "external",
            Self::ExternalEval => "external-eval",
            Self::ReviewPostExternal => "review-post-external",
            Self::Finalize => "finalize",
            Self::PlanCreate => "plan-create",
            Self::Idle => "idle",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared single-cell holder for the current phase. Cloning shares the cell.
#[derive(Debug, Clone)]
pub struct PhaseHolder {
    inner: Arc<Mutex<Phase>>,
}

impl Default for PhaseHolder {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Phase::Idle)),
        }
    }
}

impl PhaseHolder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, phase: Phase) {
        *self.inner.lock().expect("phase holder lock") = phase;
    }

    pub fn get(&self) -> Phase {
        *self.inner.lock().expect("phase holder lock")
    }
}
