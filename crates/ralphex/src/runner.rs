use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ralphex_agents::{AgentError, ClaudeExecutor, CodexExecutor, Executor, Signal};
use ralphex_core::config::AppConfig;
use ralphex_core::{CancelToken, Phase, PhaseHolder};

use crate::progress::RunnerLog;

/// Which subset of phases a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Full,
    TasksOnly,
    Review,
    ExternalOnly,
    PlanCreate,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::TasksOnly => "tasks-only",
            Self::Review => "review",
            Self::ExternalOnly => "external-only",
            Self::PlanCreate => "plan-create",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("plan file required for {mode} mode")]
    PlanRequired { mode: Mode },
    #[error("plan description required for plan-create mode")]
    DescriptionRequired,
    #[error("{phase} phase failed: FAILED signal")]
    FailedSignal { phase: Phase },
    #[error("{phase} phase failed: max iterations ({limit}) reached")]
    MaxIterations { phase: Phase, limit: u32 },
    #[error("claude execution failed in {phase} phase: {source}")]
    Primary {
        phase: Phase,
        #[source]
        source: AgentError,
    },
    #[error("codex execution failed: {source}")]
    External {
        #[source]
        source: AgentError,
    },
    #[error("run cancelled")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub plan_file: Option<PathBuf>,
    pub plan_description: Option<String>,
    pub mode: Mode,
    pub max_iterations: u32,
    pub iteration_delay: Duration,
    pub task_retry_count: u32,
    pub external_enabled: bool,
    pub finalize_enabled: bool,
    pub app: AppConfig,
}

/// What the external reviewer produced, after filtering.
enum ExternalFindings {
    Clean,
    Findings(String),
}

/// Phase state machine driving the executors across a run.
pub struct Runner {
    pub(crate) cfg: RunnerConfig,
    pub(crate) log: Arc<dyn RunnerLog>,
    holder: PhaseHolder,
    claude: Box<dyn Executor>,
    codex: Box<dyn Executor>,
}

impl Runner {
    /// Build a runner with real executors wired from the app config. Agent
    /// output streams through the logger as it arrives.
    pub fn new(cfg: RunnerConfig, log: Arc<dyn RunnerLog>, holder: PhaseHolder) -> Self {
        let claude_log = log.clone();
        let claude = ClaudeExecutor::new(cfg.app.claude_command.clone(), cfg.app.claude_args.clone())
            .with_output_handler(Box::new(move |line| claude_log.print_raw(line)));

        let codex_log = log.clone();
        let codex = CodexExecutor::from_config(&cfg.app.external)
            .with_output_handler(Box::new(move |line| codex_log.print_raw(line)));

        Self::with_executors(cfg, log, holder, Box::new(claude), Box::new(codex))
    }

    pub fn with_executors(
        cfg: RunnerConfig,
        log: Arc<dyn RunnerLog>,
        holder: PhaseHolder,
        claude: Box<dyn Executor>,
        codex: Box<dyn Executor>,
    ) -> Self {
        Self {
            cfg,
            log,
            holder,
            claude,
            codex,
        }
    }

    pub fn run(&self, cancel: &CancelToken) -> Result<(), RunnerError> {
        let result = self.dispatch(cancel);
        self.enter_phase(Phase::Idle);
        result
    }

    /// Publish a phase transition: the shared holder first, then the logger
    /// (whose broadcasting variant emits the phase event), so no event of a
    /// new phase is ever observable before the holder reports it.
    fn enter_phase(&self, phase: Phase) {
        self.holder.set(phase);
        self.log.set_phase(phase);
    }

    fn dispatch(&self, cancel: &CancelToken) -> Result<(), RunnerError> {
        match self.cfg.mode {
            Mode::Full => {
                self.require_plan()?;
                self.task_phase(cancel)?;
                self.review_pipeline(cancel, true, true)
            }
            Mode::TasksOnly => {
                self.require_plan()?;
                self.task_phase(cancel)
            }
            Mode::Review => self.review_pipeline(cancel, true, true),
            Mode::ExternalOnly => self.review_pipeline(cancel, false, false),
            Mode::PlanCreate => self.plan_create_phase(cancel),
        }
    }

    fn require_plan(&self) -> Result<&PathBuf, RunnerError> {
        self.cfg.plan_file.as_ref().ok_or(RunnerError::PlanRequired {
            mode: self.cfg.mode,
        })
    }

    /// Task phase: one agent invocation per plan task, position recomputed
    /// from the plan file before every iteration so retries and mid-run plan
    /// edits stay aligned with the observable "current task".
    fn task_phase(&self, cancel: &CancelToken) -> Result<(), RunnerError> {
        self.enter_phase(Phase::Tasks);
        let prompt = self.build_task_prompt();

        for i in 1..=self.cfg.max_iterations {
            if cancel.is_cancelled() {
                return Err(RunnerError::Cancelled);
            }

            let position = self.next_plan_task_position();
            if position == Some(0) {
                self.log.print("all plan tasks are complete");
                return Ok(());
            }
            // unreadable plan: keep going and label the section by the loop
            // counter instead
            let label = position.unwrap_or(i as usize);
            self.log.print_section(&format!("task iteration {label}"));
            self.log.task_started(label);

            let mut attempts = 0_u32;
            let done = loop {
                let outcome = match self.claude.run(cancel, &prompt) {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        self.log.task_ended(label);
                        return Err(self.primary_error(Phase::Tasks, err));
                    }
                };

                match outcome.signal {
                    Some(Signal::TaskFailed) => {
                        attempts += 1;
                        if attempts > self.cfg.task_retry_count {
                            self.log.task_ended(label);
                            return Err(RunnerError::FailedSignal { phase: Phase::Tasks });
                        }
                        self.log.print(&format!(
                            "task failed, retrying ({attempts}/{})",
                            self.cfg.task_retry_count
                        ));
                    }
                    Some(Signal::AllTasksDone) => {
                        if !self.has_uncompleted_tasks() {
                            break true;
                        }
                        // the agent's claim is advisory; the plan disagrees
                        self.log
                            .print("completion signal received but unchecked items remain, continuing");
                        break false;
                    }
                    _ => break false,
                }
            };
            self.log.task_ended(label);
            if done {
                return Ok(());
            }

            if cancel.sleep(self.cfg.iteration_delay) {
                return Err(RunnerError::Cancelled);
            }
        }

        Err(RunnerError::MaxIterations {
            phase: Phase::Tasks,
            limit: self.cfg.max_iterations,
        })
    }

    /// Review phases, the external cross-review with its evaluation loop,
    /// and the optional finalize step.
    fn review_pipeline(
        &self,
        cancel: &CancelToken,
        include_first: bool,
        include_pre: bool,
    ) -> Result<(), RunnerError> {
        if include_first {
            let prompt = self.build_first_review_prompt();
            self.signal_loop(cancel, Phase::ReviewFirst, &prompt, Signal::ReviewDone)?;
        }
        if include_pre {
            let prompt = self.build_second_review_prompt();
            self.signal_loop(cancel, Phase::ReviewPreExternal, &prompt, Signal::ReviewDone)?;
        }

        if self.cfg.external_enabled {
            match self.external_phase(cancel)? {
                ExternalFindings::Clean => {
                    // nothing to triage and nothing for a further review to
                    // chew on; the run is complete
                    self.log.print("external review reported no findings");
                    return Ok(());
                }
                ExternalFindings::Findings(findings) => {
                    let prompt = self.build_external_eval_prompt(&findings);
                    self.signal_loop(
                        cancel,
                        Phase::ExternalEval,
                        &prompt,
                        Signal::CodexReviewDone,
                    )?;
                }
            }
        }

        let prompt = self.build_second_review_prompt();
        self.signal_loop(cancel, Phase::ReviewPostExternal, &prompt, Signal::ReviewDone)?;

        self.finalize_phase(cancel)
    }

    /// Iterate the primary executor on one prompt until `done` arrives.
    /// TASK_FAILED is fatal in these phases.
    fn signal_loop(
        &self,
        cancel: &CancelToken,
        phase: Phase,
        prompt: &str,
        done: Signal,
    ) -> Result<(), RunnerError> {
        self.enter_phase(phase);

        for i in 1..=self.cfg.max_iterations {
            if cancel.is_cancelled() {
                return Err(RunnerError::Cancelled);
            }
            self.log.print_section(&format!("{phase} iteration {i}"));

            let outcome = self
                .claude
                .run(cancel, prompt)
                .map_err(|err| self.primary_error(phase, err))?;

            match outcome.signal {
                Some(signal) if signal == done => return Ok(()),
                Some(Signal::TaskFailed) => return Err(RunnerError::FailedSignal { phase }),
                _ => {}
            }

            if cancel.sleep(self.cfg.iteration_delay) {
                return Err(RunnerError::Cancelled);
            }
        }

        Err(RunnerError::MaxIterations {
            phase,
            limit: self.cfg.max_iterations,
        })
    }

    fn external_phase(&self, cancel: &CancelToken) -> Result<ExternalFindings, RunnerError> {
        self.enter_phase(Phase::External);
        self.log.print_section("external review");

        let prompt = self.build_external_review_prompt();
        let outcome = self.codex.run(cancel, &prompt).map_err(|err| match err {
            AgentError::Cancelled => RunnerError::Cancelled,
            other => RunnerError::External { source: other },
        })?;

        let trimmed = outcome.output.trim();
        if trimmed.is_empty() || trimmed.to_uppercase().contains("NO ISSUES FOUND") {
            return Ok(ExternalFindings::Clean);
        }
        Ok(ExternalFindings::Findings(outcome.output))
    }

    fn finalize_phase(&self, cancel: &CancelToken) -> Result<(), RunnerError> {
        if !self.cfg.finalize_enabled {
            return Ok(());
        }
        self.enter_phase(Phase::Finalize);
        self.log.print_section("finalize");

        let prompt = self.build_finalize_prompt();
        let outcome = self
            .claude
            .run(cancel, &prompt)
            .map_err(|err| self.primary_error(Phase::Finalize, err))?;

        match outcome.signal {
            Some(Signal::FinalizeDone | Signal::ReviewDone) => {}
            _ => self
                .log
                .print("warning: finalize ended without a completion signal"),
        }
        Ok(())
    }

    fn plan_create_phase(&self, cancel: &CancelToken) -> Result<(), RunnerError> {
        if self.cfg.plan_description.is_none() {
            return Err(RunnerError::DescriptionRequired);
        }
        let prompt = self.build_plan_create_prompt();
        self.signal_loop(cancel, Phase::PlanCreate, &prompt, Signal::PlanDone)
    }

    fn primary_error(&self, phase: Phase, err: AgentError) -> RunnerError {
        match err {
            AgentError::Cancelled => RunnerError::Cancelled,
            source => RunnerError::Primary { phase, source },
        }
    }

    /// 1-based array index of the first unfinished plan task, `Some(0)` when
    /// every task is done, None when the plan file is unreadable.
    pub(crate) fn next_plan_task_position(&self) -> Option<usize> {
        let plan_file = self.cfg.plan_file.as_ref()?;
        ralphex_core::plan::parse_plan_file(plan_file)
            .ok()
            .map(|plan| plan.next_pending_position())
    }

    /// Fast scan of the raw plan bytes for unchecked boxes, independent of
    /// parser behavior. A missing file reports uncompleted so an agent claim
    /// can never turn into a blind success.
    pub(crate) fn has_uncompleted_tasks(&self) -> bool {
        let Some(plan_file) = &self.cfg.plan_file else {
            return true;
        };
        match std::fs::read(plan_file) {
            Ok(bytes) => bytes.windows(5).any(|window| window == b"- [ ]"),
            Err(_) => true,
        }
    }

    pub fn phase_holder(&self) -> &PhaseHolder {
        &self.holder
    }
}
