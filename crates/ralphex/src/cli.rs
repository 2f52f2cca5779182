use std::path::PathBuf;

use clap::{ArgAction, Parser};

/// Command-line surface. Mode flags are mutually understood rather than
/// mutually exclusive: the most specific one wins (see `determine_mode`).
#[derive(Debug, Clone, Parser)]
#[command(
    name = "ralphex",
    about = "autonomous plan execution with an agent executor",
    version = env!("CARGO_PKG_VERSION"),
    disable_version_flag = true
)]
pub struct Cli {
    /// Path to the plan file (optional, interactive selection if omitted).
    #[arg(value_name = "plan-file")]
    pub plan_file: Option<PathBuf>,

    /// Maximum task iterations.
    #[arg(short = 'm', long, default_value_t = 50)]
    pub max_iterations: u32,

    /// Skip task execution, run the full review pipeline.
    #[arg(short = 'r', long)]
    pub review: bool,

    /// Skip tasks and first review, run only the external review loop.
    #[arg(short = 'e', long)]
    pub external_only: bool,

    /// Alias for --external-only (deprecated).
    #[arg(short = 'c', long)]
    pub codex_only: bool,

    /// Run only the task phase, skip all reviews.
    #[arg(short = 't', long)]
    pub tasks_only: bool,

    /// Override the default branch for review diffs (branch name or commit).
    #[arg(short = 'b', long, value_name = "ref")]
    pub base_ref: Option<String>,

    /// Skip the finalize step even if enabled in config.
    #[arg(long)]
    pub skip_finalize: bool,

    /// Run in an isolated git worktree.
    #[arg(long)]
    pub worktree: bool,

    /// Create a plan interactively (enter the plan description).
    #[arg(long, value_name = "description")]
    pub plan: Option<String>,

    /// Enable debug logging.
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Disable color output.
    #[arg(long)]
    pub no_color: bool,

    /// Print version and exit.
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    version: Option<bool>,

    /// Start the web dashboard for real-time streaming.
    #[arg(short = 's', long)]
    pub serve: bool,

    /// Web dashboard port.
    #[arg(short = 'p', long, default_value_t = 8080)]
    pub port: u16,

    /// Web dashboard listen address.
    #[arg(long, default_value = "127.0.0.1", env = "RALPHEX_WEB_HOST")]
    pub host: String,

    /// Directories to watch for progress files (repeatable).
    #[arg(short = 'w', long = "watch", value_name = "dir")]
    pub watch: Vec<PathBuf>,

    /// Interactively reset the global config to embedded defaults.
    #[arg(long)]
    pub reset: bool,

    /// Extract raw embedded defaults to the given directory.
    #[arg(long, value_name = "dir")]
    pub dump_defaults: Option<PathBuf>,

    /// Custom config directory.
    #[arg(long, value_name = "dir", env = "RALPHEX_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,
}

impl Cli {
    /// True when --reset was the only meaningful request, so the process
    /// exits after resetting instead of continuing into a run.
    pub fn is_reset_only(&self) -> bool {
        self.plan_file.is_none()
            && !self.review
            && !self.external_only
            && !self.codex_only
            && !self.tasks_only
            && !self.serve
            && self.plan.is_none()
            && self.watch.is_empty()
            && self.dump_defaults.is_none()
    }
}
