use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use ralphex_core::config::{self, AppConfig, ConfigError};
use ralphex_core::events::EventBus;
use ralphex_core::plan::extract_branch_name;
use ralphex_core::{CancelToken, PhaseHolder};
use ralphex_git::{DiffStats, GitError, GitService, StderrGitLog};
use ralphex_notify::{NotifyService, RunReport, RunStatus};
use ralphex_web::server::connect_host;
use ralphex_web::{spawn_watcher, ApiState, DashboardServer, WebError};

use crate::broadcast::BroadcastLogger;
use crate::cli::Cli;
use crate::interrupt::CleanupSlot;
use crate::progress::{format_elapsed, ProgressConfig, ProgressLogger, RunnerLog};
use crate::runner::{Mode, Runner, RunnerConfig, RunnerError};
use crate::select::{ask_yes_no, PlanSelector, SelectError};

const PROGRESS_IGNORE: (&str, &str) = (".ralphex/progress/", ".ralphex/progress/progress-test.txt");
const WORKTREE_IGNORE: (&str, &str) = (".ralphex/worktrees/", ".ralphex/worktrees/test");

#[derive(Debug, thiserror::Error)]
pub enum MainError {
    #[error("{0}")]
    Precondition(String),
    #[error("load config: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },
    #[error(transparent)]
    Git(#[from] GitError),
    #[error("select plan: {source}")]
    Select {
        #[from]
        source: SelectError,
    },
    #[error("runner: {source}")]
    Runner {
        #[from]
        source: RunnerError,
    },
    #[error("start dashboard: {source}")]
    Web {
        #[from]
        source: WebError,
    },
    #[error("create progress logger: {source}")]
    Progress {
        #[source]
        source: io::Error,
    },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

/// Top-level driver: flag validation, config, plan selection, branch or
/// worktree policy, runner execution, notification, archive, teardown.
pub fn run(cli: Cli, cancel: CancelToken, wt_cleanup: Arc<CleanupSlot>) -> Result<(), MainError> {
    validate_flags(&cli)?;
    if handle_early_flags(&cli)? {
        return Ok(());
    }

    let config_dir = config::resolve_config_dir(cli.config_dir.as_deref());
    let mut app = config::load(&config_dir)?;
    apply_cli_overrides(&cli, &mut app);

    let notify = NotifyService::from_config(&app.notify);

    // watch-only: dashboard over foreign progress files, no repo required
    if is_watch_only(&cli, &app) {
        return run_watch_only(&cli, &app, &cancel);
    }

    if !command_in_path(&app.claude_command) {
        return Err(MainError::Precondition(format!(
            "{} not found in PATH",
            app.claude_command
        )));
    }
    if !Path::new(".git").exists() {
        return Err(MainError::Precondition(
            "must run from repository root (no .git directory found)".to_string(),
        ));
    }

    let git = GitService::open(Path::new("."), Arc::new(StderrGitLog))?;
    ensure_repo_has_commits(&git)?;

    let default_branch = resolve_default_branch(
        cli.base_ref.clone(),
        app.default_branch.clone(),
        &git,
    );
    let mode = determine_mode(&cli);
    let selector = PlanSelector::new(app.plans_dir.clone());

    if mode == Mode::PlanCreate {
        let description = cli.plan.clone().expect("plan-create mode implies a description");
        return run_plan_mode(
            &cli,
            &app,
            &git,
            &default_branch,
            &notify,
            &selector,
            description,
            &wt_cleanup,
            &cancel,
        );
    }

    let optional = matches!(mode, Mode::Review | Mode::ExternalOnly);
    let stdin = io::stdin();
    let plan_file = match selector.select(
        cli.plan_file.as_deref(),
        optional,
        &mut stdin.lock(),
        &mut io::stdout(),
    ) {
        Ok(plan_file) => plan_file,
        Err(SelectError::NoPlans { .. })
            if mode == Mode::Full && git.is_main_branch().unwrap_or(false) =>
        {
            // empty plans directory on the main branch: offer to author one
            let Some(description) = prompt_plan_description()? else {
                return Ok(());
            };
            return run_plan_mode(
                &cli,
                &app,
                &git,
                &default_branch,
                &notify,
                &selector,
                description,
                &wt_cleanup,
                &cancel,
            );
        }
        Err(err) => return Err(err.into()),
    };

    if app.worktree_enabled && plan_file.is_some() && mode_requires_branch(mode) {
        let plan_file = plan_file.expect("checked above");
        return run_with_worktree(
            &cli,
            &app,
            mode,
            &git,
            plan_file,
            &default_branch,
            &notify,
            &wt_cleanup,
            &cancel,
        );
    }

    // normal mode: branch first, then gitignore; the branch guard checks
    // for dirty files other than the plan, so the ignore append must come
    // after it
    if let Some(plan_file) = &plan_file {
        if mode_requires_branch(mode) {
            git.create_branch_for_plan(plan_file)?;
        }
    }
    ensure_git_ignored(&git, &[PROGRESS_IGNORE]);

    execute_plan(
        ExecuteArgs {
            plan_file,
            main_plan_file: None,
            mode,
            git: &git,
            main_git: None,
            app: &app,
            cli: &cli,
            default_branch,
            notify: &notify,
            pre_log: None,
            pre_holder: None,
        },
        &cancel,
    )
}

struct ExecuteArgs<'a> {
    /// Plan path as the runner and agent see it (worktree-local in worktree
    /// mode).
    plan_file: Option<PathBuf>,
    /// Original plan path in the main repository; set only in worktree mode
    /// and used for the end-of-run archive move.
    main_plan_file: Option<PathBuf>,
    mode: Mode,
    /// Working-tree service: the worktree's in worktree mode.
    git: &'a GitService,
    /// Main-repo service for cross-boundary operations in worktree mode.
    main_git: Option<&'a GitService>,
    app: &'a AppConfig,
    cli: &'a Cli,
    default_branch: String,
    notify: &'a NotifyService,
    /// Pre-created logger/holder (worktree mode creates them before chdir so
    /// the log lands in the main repository).
    pre_log: Option<Arc<ProgressLogger>>,
    pre_holder: Option<PhaseHolder>,
}

fn execute_plan(args: ExecuteArgs, cancel: &CancelToken) -> Result<(), MainError> {
    let branch = match args.git.current_branch() {
        Ok(branch) if !branch.is_empty() => branch,
        _ => "unknown".to_string(),
    };

    let holder = args.pre_holder.clone().unwrap_or_default();
    let base_log = match args.pre_log.clone() {
        Some(log) => log,
        None => Arc::new(
            ProgressLogger::open(
                ProgressConfig {
                    repo_root: args.git.root().to_path_buf(),
                    plan_file: args.plan_file.clone(),
                    plan_description: None,
                    mode: args.mode.as_str().to_string(),
                    branch: branch.clone(),
                    no_color: args.cli.no_color,
                },
                holder.clone(),
            )
            .map_err(|source| MainError::Progress { source })?,
        ),
    };

    let runner_log: Arc<dyn RunnerLog> = if args.cli.serve {
        let bus = EventBus::new();
        let dashboard_plan = args.main_plan_file.clone().or_else(|| args.plan_file.clone());
        let state = ApiState {
            plan_path: dashboard_plan,
            bus: bus.clone(),
        };
        let (addr, _server) =
            DashboardServer::new(&args.cli.host, args.cli.port, state).start(cancel.clone())?;
        println!(
            "web dashboard at http://{}:{}",
            connect_host(&args.cli.host),
            addr.port()
        );

        let watch_dirs = resolve_watch_dirs(&args.cli.watch, &args.app.watch_dirs);
        if !watch_dirs.is_empty() {
            let _ = spawn_watcher(watch_dirs, bus.clone(), cancel.clone());
        }
        Arc::new(BroadcastLogger::new(base_log.clone(), bus))
    } else {
        base_log.clone()
    };

    print_startup_info(args.mode, args.plan_file.as_deref(), &branch, args.cli, base_log.path());

    let runner_cfg = RunnerConfig {
        plan_file: args.plan_file.clone(),
        plan_description: None,
        mode: args.mode,
        max_iterations: args.cli.max_iterations,
        iteration_delay: Duration::from_millis(args.app.iteration_delay_ms),
        task_retry_count: args.app.task_retry_count,
        // the external-only mode exists to run the external loop, so it
        // forces the reviewer on regardless of config
        external_enabled: args.app.external_enabled || args.mode == Mode::ExternalOnly,
        finalize_enabled: args.app.finalize_enabled,
        app: args.app.clone(),
    };
    if args.cli.debug {
        println!(
            "debug: iteration delay {}ms, task retry count {}, external {}, finalize {}",
            args.app.iteration_delay_ms,
            args.app.task_retry_count,
            runner_cfg.external_enabled,
            runner_cfg.finalize_enabled
        );
    }
    let runner = Runner::new(runner_cfg, runner_log.clone(), holder);

    if let Err(err) = runner.run(cancel) {
        let report_plan = args.main_plan_file.clone().or_else(|| args.plan_file.clone());
        args.notify.send(&RunReport {
            status: RunStatus::Failure,
            mode: args.mode.as_str().to_string(),
            plan_file: report_plan,
            branch,
            duration: base_log.elapsed(),
            files: 0,
            additions: 0,
            deletions: 0,
            error: Some(err.to_string()),
        });
        base_log.close();
        return Err(err.into());
    }

    let elapsed = base_log.elapsed();

    // diff stats come from the working-tree service: in worktree mode its
    // HEAD carries the committed work
    let stats = match args.git.diff_stats(&args.default_branch) {
        Ok(stats) => stats,
        Err(err) => {
            eprintln!("warning: failed to get diff stats: {err}");
            DiffStats::default()
        }
    };

    let report_plan = args.main_plan_file.clone().or_else(|| args.plan_file.clone());
    args.notify.send(&RunReport {
        status: RunStatus::Success,
        mode: args.mode.as_str().to_string(),
        plan_file: report_plan.clone(),
        branch,
        duration: elapsed,
        files: stats.files,
        additions: stats.additions,
        deletions: stats.deletions,
        error: None,
    });

    // archive the plan via the main-repo service: in worktree mode the plan
    // file lives in the main working tree
    if mode_requires_branch(args.mode) {
        if let Some(plan_file) = &report_plan {
            let move_git = args.main_git.unwrap_or(args.git);
            if let Err(err) = move_git.move_plan_to_completed(plan_file) {
                eprintln!("warning: failed to move plan to completed: {err}");
            }
        }
    }

    if stats.files > 0 {
        runner_log.log_diff_stats(stats.files, stats.additions, stats.deletions);
        println!(
            "\ncompleted in {} ({} files, +{}/-{} lines)",
            format_elapsed(elapsed),
            stats.files,
            stats.additions,
            stats.deletions
        );
    } else {
        println!("\ncompleted in {}", format_elapsed(elapsed));
    }

    if args.cli.serve {
        base_log.close();
        println!(
            "web dashboard still running at http://{}:{} (press Ctrl+C to exit)",
            connect_host(&args.cli.host),
            args.cli.port
        );
        while !cancel.wait_timeout(Duration::from_millis(500)) {}
    }

    Ok(())
}

/// Runs the slot-registered cleanup when dropped, so every exit path out of
/// the worktree flow tears down exactly once (the interrupt watcher's
/// force-exit path drains the same slot).
struct SlotGuard(Arc<CleanupSlot>);

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.0.run();
    }
}

#[allow(clippy::too_many_arguments)]
fn run_with_worktree(
    cli: &Cli,
    app: &AppConfig,
    mode: Mode,
    git: &GitService,
    plan_file: PathBuf,
    default_branch: &str,
    notify: &NotifyService,
    wt_cleanup: &Arc<CleanupSlot>,
    cancel: &CancelToken,
) -> Result<(), MainError> {
    let setup = git.create_worktree_for_plan(&plan_file)?;
    let main_root = git.root().to_path_buf();

    // early cleanup so the force-exit path can remove the worktree even
    // during setup; replaced by the full cleanup after chdir
    {
        let main_root = main_root.clone();
        let wt_path = setup.path.clone();
        wt_cleanup.set(move || remove_worktree_by_path(&main_root, &wt_path));
    }
    let _guard = SlotGuard(wt_cleanup.clone());

    ensure_git_ignored(git, &[PROGRESS_IGNORE, WORKTREE_IGNORE]);

    let orig_dir = env::current_dir().map_err(|source| MainError::Io {
        context: "get working directory".to_string(),
        source,
    })?;

    // create the logger before chdir so the log lands in the main repo's
    // runtime directory; the branch comes from the plan name because the
    // main checkout still sits on master
    let holder = PhaseHolder::new();
    let base_log = Arc::new(
        ProgressLogger::open(
            ProgressConfig {
                repo_root: main_root.clone(),
                plan_file: Some(plan_file.clone()),
                plan_description: None,
                mode: mode.as_str().to_string(),
                branch: extract_branch_name(&plan_file),
                no_color: cli.no_color,
            },
            holder.clone(),
        )
        .map_err(|source| MainError::Progress { source })?,
    );

    env::set_current_dir(&setup.path).map_err(|source| MainError::Io {
        context: "chdir to worktree".to_string(),
        source,
    })?;

    // full cleanup: restore CWD, then remove the worktree
    {
        let main_root = main_root.clone();
        let wt_path = setup.path.clone();
        let orig_dir = orig_dir.clone();
        wt_cleanup.set(move || {
            if let Err(err) = env::set_current_dir(&orig_dir) {
                eprintln!("warning: failed to restore working directory: {err}");
            }
            remove_worktree_by_path(&main_root, &wt_path);
        });
    }

    let wt_git = GitService::open(Path::new("."), Arc::new(StderrGitLog))?;

    // the agent must operate on the worktree's copy of the plan, not the
    // original in the main working tree
    let wt_plan = translate_into_worktree(&plan_file, &main_root, wt_git.root());

    if setup.plan_needs_commit {
        wt_git.commit_plan_file(&plan_file, &main_root)?;
    }

    execute_plan(
        ExecuteArgs {
            plan_file: Some(wt_plan),
            main_plan_file: Some(plan_file),
            mode,
            git: &wt_git,
            main_git: Some(git),
            app,
            cli,
            default_branch: default_branch.to_string(),
            notify,
            pre_log: Some(base_log),
            pre_holder: Some(holder),
        },
        cancel,
    )
}

fn translate_into_worktree(plan_file: &Path, main_root: &Path, wt_root: &Path) -> PathBuf {
    let abs = plan_file
        .canonicalize()
        .unwrap_or_else(|_| plan_file.to_path_buf());
    match abs.strip_prefix(main_root) {
        Ok(rel) => wt_root.join(rel),
        Err(_) => plan_file.to_path_buf(),
    }
}

fn remove_worktree_by_path(main_root: &Path, wt_path: &Path) {
    match GitService::open(main_root, Arc::new(StderrGitLog)) {
        Ok(service) => {
            if let Err(err) = service.remove_worktree(wt_path) {
                eprintln!("warning: failed to remove worktree: {err}");
            }
        }
        Err(err) => eprintln!("warning: failed to open repository for worktree cleanup: {err}"),
    }
}

#[allow(clippy::too_many_arguments)]
fn run_plan_mode(
    cli: &Cli,
    app: &AppConfig,
    git: &GitService,
    default_branch: &str,
    notify: &NotifyService,
    selector: &PlanSelector,
    description: String,
    wt_cleanup: &Arc<CleanupSlot>,
    cancel: &CancelToken,
) -> Result<(), MainError> {
    ensure_git_ignored(git, &[PROGRESS_IGNORE]);

    let branch = match git.current_branch() {
        Ok(branch) if !branch.is_empty() => branch,
        _ => "unknown".to_string(),
    };

    let holder = PhaseHolder::new();
    let base_log = Arc::new(
        ProgressLogger::open(
            ProgressConfig {
                repo_root: git.root().to_path_buf(),
                plan_file: None,
                plan_description: Some(description.clone()),
                mode: Mode::PlanCreate.as_str().to_string(),
                branch: branch.clone(),
                no_color: cli.no_color,
            },
            holder.clone(),
        )
        .map_err(|source| MainError::Progress { source })?,
    );

    println!("starting interactive plan creation");
    println!("request: {description}");
    println!("branch: {branch} (max {} iterations)", cli.max_iterations);
    println!("progress log: {}\n", base_log.path().display());

    let started = SystemTime::now();
    let runner_cfg = RunnerConfig {
        plan_file: None,
        plan_description: Some(description),
        mode: Mode::PlanCreate,
        max_iterations: cli.max_iterations,
        iteration_delay: Duration::from_millis(app.iteration_delay_ms),
        task_retry_count: app.task_retry_count,
        external_enabled: false,
        finalize_enabled: false,
        app: app.clone(),
    };
    let runner = Runner::new(runner_cfg, base_log.clone(), holder);
    runner.run(cancel)?;

    let elapsed = base_log.elapsed();
    base_log.close();

    let Some(plan_file) = selector.find_recent(started) else {
        println!("\nplan creation completed in {}", format_elapsed(elapsed));
        return Ok(());
    };
    println!(
        "\nplan creation completed in {}, created {}",
        format_elapsed(elapsed),
        plan_file.display()
    );

    let stdin = io::stdin();
    if !ask_yes_no(
        "Continue with plan implementation?",
        &mut stdin.lock(),
        &mut io::stdout(),
    ) {
        return Ok(());
    }

    let plan_file = plan_file
        .canonicalize()
        .unwrap_or(plan_file);
    println!("\ncontinuing with plan implementation...");

    if app.worktree_enabled {
        return run_with_worktree(
            cli,
            app,
            Mode::Full,
            git,
            plan_file,
            default_branch,
            notify,
            wt_cleanup,
            cancel,
        );
    }

    git.create_branch_for_plan(&plan_file)?;
    execute_plan(
        ExecuteArgs {
            plan_file: Some(plan_file),
            main_plan_file: None,
            mode: Mode::Full,
            git,
            main_git: None,
            app,
            cli,
            default_branch: default_branch.to_string(),
            notify,
            pre_log: None,
            pre_holder: None,
        },
        cancel,
    )
}

fn run_watch_only(cli: &Cli, app: &AppConfig, cancel: &CancelToken) -> Result<(), MainError> {
    let dirs = resolve_watch_dirs(&cli.watch, &app.watch_dirs);
    let bus = EventBus::new();
    let state = ApiState {
        plan_path: None,
        bus: bus.clone(),
    };
    let (addr, _server) =
        DashboardServer::new(&cli.host, cli.port, state).start(cancel.clone())?;
    let _watcher = spawn_watcher(dirs.clone(), bus, cancel.clone());

    println!(
        "watching {} directories, dashboard at http://{}:{} (press Ctrl+C to exit)",
        dirs.len(),
        connect_host(&cli.host),
        addr.port()
    );
    while !cancel.wait_timeout(Duration::from_millis(500)) {}
    Ok(())
}

fn print_startup_info(mode: Mode, plan_file: Option<&Path>, branch: &str, cli: &Cli, progress: &Path) {
    let mode_suffix = if mode == Mode::Full {
        String::new()
    } else {
        format!(" ({mode} mode)")
    };
    println!(
        "starting ralphex loop (max {} iterations){mode_suffix}",
        cli.max_iterations
    );
    if let Some(plan_file) = plan_file {
        println!("plan: {}", plan_file.display());
    }
    println!("branch: {branch}");
    println!("progress log: {}\n", progress.display());
}

fn prompt_plan_description() -> Result<Option<String>, MainError> {
    use std::io::{BufRead, Write};

    println!("no plan files found.");
    print!("describe the plan to create (empty to cancel): ");
    io::stdout().flush().map_err(|source| MainError::Io {
        context: "prompt for plan description".to_string(),
        source,
    })?;

    let mut description = String::new();
    io::stdin()
        .lock()
        .read_line(&mut description)
        .map_err(|source| MainError::Io {
            context: "read plan description".to_string(),
            source,
        })?;
    let description = description.trim().to_string();
    Ok((!description.is_empty()).then_some(description))
}

fn ensure_repo_has_commits(git: &GitService) -> Result<(), MainError> {
    let created = std::cell::Cell::new(false);
    git.ensure_has_commits(|| {
        println!("repository has no commits");
        println!("ralphex needs at least one commit to create feature branches.\n");
        let stdin = io::stdin();
        let accepted = ask_yes_no(
            "create initial commit?",
            &mut stdin.lock(),
            &mut io::stdout(),
        );
        created.set(accepted);
        accepted
    })?;
    if created.get() {
        println!("created initial commit");
    }
    Ok(())
}

/// Add ignore patterns and commit `.gitignore` only when it was clean before
/// the run began, so unrelated user edits never get swept into our commit.
fn ensure_git_ignored(git: &GitService, pairs: &[(&str, &str)]) {
    let gitignore = git.root().join(".gitignore");
    let dirty_before = match git.file_has_changes(&gitignore) {
        Ok(dirty) => dirty,
        Err(err) => {
            eprintln!("warning: failed to check .gitignore status: {err}");
            true
        }
    };

    for (pattern, probe) in pairs {
        if let Err(err) = git.ensure_ignored(pattern, probe) {
            eprintln!("warning: gitignore setup: {err}");
            return;
        }
    }

    if !dirty_before {
        if let Err(err) = git.commit_ignore_changes() {
            eprintln!("warning: failed to commit .gitignore: {err}");
        }
    }
}

fn validate_flags(cli: &Cli) -> Result<(), MainError> {
    if cli.plan.is_some() && cli.plan_file.is_some() {
        return Err(MainError::Precondition(
            "--plan flag conflicts with plan file argument; use one or the other".to_string(),
        ));
    }
    Ok(())
}

/// Handle flags that act before the normal flow. Returns true when the
/// process should exit afterwards.
fn handle_early_flags(cli: &Cli) -> Result<bool, MainError> {
    if cli.reset {
        let dir = config::resolve_config_dir(cli.config_dir.as_deref());
        let stdin = io::stdin();
        config::reset(&dir, &mut stdin.lock(), &mut io::stdout())?;
        if cli.is_reset_only() {
            return Ok(true);
        }
    }
    if let Some(dir) = &cli.dump_defaults {
        config::dump_defaults(dir)?;
        println!("defaults extracted to {}", dir.display());
        return Ok(true);
    }
    Ok(false)
}

fn apply_cli_overrides(cli: &Cli, app: &mut AppConfig) {
    if cli.skip_finalize {
        app.finalize_enabled = false;
    }
    if cli.worktree {
        app.worktree_enabled = true;
    }
}

pub(crate) fn determine_mode(cli: &Cli) -> Mode {
    if cli.plan.is_some() {
        Mode::PlanCreate
    } else if cli.tasks_only {
        Mode::TasksOnly
    } else if cli.external_only || cli.codex_only {
        Mode::ExternalOnly
    } else if cli.review {
        Mode::Review
    } else {
        Mode::Full
    }
}

pub(crate) fn mode_requires_branch(mode: Mode) -> bool {
    matches!(mode, Mode::Full | Mode::TasksOnly)
}

pub(crate) fn resolve_default_branch(
    cli_ref: Option<String>,
    config_branch: String,
    git: &GitService,
) -> String {
    if let Some(cli_ref) = cli_ref {
        if !cli_ref.is_empty() {
            return cli_ref;
        }
    }
    if !config_branch.is_empty() {
        return config_branch;
    }
    git.default_branch()
}

pub(crate) fn is_watch_only(cli: &Cli, app: &AppConfig) -> bool {
    cli.serve
        && cli.plan_file.is_none()
        && cli.plan.is_none()
        && (!cli.watch.is_empty() || !app.watch_dirs.is_empty())
}

pub(crate) fn resolve_watch_dirs(cli_dirs: &[PathBuf], config_dirs: &[PathBuf]) -> Vec<PathBuf> {
    if !cli_dirs.is_empty() {
        return cli_dirs.to_vec();
    }
    config_dirs.to_vec()
}

pub(crate) fn command_in_path(command: &str) -> bool {
    if command.contains('/') {
        return Path::new(command).is_file();
    }
    let Some(path) = env::var_os("PATH") else {
        return false;
    };
    env::split_paths(&path).any(|dir| dir.join(command).is_file())
}
