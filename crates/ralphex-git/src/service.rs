use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ralphex_core::plan::extract_branch_name;

use crate::command::GitCli;
use crate::error::GitError;

/// Receives INFO-level lines describing git operations as they happen.
pub trait GitLogger: Send + Sync {
    fn info(&self, line: &str);
}

/// Default logger writing to stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrGitLog;

impl GitLogger for StderrGitLog {
    fn info(&self, line: &str) {
        eprintln!("{line}");
    }
}

/// Change statistics between two commits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub files: u64,
    pub additions: u64,
    pub deletions: u64,
}

/// Git operations for one repository (main checkout or worktree). The
/// lifecycle driver holds two distinct services in worktree mode; plan-file
/// operations go to the main one, working-tree reads to the worktree one.
pub struct GitService {
    git: GitCli,
    root: PathBuf,
    log: Arc<dyn GitLogger>,
}

impl std::fmt::Debug for GitService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitService")
            .field("git", &self.git)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl GitService {
    /// Open the repository containing `path`, resolving the root through
    /// `git rev-parse`.
    pub fn open(path: &Path, log: Arc<dyn GitLogger>) -> Result<Self, GitError> {
        Self::open_with(path, GitCli::default(), log)
    }

    pub fn open_with(path: &Path, git: GitCli, log: Arc<dyn GitLogger>) -> Result<Self, GitError> {
        let probe = git.query(path, ["rev-parse", "--is-inside-work-tree"])?;
        if !probe.ok() || probe.line() != "true" {
            return Err(GitError::NotARepository {
                path: path.to_path_buf(),
            });
        }

        let top = git.run(path, ["rev-parse", "--show-toplevel"])?;
        let root = PathBuf::from(top.line());
        // resolve symlinks so relative-path math agrees with canonicalized
        // plan paths (macOS /tmp -> /private/tmp)
        let root = root.canonicalize().unwrap_or(root);

        Ok(Self { git, root, log })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn run<I, S>(&self, args: I) -> Result<crate::command::GitRun, GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        self.git.run(&self.root, args)
    }

    fn query<I, S>(&self, args: I) -> Result<crate::command::GitRun, GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        self.git.query(&self.root, args)
    }

    pub(crate) fn log_info(&self, line: &str) {
        self.log.info(line);
    }

    pub fn head_sha(&self) -> Result<String, GitError> {
        Ok(self.run(["rev-parse", "HEAD"])?.line().to_string())
    }

    /// Current branch name, empty for detached HEAD. Works on repositories
    /// without commits (reports the unborn branch).
    pub fn current_branch(&self) -> Result<String, GitError> {
        Ok(self.run(["branch", "--show-current"])?.line().to_string())
    }

    pub fn is_main_branch(&self) -> Result<bool, GitError> {
        let branch = self.current_branch()?;
        Ok(branch == "main" || branch == "master")
    }

    /// Detected default branch: `origin/HEAD` when set, else the first
    /// existing of main/master/trunk/develop, else "master".
    pub fn default_branch(&self) -> String {
        if let Ok(head) = self.query(["symbolic-ref", "refs/remotes/origin/HEAD"]) {
            if head.ok() {
                let name = head.line().trim_start_matches("refs/remotes/origin/");
                if !name.is_empty() {
                    return name.to_string();
                }
            }
        }

        for candidate in ["main", "master", "trunk", "develop"] {
            if self.branch_exists(candidate) {
                return candidate.to_string();
            }
        }
        "master".to_string()
    }

    pub fn has_commits(&self) -> Result<bool, GitError> {
        Ok(self
            .query(["rev-parse", "--verify", "--quiet", "HEAD"])?
            .ok())
    }

    /// Ensure the repository has at least one commit, calling `prompt` when
    /// empty. Creates an empty initial commit when the prompt accepts.
    pub fn ensure_has_commits(&self, prompt: impl FnOnce() -> bool) -> Result<(), GitError> {
        if self.has_commits()? {
            return Ok(());
        }
        if !prompt() {
            return Err(GitError::NoCommits);
        }
        self.run(["commit", "--allow-empty", "-m", "initial commit"])?;
        Ok(())
    }

    pub fn branch_exists(&self, name: &str) -> bool {
        self.query(["show-ref", "--verify", "--quiet", &format!("refs/heads/{name}")])
            .map(|run| run.ok())
            .unwrap_or(false)
    }

    pub fn create_branch(&self, name: &str) -> Result<(), GitError> {
        self.run(["checkout", "-b", name])?;
        Ok(())
    }

    pub fn checkout_branch(&self, name: &str) -> Result<(), GitError> {
        self.run(["checkout", name])?;
        Ok(())
    }

    /// Paths (relative to root) with uncommitted changes, staged or not.
    fn dirty_paths(&self) -> Result<Vec<String>, GitError> {
        let output = self.run(["status", "--porcelain", "--untracked-files=all"])?;
        let mut paths = Vec::new();
        for line in output.stdout.lines() {
            if line.len() < 4 {
                continue;
            }
            let path = &line[3..];
            // rename entries read "old -> new"; the new path is what is dirty
            let path = path.rsplit(" -> ").next().unwrap_or(path);
            paths.push(path.trim_matches('"').to_string());
        }
        Ok(paths)
    }

    /// Path of `file` relative to the repository root.
    fn rel_to_root(&self, file: &Path) -> Result<PathBuf, GitError> {
        let abs = if file.is_absolute() {
            file.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|source| GitError::FileIo {
                    path: file.to_path_buf(),
                    source,
                })?
                .join(file)
        };
        let abs = abs.canonicalize().unwrap_or(abs);
        abs.strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .map_err(|_| GitError::OutsideRepository {
                path: file.to_path_buf(),
                root: self.root.clone(),
            })
    }

    pub fn file_has_changes(&self, file: &Path) -> Result<bool, GitError> {
        let rel = self.rel_to_root(file)?;
        Ok(self
            .dirty_paths()?
            .iter()
            .any(|dirty| Path::new(dirty) == rel))
    }

    pub fn has_changes_other_than(&self, file: &Path) -> Result<bool, GitError> {
        let rel = self.rel_to_root(file)?;
        Ok(self
            .dirty_paths()?
            .iter()
            .any(|dirty| Path::new(dirty) != rel))
    }

    pub fn is_ignored(&self, probe: &str) -> Result<bool, GitError> {
        Ok(self.query(["check-ignore", "-q", probe])?.ok())
    }

    pub fn add(&self, file: &Path) -> Result<(), GitError> {
        self.run([
            std::ffi::OsStr::new("add"),
            std::ffi::OsStr::new("--"),
            file.as_os_str(),
        ])?;
        Ok(())
    }

    pub fn commit(&self, message: &str) -> Result<(), GitError> {
        self.run(["commit", "-m", message])?;
        Ok(())
    }

    /// Commit only the listed paths, leaving the rest of the index alone.
    pub fn commit_paths(&self, message: &str, paths: &[&Path]) -> Result<(), GitError> {
        let mut args: Vec<std::ffi::OsString> = vec!["commit".into(), "-m".into(), message.into()];
        args.push("--".into());
        for path in paths {
            args.push(path.as_os_str().to_os_string());
        }
        self.run(args)?;
        Ok(())
    }

    /// Validate repository state for plan branch/worktree creation. Returns
    /// the derived branch name plus whether the plan file itself is dirty.
    /// With `require_main` false, returns None when already on a feature
    /// branch (the caller skips branch creation).
    pub(crate) fn prepare_plan_branch(
        &self,
        plan: &Path,
        require_main: bool,
    ) -> Result<Option<(String, bool)>, GitError> {
        let current = self.current_branch()?;
        if current != "main" && current != "master" {
            if require_main {
                return Err(GitError::DirtyWorkTree {
                    message: format!(
                        "worktree creation requires main/master branch, currently on {current:?}"
                    ),
                });
            }
            return Ok(None);
        }

        let branch = extract_branch_name(plan);

        if self.has_changes_other_than(plan)? {
            if require_main {
                return Err(GitError::DirtyWorkTree {
                    message: "cannot create worktree: working tree has uncommitted changes other \
                              than the plan file"
                        .to_string(),
                });
            }
            return Err(GitError::DirtyWorkTree {
                message: format!(
                    "cannot create branch {branch:?}: working tree has uncommitted changes\n\n\
                     a feature branch from {current} is needed to isolate plan work.\n\n\
                     options:\n\
                     \x20 git stash && ralphex {plan} && git stash pop   # stash changes temporarily\n\
                     \x20 git commit -am \"wip\"                          # commit changes first\n\
                     \x20 ralphex --review                              # skip branch creation (review-only mode)",
                    plan = plan.display(),
                ),
            });
        }

        let plan_dirty = self.file_has_changes(plan)?;
        Ok(Some((branch, plan_dirty)))
    }

    /// Create or switch to the feature branch for a plan. No-op when already
    /// on a feature branch. Auto-commits the plan file iff it was the only
    /// dirty file.
    pub fn create_branch_for_plan(&self, plan: &Path) -> Result<(), GitError> {
        let Some((branch, plan_dirty)) = self.prepare_plan_branch(plan, false)? else {
            return Ok(());
        };

        if self.branch_exists(&branch) {
            self.log_info(&format!("switching to existing branch: {branch}"));
            self.checkout_branch(&branch)?;
        } else {
            self.log_info(&format!("creating branch: {branch}"));
            self.create_branch(&branch)?;
        }

        if plan_dirty {
            self.log_info(&format!(
                "committing plan file: {}",
                plan.file_name().unwrap_or_default().to_string_lossy()
            ));
            self.add(plan)?;
            self.commit(&format!("add plan: {branch}"))?;
        }

        Ok(())
    }

    /// Move a plan into the `completed/` sibling directory and commit the
    /// move. Uses `git mv` with a filesystem-rename fallback for untracked
    /// files. No-op when the plan was already moved.
    pub fn move_plan_to_completed(&self, plan: &Path) -> Result<(), GitError> {
        let completed_dir = plan
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("completed");
        std::fs::create_dir_all(&completed_dir).map_err(|source| GitError::FileIo {
            path: completed_dir.clone(),
            source,
        })?;

        let file_name = plan.file_name().unwrap_or_default();
        let dest = completed_dir.join(file_name);

        if !plan.exists() && dest.exists() {
            self.log_info("plan already in completed/");
            return Ok(());
        }

        let mv = self.run([
            std::ffi::OsStr::new("mv"),
            plan.as_os_str(),
            dest.as_os_str(),
        ]);
        if mv.is_err() {
            std::fs::rename(plan, &dest).map_err(|source| GitError::FileIo {
                path: plan.to_path_buf(),
                source,
            })?;
            if let Err(err) = self.add(&dest) {
                self.log_info(&format!("warning: failed to stage moved plan: {err}"));
            }
        }

        self.commit(&format!(
            "move completed plan: {}",
            file_name.to_string_lossy()
        ))?;
        self.log_info(&format!("moved plan to {}", dest.display()));
        Ok(())
    }

    /// Change statistics between `base` and HEAD. Zero when the base ref
    /// does not exist or equals HEAD.
    pub fn diff_stats(&self, base: &str) -> Result<DiffStats, GitError> {
        let base_exists = self
            .query(["rev-parse", "--verify", "--quiet", &format!("{base}^{{commit}}")])?
            .ok();
        if !base_exists {
            return Ok(DiffStats::default());
        }

        let output = self.run(["diff", "--numstat", &format!("{base}...HEAD")])?;
        let mut stats = DiffStats::default();
        for line in output.stdout.lines() {
            let mut parts = line.split_whitespace();
            let (Some(adds), Some(dels)) = (parts.next(), parts.next()) else {
                continue;
            };
            stats.files += 1;
            // binary files report "-" for both counts
            stats.additions += adds.parse::<u64>().unwrap_or(0);
            stats.deletions += dels.parse::<u64>().unwrap_or(0);
        }
        Ok(stats)
    }

    /// Append `pattern` to `.gitignore` unless `probe` is already ignored.
    /// Repeated calls with the same pattern produce one entry.
    pub fn ensure_ignored(&self, pattern: &str, probe: &str) -> Result<(), GitError> {
        match self.is_ignored(probe) {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(err) => {
                self.log_info(&format!(
                    "warning: checking gitignore: {err}, adding pattern anyway"
                ));
            }
        }

        let gitignore = self.root.join(".gitignore");
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&gitignore)
            .map_err(|source| GitError::FileIo {
                path: gitignore.clone(),
                source,
            })?;
        writeln!(file, "\n# ralphex runtime data\n{pattern}").map_err(|source| GitError::FileIo {
            path: gitignore,
            source,
        })?;

        self.log_info(&format!("added {pattern} to .gitignore"));
        Ok(())
    }

    /// Commit `.gitignore` when dirty. Never sweeps other staged files.
    pub fn commit_ignore_changes(&self) -> Result<(), GitError> {
        if !self.file_has_changes(&self.root.join(".gitignore"))? {
            return Ok(());
        }
        let gitignore = self.root.join(".gitignore");
        self.add(&gitignore)?;
        self.commit_paths("add ralphex entries to .gitignore", &[Path::new(".gitignore")])?;
        self.log_info("committed .gitignore changes");
        Ok(())
    }
}
