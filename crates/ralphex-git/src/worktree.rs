use std::fs;
use std::path::{Path, PathBuf};

use ralphex_core::plan::extract_branch_name;

use crate::error::GitError;
use crate::service::GitService;

/// Repo-relative directory holding transient plan worktrees.
pub const WORKTREE_ROOT: &str = ".ralphex/worktrees";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeSetup {
    pub path: PathBuf,
    pub branch: String,
    /// True when the plan file was dirty in the main repo: the caller must
    /// commit the worktree copy so it lands on the feature branch.
    pub plan_needs_commit: bool,
}

impl GitService {
    pub fn worktree_path_for(&self, plan: &Path) -> PathBuf {
        self.root()
            .join(WORKTREE_ROOT)
            .join(extract_branch_name(plan))
    }

    /// Create an isolated worktree for plan execution. Must run from
    /// main/master. Refuses when the target directory already exists. A
    /// dirty plan file is copied into the worktree so the caller can commit
    /// it on the feature branch.
    pub fn create_worktree_for_plan(&self, plan: &Path) -> Result<WorktreeSetup, GitError> {
        // check existence before the dirty-tree validation: a leftover
        // worktree dir would itself show up as untracked and fail the check
        let wt_path = self.worktree_path_for(plan);

        self.prune_worktrees();

        if wt_path.exists() {
            return Err(GitError::WorktreeExists { path: wt_path });
        }

        let Some((branch, plan_needs_commit)) = self.prepare_plan_branch(plan, true)? else {
            unreachable!("require_main returns an error instead of None");
        };

        let parent = wt_path.parent().expect("worktree path has parent");
        fs::create_dir_all(parent).map_err(|source| GitError::FileIo {
            path: parent.to_path_buf(),
            source,
        })?;

        if self.branch_exists(&branch) {
            self.log_info(&format!("creating worktree with existing branch: {branch}"));
            self.run([
                std::ffi::OsStr::new("worktree"),
                std::ffi::OsStr::new("add"),
                wt_path.as_os_str(),
                std::ffi::OsStr::new(&branch),
            ])?;
        } else {
            self.log_info(&format!("creating worktree with new branch: {branch}"));
            self.run([
                std::ffi::OsStr::new("worktree"),
                std::ffi::OsStr::new("add"),
                std::ffi::OsStr::new("-b"),
                std::ffi::OsStr::new(&branch),
                wt_path.as_os_str(),
            ])?;
        }

        if plan_needs_commit {
            if let Err(err) = self.copy_into_worktree(plan, &wt_path) {
                let _ = self.remove_worktree(&wt_path);
                return Err(err);
            }
        }

        Ok(WorktreeSetup {
            path: wt_path,
            branch,
            plan_needs_commit,
        })
    }

    /// Stage and commit a plan file on the current branch. `main_root` is the
    /// main repository root, used to translate the plan's path into this
    /// worktree when the service operates inside one.
    pub fn commit_plan_file(&self, plan: &Path, main_root: &Path) -> Result<(), GitError> {
        let branch = extract_branch_name(plan);
        self.log_info(&format!(
            "committing plan file: {}",
            plan.file_name().unwrap_or_default().to_string_lossy()
        ));

        let abs = if plan.is_absolute() {
            plan.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|source| GitError::FileIo {
                    path: plan.to_path_buf(),
                    source,
                })?
                .join(plan)
        };
        let abs = abs.canonicalize().unwrap_or(abs);
        let rel = abs
            .strip_prefix(main_root)
            .map_err(|_| GitError::OutsideRepository {
                path: plan.to_path_buf(),
                root: main_root.to_path_buf(),
            })?;
        let local = self.root().join(rel);

        self.add(&local)?;
        self.commit(&format!("add plan: {branch}"))?;
        Ok(())
    }

    fn copy_into_worktree(&self, src: &Path, wt_path: &Path) -> Result<(), GitError> {
        let abs = if src.is_absolute() {
            src.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|source| GitError::FileIo {
                    path: src.to_path_buf(),
                    source,
                })?
                .join(src)
        };
        let abs = abs.canonicalize().unwrap_or(abs);
        let rel = abs
            .strip_prefix(self.root())
            .map_err(|_| GitError::OutsideRepository {
                path: src.to_path_buf(),
                root: self.root().to_path_buf(),
            })?;

        let dest = wt_path.join(rel);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|source| GitError::FileIo {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::copy(&abs, &dest).map_err(|source| GitError::FileIo {
            path: dest,
            source,
        })?;
        Ok(())
    }

    /// Remove a worktree. No-op when the directory is already gone.
    pub fn remove_worktree(&self, path: &Path) -> Result<(), GitError> {
        if !path.exists() {
            return Ok(());
        }
        self.run([
            std::ffi::OsStr::new("worktree"),
            std::ffi::OsStr::new("remove"),
            std::ffi::OsStr::new("--force"),
            path.as_os_str(),
        ])?;
        self.log_info(&format!("removed worktree: {}", path.display()));
        Ok(())
    }

    /// Drop stale worktree bookkeeping left by killed runs. Failures only
    /// warn; creation reports the real error if one remains.
    pub fn prune_worktrees(&self) {
        if let Err(err) = self.run(["worktree", "prune"]) {
            self.log_info(&format!("warning: prune worktrees: {err}"));
        }
    }
}
