pub mod command;
pub mod error;
pub mod service;
pub mod worktree;

pub use command::{GitCli, GitRun};
pub use error::GitError;
pub use service::{DiffStats, GitLogger, GitService, StderrGitLog};
pub use worktree::{WorktreeSetup, WORKTREE_ROOT};
