use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("git command failed to start ({command}): {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("git command returned non-zero exit ({command}) status={status:?}: {stderr}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },
    #[error("path is not inside a git repository: {path}")]
    NotARepository { path: PathBuf },
    #[error("no commits - please create initial commit manually")]
    NoCommits,
    #[error("{message}")]
    DirtyWorkTree { message: String },
    #[error("worktree already exists at {path}, another instance may be running")]
    WorktreeExists { path: PathBuf },
    #[error("path {path} is outside the repository root {root}")]
    OutsideRepository { path: PathBuf, root: PathBuf },
    #[error("file operation failed on {path}: {source}")]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
