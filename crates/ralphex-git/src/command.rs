use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::GitError;

/// Outcome of one git invocation. Output is captured lossily: git can emit
/// non-UTF-8 path bytes in porcelain output, and a replacement character in
/// a log line beats failing the run over it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitRun {
    /// Rendered command line, for error messages and logs.
    pub command: String,
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl GitRun {
    /// Success predicate for probe-style queries (`check-ignore`,
    /// `show-ref --verify`, `rev-parse --verify`), where a non-zero exit is
    /// an answer rather than a failure.
    pub fn ok(&self) -> bool {
        self.status == Some(0)
    }

    /// Trimmed stdout, for the single-line answers most plumbing commands
    /// produce (`rev-parse`, `branch --show-current`, `symbolic-ref`).
    pub fn line(&self) -> &str {
        self.stdout.trim()
    }

    fn expect_ok(self) -> Result<Self, GitError> {
        if self.ok() {
            return Ok(self);
        }
        Err(GitError::CommandFailed {
            command: self.command,
            status: self.status,
            stdout: self.stdout,
            stderr: self.stderr,
        })
    }
}

/// Wrapper over the `git` binary. `run` demands success; `query` treats the
/// exit status as part of the answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitCli {
    pub binary: PathBuf,
}

impl Default for GitCli {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("git"),
        }
    }
}

impl GitCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Run a command that must succeed; a non-zero exit becomes
    /// [`GitError::CommandFailed`] carrying the captured output.
    pub fn run<I, S>(&self, cwd: &Path, args: I) -> Result<GitRun, GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.query(cwd, args)?.expect_ok()
    }

    /// Run a probe-style command where the exit status is an answer. Only
    /// failing to start the process is an error.
    pub fn query<I, S>(&self, cwd: &Path, args: I) -> Result<GitRun, GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<OsString> = args
            .into_iter()
            .map(|arg| arg.as_ref().to_os_string())
            .collect();

        let command = std::iter::once(self.binary.as_os_str())
            .chain(args.iter().map(OsString::as_os_str))
            .map(|part| part.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ");

        let output = Command::new(&self.binary)
            .current_dir(cwd)
            .args(&args)
            .output()
            .map_err(|source| GitError::Io {
                command: command.clone(),
                source,
            })?;

        Ok(GitRun {
            command,
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::GitCli;
    use crate::error::GitError;

    fn unique_temp_dir(prefix: &str) -> PathBuf {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("ralphex-git-cmd-{prefix}-{now}"));
        fs::create_dir_all(&path).expect("create temp dir");
        path
    }

    #[test]
    fn run_returns_captured_output_for_successful_command() {
        let git = GitCli::default();
        let cwd = unique_temp_dir("ok");

        let run = git.run(&cwd, ["--version"]).expect("git --version");
        assert!(run.ok());
        assert!(run.line().to_ascii_lowercase().contains("git version"));
        assert_eq!(run.command, "git --version");

        let _ = fs::remove_dir_all(cwd);
    }

    #[test]
    fn run_turns_non_zero_exit_into_command_failed() {
        let git = GitCli::default();
        let cwd = unique_temp_dir("fail");

        let err = git
            .run(&cwd, ["definitely-not-a-real-git-subcommand"])
            .expect_err("unknown subcommand should fail");
        match err {
            GitError::CommandFailed {
                command, status, ..
            } => {
                assert!(command.contains("definitely-not-a-real-git-subcommand"));
                assert!(status.is_some());
            }
            other => panic!("expected CommandFailed, got {other:?}"),
        }

        let _ = fs::remove_dir_all(cwd);
    }

    #[test]
    fn missing_binary_is_an_io_error_from_both_entry_points() {
        let git = GitCli::new("/definitely/missing/git-binary");
        let cwd = unique_temp_dir("io");

        for result in [git.run(&cwd, ["status"]), git.query(&cwd, ["status"])] {
            match result.expect_err("missing binary") {
                GitError::Io { command, source } => {
                    assert!(command.contains("/definitely/missing/git-binary"));
                    assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
                }
                other => panic!("expected Io, got {other:?}"),
            }
        }

        let _ = fs::remove_dir_all(cwd);
    }

    #[test]
    fn query_reports_exit_status_as_an_answer() {
        let git = GitCli::default();
        let cwd = unique_temp_dir("query");
        git.run(&cwd, ["init"]).expect("git init");

        let run = git
            .query(&cwd, ["check-ignore", "-q", "some/file"])
            .expect("probe check-ignore");
        assert!(!run.ok());
        assert_eq!(run.status, Some(1));

        let _ = fs::remove_dir_all(cwd);
    }
}
