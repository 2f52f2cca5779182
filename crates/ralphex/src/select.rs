use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

#[derive(Debug, thiserror::Error)]
pub enum SelectError {
    #[error("no plan files found in {dir}")]
    NoPlans { dir: PathBuf },
    #[error("plan file not found: {path}")]
    Missing { path: PathBuf },
    #[error("plan selection cancelled")]
    Cancelled,
    #[error("invalid selection: {input}")]
    InvalidChoice { input: String },
    #[error("failed to read plans directory {dir}: {source}")]
    Io {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read selection: {source}")]
    Input {
        #[source]
        source: std::io::Error,
    },
}

/// Picks a plan from the plans directory: explicit path wins, a single
/// candidate auto-selects, several candidates get a numbered stdin prompt.
pub struct PlanSelector {
    plans_dir: PathBuf,
}

impl PlanSelector {
    pub fn new(plans_dir: impl Into<PathBuf>) -> Self {
        Self {
            plans_dir: plans_dir.into(),
        }
    }

    pub fn select(
        &self,
        explicit: Option<&Path>,
        optional: bool,
        stdin: &mut impl BufRead,
        stdout: &mut impl Write,
    ) -> Result<Option<PathBuf>, SelectError> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(SelectError::Missing {
                    path: path.to_path_buf(),
                });
            }
            let abs = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
            return Ok(Some(abs));
        }

        let plans = self.list_plans()?;
        if plans.is_empty() {
            if optional {
                return Ok(None);
            }
            return Err(SelectError::NoPlans {
                dir: self.plans_dir.clone(),
            });
        }
        if plans.len() == 1 {
            return Ok(Some(plans.into_iter().next().expect("one plan")));
        }

        writeln!(stdout, "select a plan:").map_err(|source| SelectError::Input { source })?;
        for (i, plan) in plans.iter().enumerate() {
            writeln!(
                stdout,
                "  {}. {}",
                i + 1,
                plan.file_name().unwrap_or_default().to_string_lossy()
            )
            .map_err(|source| SelectError::Input { source })?;
        }
        write!(stdout, "> ").map_err(|source| SelectError::Input { source })?;
        stdout.flush().map_err(|source| SelectError::Input { source })?;

        let mut answer = String::new();
        stdin
            .read_line(&mut answer)
            .map_err(|source| SelectError::Input { source })?;
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(SelectError::Cancelled);
        }
        let choice: usize = answer.parse().map_err(|_| SelectError::InvalidChoice {
            input: answer.to_string(),
        })?;
        plans
            .get(choice.wrapping_sub(1))
            .cloned()
            .map(Some)
            .ok_or(SelectError::InvalidChoice {
                input: answer.to_string(),
            })
    }

    /// Plan files (`*.md`) directly in the plans directory, newest first.
    /// The `completed/` subdirectory is never scanned. A missing directory
    /// just means there are no plans.
    pub fn list_plans(&self) -> Result<Vec<PathBuf>, SelectError> {
        let entries = match fs::read_dir(&self.plans_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(SelectError::Io {
                    dir: self.plans_dir.clone(),
                    source,
                })
            }
        };

        let mut plans: Vec<(PathBuf, SystemTime)> = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            plans.push((path, modified));
        }
        plans.sort_by(|a, b| b.1.cmp(&a.1));
        Ok(plans.into_iter().map(|(path, _)| path).collect())
    }

    /// Newest plan created or modified at/after `since`. Used after
    /// interactive plan creation to find what the agent wrote.
    pub fn find_recent(&self, since: SystemTime) -> Option<PathBuf> {
        let plans = self.list_plans().ok()?;
        plans.into_iter().find(|plan| {
            fs::metadata(plan)
                .and_then(|m| m.modified())
                .map(|modified| modified >= since)
                .unwrap_or(false)
        })
    }
}

/// Plain y/n prompt on the given streams. Anything but y/yes declines.
pub fn ask_yes_no(question: &str, stdin: &mut impl BufRead, stdout: &mut impl Write) -> bool {
    if write!(stdout, "{question} [y/N] ").and_then(|()| stdout.flush()).is_err() {
        return false;
    }
    let mut answer = String::new();
    if stdin.read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Cursor;
    use std::time::{Duration, SystemTime};

    use super::{ask_yes_no, PlanSelector, SelectError};
    use crate::test_support::unique_temp_dir;

    #[test]
    fn explicit_path_wins_and_must_exist() {
        let dir = unique_temp_dir("explicit");
        let plan = dir.join("p.md");
        fs::write(&plan, "# Plan\n").expect("write plan");

        let selector = PlanSelector::new(dir.join("plans"));
        let mut stdin = Cursor::new(Vec::new());
        let mut stdout = Vec::new();

        let selected = selector
            .select(Some(&plan), false, &mut stdin, &mut stdout)
            .expect("select explicit")
            .expect("some plan");
        assert!(selected.is_absolute());
        assert!(selected.ends_with("p.md"));

        let err = selector
            .select(Some(&dir.join("missing.md")), false, &mut stdin, &mut stdout)
            .expect_err("missing explicit plan");
        assert!(matches!(err, SelectError::Missing { .. }));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn empty_plans_dir_errors_unless_optional() {
        let dir = unique_temp_dir("empty");
        let selector = PlanSelector::new(&dir);
        let mut stdin = Cursor::new(Vec::new());
        let mut stdout = Vec::new();

        let err = selector
            .select(None, false, &mut stdin, &mut stdout)
            .expect_err("no plans");
        assert!(matches!(err, SelectError::NoPlans { .. }));

        let selected = selector
            .select(None, true, &mut stdin, &mut stdout)
            .expect("optional select");
        assert!(selected.is_none());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_plans_dir_counts_as_empty() {
        let selector = PlanSelector::new("/nonexistent/plans/dir");
        let mut stdin = Cursor::new(Vec::new());
        let mut stdout = Vec::new();
        let err = selector
            .select(None, false, &mut stdin, &mut stdout)
            .expect_err("no plans");
        assert!(matches!(err, SelectError::NoPlans { .. }));
    }

    #[test]
    fn single_candidate_auto_selects() {
        let dir = unique_temp_dir("single");
        fs::write(dir.join("only.md"), "# Plan\n").expect("write plan");
        fs::write(dir.join("notes.txt"), "not a plan\n").expect("write note");
        fs::create_dir_all(dir.join("completed")).expect("completed dir");
        fs::write(dir.join("completed/old.md"), "# Old\n").expect("write archived plan");

        let selector = PlanSelector::new(&dir);
        let mut stdin = Cursor::new(Vec::new());
        let mut stdout = Vec::new();

        let selected = selector
            .select(None, false, &mut stdin, &mut stdout)
            .expect("select")
            .expect("some plan");
        assert!(selected.ends_with("only.md"));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn multiple_candidates_use_the_numbered_prompt() {
        let dir = unique_temp_dir("multi");
        fs::write(dir.join("a.md"), "# A\n").expect("write a");
        fs::write(dir.join("b.md"), "# B\n").expect("write b");

        let selector = PlanSelector::new(&dir);
        let mut stdout = Vec::new();

        let mut stdin = Cursor::new(b"2\n".to_vec());
        let selected = selector
            .select(None, false, &mut stdin, &mut stdout)
            .expect("select")
            .expect("some plan");
        let listing = String::from_utf8(stdout).expect("utf-8");
        assert!(listing.contains("1."));
        assert!(listing.contains("2."));
        assert!(selected.extension().and_then(|e| e.to_str()) == Some("md"));

        // empty answer cancels, garbage is rejected
        let mut stdin = Cursor::new(b"\n".to_vec());
        let err = selector
            .select(None, false, &mut stdin, &mut Vec::new())
            .expect_err("cancelled");
        assert!(matches!(err, SelectError::Cancelled));

        let mut stdin = Cursor::new(b"nope\n".to_vec());
        let err = selector
            .select(None, false, &mut stdin, &mut Vec::new())
            .expect_err("invalid");
        assert!(matches!(err, SelectError::InvalidChoice { .. }));

        let mut stdin = Cursor::new(b"9\n".to_vec());
        let err = selector
            .select(None, false, &mut stdin, &mut Vec::new())
            .expect_err("out of range");
        assert!(matches!(err, SelectError::InvalidChoice { .. }));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn find_recent_ignores_older_plans() {
        let dir = unique_temp_dir("recent");
        fs::write(dir.join("fresh.md"), "# Fresh\n").expect("write plan");

        let selector = PlanSelector::new(&dir);
        let long_ago = SystemTime::now() - Duration::from_secs(3600);
        let future = SystemTime::now() + Duration::from_secs(3600);

        let found = selector.find_recent(long_ago).expect("recent plan");
        assert!(found.ends_with("fresh.md"));
        assert!(selector.find_recent(future).is_none());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn ask_yes_no_accepts_only_affirmatives() {
        for (input, expected) in [("y\n", true), ("yes\n", true), ("Y\n", true), ("n\n", false), ("\n", false), ("maybe\n", false)] {
            let mut stdin = Cursor::new(input.as_bytes().to_vec());
            let mut stdout = Vec::new();
            assert_eq!(
                ask_yes_no("continue?", &mut stdin, &mut stdout),
                expected,
                "input {input:?}"
            );
            assert!(String::from_utf8(stdout).expect("utf-8").contains("continue?"));
        }
    }
}
