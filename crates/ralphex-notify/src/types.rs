use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Failure,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// Terminal report of one run, delivered to every configured sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub status: RunStatus,
    pub mode: String,
    pub plan_file: Option<PathBuf>,
    pub branch: String,
    pub duration: Duration,
    pub files: u64,
    pub additions: u64,
    pub deletions: u64,
    pub error: Option<String>,
}

impl RunReport {
    /// One-line human summary used as the notification title.
    pub fn summary(&self) -> String {
        let plan = self
            .plan_file
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "(no plan)".to_string());
        let secs = self.duration.as_secs();
        let elapsed = format!("{}m{:02}s", secs / 60, secs % 60);
        match self.status {
            RunStatus::Success => {
                format!(
                    "ralphex {}: {} on {} completed in {} ({} files, +{}/-{})",
                    self.mode, plan, self.branch, elapsed, self.files, self.additions, self.deletions
                )
            }
            RunStatus::Failure => format!(
                "ralphex {}: {} on {} failed after {}: {}",
                self.mode,
                plan,
                self.branch,
                elapsed,
                self.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{RunReport, RunStatus};

    fn report(status: RunStatus) -> RunReport {
        RunReport {
            status,
            mode: "full".to_string(),
            plan_file: Some("docs/plans/p.md".into()),
            branch: "p".to_string(),
            duration: Duration::from_secs(125),
            files: 3,
            additions: 40,
            deletions: 7,
            error: Some("runner: max iterations".to_string()),
        }
    }

    #[test]
    fn success_summary_includes_stats_and_elapsed() {
        let summary = report(RunStatus::Success).summary();
        assert!(summary.contains("p.md"));
        assert!(summary.contains("2m05s"));
        assert!(summary.contains("3 files"));
        assert!(summary.contains("+40/-7"));
    }

    #[test]
    fn failure_summary_includes_error() {
        let summary = report(RunStatus::Failure).summary();
        assert!(summary.contains("failed"));
        assert!(summary.contains("max iterations"));
    }

    #[test]
    fn missing_plan_renders_placeholder() {
        let mut r = report(RunStatus::Success);
        r.plan_file = None;
        assert!(r.summary().contains("(no plan)"));
    }
}
