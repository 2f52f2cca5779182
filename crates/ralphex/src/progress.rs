use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::Local;
use ralphex_core::{Phase, PhaseHolder};

/// Logging surface the runner writes through. The plain progress logger and
/// the broadcasting wrapper both implement it.
pub trait RunnerLog: Send + Sync {
    fn set_phase(&self, phase: Phase);
    fn print(&self, message: &str);
    /// Verbatim text, typically agent output lines that already end in `\n`.
    fn print_raw(&self, text: &str);
    fn print_section(&self, label: &str);
    fn print_aligned(&self, line: &str);
    fn log_diff_stats(&self, files: u64, additions: u64, deletions: u64);
    fn path(&self) -> &Path;
    /// Hooks for task-boundary events; only the broadcasting wrapper cares.
    fn task_started(&self, _position: usize) {}
    fn task_ended(&self, _position: usize) {}
}

#[derive(Debug, Clone)]
pub struct ProgressConfig {
    pub repo_root: PathBuf,
    pub plan_file: Option<PathBuf>,
    pub plan_description: Option<String>,
    pub mode: String,
    pub branch: String,
    pub no_color: bool,
}

/// Per-run progress log under `<repo>/.ralphex/progress/`, echoed to the
/// terminal. All writes go through one lock; close is idempotent and writes
/// a trailing elapsed summary.
pub struct ProgressLogger {
    file: Mutex<Option<File>>,
    path: PathBuf,
    started: Instant,
    holder: PhaseHolder,
    no_color: bool,
}

pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs >= 3600 {
        format!("{}h{:02}m{:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else {
        format!("{}m{:02}s", secs / 60, secs % 60)
    }
}

impl ProgressLogger {
    pub fn open(cfg: ProgressConfig, holder: PhaseHolder) -> io::Result<Self> {
        let dir = cfg.repo_root.join(".ralphex").join("progress");
        fs::create_dir_all(&dir)?;
        // the path must survive a later chdir into a worktree
        let dir = dir.canonicalize()?;

        let stamp = Local::now().format("%Y%m%d-%H%M%S");
        let nonce = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos() & 0xffff)
            .unwrap_or(0);
        let path = dir.join(format!("progress-{stamp}-{nonce:04x}.txt"));

        let mut file = File::create(&path)?;
        let subject = match (&cfg.plan_file, &cfg.plan_description) {
            (Some(plan), _) => plan.display().to_string(),
            (None, Some(description)) => description.clone(),
            (None, None) => "(none)".to_string(),
        };
        writeln!(file, "plan: {subject}")?;
        writeln!(file, "mode: {}", cfg.mode)?;
        writeln!(file, "branch: {}", cfg.branch)?;
        writeln!(file, "started: {}", Local::now().to_rfc3339())?;
        writeln!(file)?;

        Ok(Self {
            file: Mutex::new(Some(file)),
            path,
            started: Instant::now(),
            holder,
            no_color: cfg.no_color,
        })
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn phase(&self) -> Phase {
        self.holder.get()
    }

    /// Close the log, appending the elapsed summary. Safe to call twice.
    pub fn close(&self) {
        let mut guard = self.file.lock().expect("progress lock");
        if let Some(mut file) = guard.take() {
            let _ = writeln!(file, "\nelapsed: {}", format_elapsed(self.elapsed()));
            let _ = file.flush();
        }
    }

    fn write_text(&self, file_text: &str, terminal_text: &str) {
        let mut guard = self.file.lock().expect("progress lock");
        if let Some(file) = guard.as_mut() {
            let _ = file.write_all(file_text.as_bytes());
            let _ = file.flush();
        }
        // echo while still holding the lock so file and terminal order agree
        print!("{terminal_text}");
        let _ = io::stdout().flush();
    }
}

impl RunnerLog for ProgressLogger {
    fn set_phase(&self, phase: Phase) {
        self.holder.set(phase);
    }

    fn print(&self, message: &str) {
        self.write_text(&format!("{message}\n"), &format!("{message}\n"));
    }

    fn print_raw(&self, text: &str) {
        self.write_text(text, text);
    }

    fn print_section(&self, label: &str) {
        let marker = format!("\n=== {label} ===\n");
        let terminal = if self.no_color {
            marker.clone()
        } else {
            format!("\n\x1b[1m=== {label} ===\x1b[0m\n")
        };
        self.write_text(&marker, &terminal);
    }

    fn print_aligned(&self, line: &str) {
        self.write_text(&format!("    {line}\n"), &format!("    {line}\n"));
    }

    fn log_diff_stats(&self, files: u64, additions: u64, deletions: u64) {
        self.print(&format!("changed {files} files, +{additions}/-{deletions}"));
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ProgressLogger {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use ralphex_core::{Phase, PhaseHolder};

    use super::{format_elapsed, ProgressConfig, ProgressLogger, RunnerLog};

    fn unique_temp_dir(prefix: &str) -> PathBuf {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("ralphex-progress-{prefix}-{now}"));
        fs::create_dir_all(&path).expect("create temp dir");
        path
    }

    fn mk_logger(root: &std::path::Path) -> ProgressLogger {
        ProgressLogger::open(
            ProgressConfig {
                repo_root: root.to_path_buf(),
                plan_file: Some(PathBuf::from("docs/plans/p.md")),
                plan_description: None,
                mode: "full".to_string(),
                branch: "p".to_string(),
                no_color: true,
            },
            PhaseHolder::new(),
        )
        .expect("open logger")
    }

    #[test]
    fn open_writes_header_and_absolute_path() {
        let root = unique_temp_dir("header");
        let logger = mk_logger(&root);

        assert!(logger.path().is_absolute());
        assert!(logger
            .path()
            .starts_with(root.canonicalize().expect("canonical root")));
        let name = logger
            .path()
            .file_name()
            .expect("file name")
            .to_string_lossy()
            .into_owned();
        assert!(name.starts_with("progress-"));
        assert!(name.ends_with(".txt"));

        let body = fs::read_to_string(logger.path()).expect("read log");
        assert!(body.contains("plan: docs/plans/p.md"));
        assert!(body.contains("mode: full"));
        assert!(body.contains("branch: p"));
        assert!(body.contains("started: "));

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn writes_sections_lines_and_stats_in_order() {
        let root = unique_temp_dir("order");
        let logger = mk_logger(&root);

        logger.print_section("task iteration 1");
        logger.print("starting work");
        logger.print_raw("agent output line\n");
        logger.print_aligned("aligned detail");
        logger.log_diff_stats(3, 20, 4);

        let body = fs::read_to_string(logger.path()).expect("read log");
        let section = body.find("=== task iteration 1 ===").expect("section");
        let line = body.find("starting work").expect("line");
        let raw = body.find("agent output line").expect("raw");
        let aligned = body.find("    aligned detail").expect("aligned");
        let stats = body.find("changed 3 files, +20/-4").expect("stats");
        assert!(section < line && line < raw && raw < aligned && aligned < stats);

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn close_is_idempotent_and_appends_elapsed() {
        let root = unique_temp_dir("close");
        let logger = mk_logger(&root);
        logger.print("one line");

        logger.close();
        logger.close();

        let body = fs::read_to_string(logger.path()).expect("read log");
        assert_eq!(body.matches("elapsed: ").count(), 1);

        // writes after close are dropped, not panics
        logger.print("after close");
        let body = fs::read_to_string(logger.path()).expect("read log");
        assert!(!body.contains("after close"));

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn set_phase_updates_the_shared_holder() {
        let root = unique_temp_dir("phase");
        let holder = PhaseHolder::new();
        let logger = ProgressLogger::open(
            ProgressConfig {
                repo_root: root.clone(),
                plan_file: None,
                plan_description: Some("build the thing".to_string()),
                mode: "plan-create".to_string(),
                branch: "master".to_string(),
                no_color: true,
            },
            holder.clone(),
        )
        .expect("open logger");

        logger.set_phase(Phase::PlanCreate);
        assert_eq!(holder.get(), Phase::PlanCreate);

        let body = fs::read_to_string(logger.path()).expect("read log");
        assert!(body.contains("plan: build the thing"));

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn elapsed_formatting() {
        assert_eq!(format_elapsed(Duration::from_secs(5)), "0m05s");
        assert_eq!(format_elapsed(Duration::from_secs(125)), "2m05s");
        assert_eq!(format_elapsed(Duration::from_secs(3725)), "1h02m05s");
    }
}
