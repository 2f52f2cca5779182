use std::fs;
use std::io;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Task status derived from checkbox state. `Failed` is assigned by the
/// runner only, never by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Active,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkbox {
    pub text: String,
    pub checked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Integer from the `### Task N:` label, 0 when the label is not a
    /// non-negative integer (e.g. `2.5`, `2a`).
    pub number: u32,
    pub title: String,
    /// 0-based position in the heading order of the source document.
    pub index: usize,
    pub status: TaskStatus,
    pub checkboxes: Vec<Checkbox>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub title: String,
    pub tasks: Vec<Task>,
}

fn task_heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^###\s+(?:task|iteration)\s+([^:]+?):\s*(.+)$").expect("task heading regex")
    })
}

fn checkbox_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*-\s*\[([ xX])\]\s*(.*)$").expect("checkbox regex"))
}

fn date_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:\d{8}|\d{4}-\d{2}-\d{2})-").expect("date prefix regex"))
}

/// True for headings of level 3 or less (`#`, `##`, `###`), which terminate
/// the checkbox region of the preceding task.
fn is_section_boundary(line: &str) -> bool {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    (1..=3).contains(&hashes)
        && trimmed[hashes..]
            .chars()
            .next()
            .is_some_and(|c| c == ' ' || c == '\t')
}

/// Derive the status of a task from its checkboxes.
pub fn determine_status(checkboxes: &[Checkbox]) -> TaskStatus {
    if checkboxes.is_empty() {
        return TaskStatus::Pending;
    }
    let checked = checkboxes.iter().filter(|c| c.checked).count();
    if checked == 0 {
        TaskStatus::Pending
    } else if checked == checkboxes.len() {
        TaskStatus::Done
    } else {
        TaskStatus::Active
    }
}

/// Parse Markdown plan text into a structured plan.
///
/// Pure and infallible: malformed sections degrade (non-integer labels get
/// number 0, missing title stays empty) instead of failing. Checkboxes that
/// appear before the first task heading are discarded.
pub fn parse_plan(content: &str) -> Plan {
    let mut plan = Plan::default();
    let mut current: Option<Task> = None;

    for line in content.lines() {
        if plan.title.is_empty() && current.is_none() {
            if let Some(rest) = line.strip_prefix("# ") {
                plan.title = rest.trim().to_string();
                continue;
            }
        }

        if let Some(caps) = task_heading_re().captures(line) {
            if let Some(mut task) = current.take() {
                task.status = determine_status(&task.checkboxes);
                plan.tasks.push(task);
            }
            let label = caps[1].trim();
            let number = label.parse::<u32>().unwrap_or(0);
            current = Some(Task {
                number,
                title: caps[2].trim().to_string(),
                index: plan.tasks.len(),
                status: TaskStatus::Pending,
                checkboxes: Vec::new(),
            });
            continue;
        }

        if is_section_boundary(line) {
            if let Some(mut task) = current.take() {
                task.status = determine_status(&task.checkboxes);
                plan.tasks.push(task);
            }
            continue;
        }

        if let Some(task) = current.as_mut() {
            if let Some(caps) = checkbox_re().captures(line) {
                task.checkboxes.push(Checkbox {
                    text: caps[2].trim().to_string(),
                    checked: !caps[1].trim().is_empty(),
                });
            }
        }
    }

    if let Some(mut task) = current.take() {
        task.status = determine_status(&task.checkboxes);
        plan.tasks.push(task);
    }

    plan
}

/// Read and parse a plan file. Fails only on I/O.
pub fn parse_plan_file(path: impl AsRef<Path>) -> io::Result<Plan> {
    let content = fs::read_to_string(path)?;
    Ok(parse_plan(&content))
}

impl Plan {
    /// 1-based array index of the first task whose status is not done, or 0
    /// when every task is complete (or the plan has no tasks).
    pub fn next_pending_position(&self) -> usize {
        self.tasks
            .iter()
            .position(|t| t.status != TaskStatus::Done)
            .map_or(0, |i| i + 1)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Derive a branch name from a plan file path: basename minus a leading
/// `YYYYMMDD-` / `YYYY-MM-DD-` date prefix and the `.md` suffix.
pub fn extract_branch_name(path: impl AsRef<Path>) -> String {
    let base = path
        .as_ref()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let base = base.strip_suffix(".md").unwrap_or(&base);
    date_prefix_re().replace(base, "").into_owned()
}
