use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Embedded default prompt templates. Config overrides replace them wholesale.
pub const DEFAULT_TASK_PROMPT: &str = include_str!("prompts/task.md");
pub const DEFAULT_REVIEW_FIRST_PROMPT: &str = include_str!("prompts/review_first.md");
pub const DEFAULT_REVIEW_SECOND_PROMPT: &str = include_str!("prompts/review_second.md");
pub const DEFAULT_EXTERNAL_REVIEW_PROMPT: &str = include_str!("prompts/external_review.md");
pub const DEFAULT_EXTERNAL_EVAL_PROMPT: &str = include_str!("prompts/external_eval.md");
pub const DEFAULT_FINALIZE_PROMPT: &str = include_str!("prompts/finalize.md");
pub const DEFAULT_PLAN_CREATE_PROMPT: &str = include_str!("prompts/plan_create.md");

const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize config: {source}")]
    Serialize {
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read confirmation: {source}")]
    Input {
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalConfig {
    pub command: String,
    pub model: String,
    pub reasoning_effort: String,
    pub sandbox: String,
    pub stream_idle_timeout_ms: u64,
    /// Size of the startup header window the output filter whitelists.
    pub header_lines: usize,
    pub project_doc: Option<PathBuf>,
}

impl Default for ExternalConfig {
    fn default() -> Self {
        Self {
            command: "codex".to_string(),
            model: "gpt-5.2-codex".to_string(),
            reasoning_effort: "xhigh".to_string(),
            sandbox: "read-only".to_string(),
            stream_idle_timeout_ms: 3_600_000,
            header_lines: 20,
            project_doc: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptOverrides {
    pub task: Option<String>,
    pub review_first: Option<String>,
    pub review_second: Option<String>,
    pub external_review: Option<String>,
    pub external_eval: Option<String>,
    pub finalize: Option<String>,
    pub plan_create: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomAgent {
    pub name: String,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub webhook_url: Option<String>,
    pub slack_webhook_url: Option<String>,
    pub slack_channel: Option<String>,
    pub timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            slack_webhook_url: None,
            slack_channel: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub claude_command: String,
    pub claude_args: Vec<String>,
    /// Overrides detected default branch when non-empty.
    pub default_branch: String,
    pub plans_dir: PathBuf,
    pub iteration_delay_ms: u64,
    pub task_retry_count: u32,
    pub external_enabled: bool,
    pub finalize_enabled: bool,
    pub worktree_enabled: bool,
    pub watch_dirs: Vec<PathBuf>,
    pub external: ExternalConfig,
    pub prompts: PromptOverrides,
    pub agents: Vec<CustomAgent>,
    pub notify: NotifyConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            claude_command: "claude".to_string(),
            claude_args: vec!["-p".to_string()],
            default_branch: String::new(),
            plans_dir: PathBuf::from("docs/plans"),
            iteration_delay_ms: 100,
            task_retry_count: 1,
            external_enabled: true,
            finalize_enabled: true,
            worktree_enabled: false,
            watch_dirs: Vec::new(),
            external: ExternalConfig::default(),
            prompts: PromptOverrides::default(),
            agents: default_agents(),
            notify: NotifyConfig::default(),
        }
    }
}

fn default_agents() -> Vec<CustomAgent> {
    vec![
        CustomAgent {
            name: "review-quality".to_string(),
            prompt: "Review the branch changes (git diff master...HEAD) for code quality and \
                     security issues: injection risks, leaked secrets, unchecked errors, race \
                     conditions, resource leaks. Reference every finding as file:line."
                .to_string(),
        },
        CustomAgent {
            name: "review-implementation".to_string(),
            prompt: "Review the branch changes and verify the implementation achieves the stated \
                     goal: {{GOAL}}. Flag incomplete items, behavior that diverges from the plan, \
                     and dead code added by the changes. Reference findings as file:line."
                .to_string(),
        },
        CustomAgent {
            name: "review-testing".to_string(),
            prompt: "Review the branch changes for test coverage: new behavior without tests, \
                     tests that assert nothing, and edge cases left uncovered. Reference findings \
                     as file:line."
                .to_string(),
        },
        CustomAgent {
            name: "review-consistency".to_string(),
            prompt: "Review the branch changes for consistency with the surrounding codebase: \
                     naming, error handling style, module placement, and duplicated logic that \
                     existing helpers already cover."
                .to_string(),
        },
        CustomAgent {
            name: "review-simplicity".to_string(),
            prompt: "Review the branch changes for unnecessary complexity: over-abstracted \
                     interfaces, speculative configuration, and code paths nothing exercises."
                .to_string(),
        },
    ]
}

impl AppConfig {
    pub fn task_prompt(&self) -> &str {
        self.prompts.task.as_deref().unwrap_or(DEFAULT_TASK_PROMPT)
    }

    pub fn review_first_prompt(&self) -> &str {
        self.prompts
            .review_first
            .as_deref()
            .unwrap_or(DEFAULT_REVIEW_FIRST_PROMPT)
    }

    pub fn review_second_prompt(&self) -> &str {
        self.prompts
            .review_second
            .as_deref()
            .unwrap_or(DEFAULT_REVIEW_SECOND_PROMPT)
    }

    pub fn external_review_prompt(&self) -> &str {
        self.prompts
            .external_review
            .as_deref()
            .unwrap_or(DEFAULT_EXTERNAL_REVIEW_PROMPT)
    }

    pub fn external_eval_prompt(&self) -> &str {
        self.prompts
            .external_eval
            .as_deref()
            .unwrap_or(DEFAULT_EXTERNAL_EVAL_PROMPT)
    }

    pub fn finalize_prompt(&self) -> &str {
        self.prompts
            .finalize
            .as_deref()
            .unwrap_or(DEFAULT_FINALIZE_PROMPT)
    }

    pub fn plan_create_prompt(&self) -> &str {
        self.prompts
            .plan_create
            .as_deref()
            .unwrap_or(DEFAULT_PLAN_CREATE_PROMPT)
    }

    pub fn find_agent(&self, name: &str) -> Option<&CustomAgent> {
        self.agents.iter().find(|agent| agent.name == name)
    }
}

/// Resolve the config directory: explicit override, else `~/.config/ralphex`.
pub fn resolve_config_dir(override_dir: Option<&Path>) -> PathBuf {
    if let Some(dir) = override_dir {
        return dir.to_path_buf();
    }
    let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_default();
    home.join(".config").join("ralphex")
}

/// Load config from `<dir>/config.toml`. A missing file yields all defaults;
/// a present but unparseable file is an error.
pub fn load(dir: &Path) -> Result<AppConfig, ConfigError> {
    let path = dir.join(CONFIG_FILE);
    let body = match fs::read_to_string(&path) {
        Ok(body) => body,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(AppConfig::default());
        }
        Err(source) => return Err(ConfigError::Read { path, source }),
    };
    toml::from_str(&body).map_err(|source| ConfigError::Parse { path, source })
}

/// Write the embedded defaults (config plus prompt templates) into `dir`.
pub fn dump_defaults(dir: &Path) -> Result<(), ConfigError> {
    fs::create_dir_all(dir).map_err(|source| ConfigError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let rendered =
        toml::to_string_pretty(&AppConfig::default()).map_err(|source| ConfigError::Serialize { source })?;
    write_file(&dir.join(CONFIG_FILE), &rendered)?;

    let prompts = [
        ("task.md", DEFAULT_TASK_PROMPT),
        ("review_first.md", DEFAULT_REVIEW_FIRST_PROMPT),
        ("review_second.md", DEFAULT_REVIEW_SECOND_PROMPT),
        ("external_review.md", DEFAULT_EXTERNAL_REVIEW_PROMPT),
        ("external_eval.md", DEFAULT_EXTERNAL_EVAL_PROMPT),
        ("finalize.md", DEFAULT_FINALIZE_PROMPT),
        ("plan_create.md", DEFAULT_PLAN_CREATE_PROMPT),
    ];
    let prompt_dir = dir.join("prompts");
    fs::create_dir_all(&prompt_dir).map_err(|source| ConfigError::CreateDir {
        path: prompt_dir.clone(),
        source,
    })?;
    for (name, body) in prompts {
        write_file(&prompt_dir.join(name), body)?;
    }
    Ok(())
}

/// Interactively restore `<dir>/config.toml` to the embedded defaults.
/// Returns true when the reset was applied.
pub fn reset(
    dir: &Path,
    stdin: &mut impl BufRead,
    stdout: &mut impl Write,
) -> Result<bool, ConfigError> {
    let path = dir.join(CONFIG_FILE);
    writeln!(stdout, "reset config at {} to defaults? [y/N]", path.display())
        .map_err(|source| ConfigError::Input { source })?;
    stdout.flush().map_err(|source| ConfigError::Input { source })?;

    let mut answer = String::new();
    stdin
        .read_line(&mut answer)
        .map_err(|source| ConfigError::Input { source })?;
    if !matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes") {
        return Ok(false);
    }

    fs::create_dir_all(dir).map_err(|source| ConfigError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;
    let rendered =
        toml::to_string_pretty(&AppConfig::default()).map_err(|source| ConfigError::Serialize { source })?;
    write_file(&path, &rendered)?;
    Ok(true)
}

fn write_file(path: &Path, body: &str) -> Result<(), ConfigError> {
    fs::write(path, body).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Cursor;
    use std::path::{Path, PathBuf};
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;

    fn unique_temp_dir(prefix: &str) -> PathBuf {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("ralphex-config-{prefix}-{now}"));
        fs::create_dir_all(&path).expect("create temp dir");
        path
    }

    #[test]
    fn defaults_cover_all_executor_settings() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.claude_command, "claude");
        assert_eq!(cfg.external.command, "codex");
        assert_eq!(cfg.external.model, "gpt-5.2-codex");
        assert_eq!(cfg.external.reasoning_effort, "xhigh");
        assert_eq!(cfg.external.sandbox, "read-only");
        assert_eq!(cfg.external.stream_idle_timeout_ms, 3_600_000);
        assert_eq!(cfg.external.header_lines, 20);
        assert_eq!(cfg.iteration_delay_ms, 100);
        assert_eq!(cfg.task_retry_count, 1);
        assert!(cfg.external_enabled);
        assert!(cfg.finalize_enabled);
        assert!(!cfg.worktree_enabled);
    }

    #[test]
    fn default_agents_back_the_review_prompts() {
        let cfg = AppConfig::default();
        assert!(cfg.find_agent("review-quality").is_some());
        assert!(cfg.find_agent("review-implementation").is_some());
        assert!(cfg.find_agent("review-testing").is_some());
        assert!(cfg.find_agent("review-consistency").is_some());
        assert!(cfg.find_agent("review-simplicity").is_some());
        assert!(cfg.find_agent("missing").is_none());
    }

    #[test]
    fn default_prompts_carry_their_sentinels() {
        let cfg = AppConfig::default();
        assert!(cfg.task_prompt().contains("<<<RALPHEX:ALL_TASKS_DONE>>>"));
        assert!(cfg.task_prompt().contains("<<<RALPHEX:TASK_FAILED>>>"));
        assert!(cfg.review_first_prompt().contains("<<<RALPHEX:REVIEW_DONE>>>"));
        assert!(cfg
            .external_eval_prompt()
            .contains("<<<RALPHEX:CODEX_REVIEW_DONE>>>"));
        assert!(cfg.finalize_prompt().contains("<<<RALPHEX:FINALIZE_DONE>>>"));
        assert!(cfg.plan_create_prompt().contains("<<<RALPHEX:PLAN_DONE>>>"));
    }

    #[test]
    fn load_returns_defaults_for_missing_file() {
        let dir = unique_temp_dir("missing");
        let cfg = load(&dir).expect("load defaults");
        assert_eq!(cfg, AppConfig::default());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn load_applies_partial_overrides() {
        let dir = unique_temp_dir("partial");
        fs::write(
            dir.join("config.toml"),
            "task_retry_count = 3\nworktree_enabled = true\n\n[external]\nmodel = \"other-model\"\n",
        )
        .expect("write config");

        let cfg = load(&dir).expect("load config");
        assert_eq!(cfg.task_retry_count, 3);
        assert!(cfg.worktree_enabled);
        assert_eq!(cfg.external.model, "other-model");
        // untouched keys keep their defaults
        assert_eq!(cfg.claude_command, "claude");
        assert_eq!(cfg.external.sandbox, "read-only");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn load_rejects_malformed_toml() {
        let dir = unique_temp_dir("malformed");
        fs::write(dir.join("config.toml"), "not [valid toml").expect("write config");

        let err = load(&dir).expect_err("malformed config should fail");
        assert!(matches!(err, ConfigError::Parse { .. }));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn prompt_overrides_replace_embedded_defaults() {
        let dir = unique_temp_dir("prompts");
        fs::write(
            dir.join("config.toml"),
            "[prompts]\ntask = \"custom task prompt for {{PLAN_FILE}}\"\n",
        )
        .expect("write config");

        let cfg = load(&dir).expect("load config");
        assert_eq!(cfg.task_prompt(), "custom task prompt for {{PLAN_FILE}}");
        assert_eq!(cfg.review_first_prompt(), DEFAULT_REVIEW_FIRST_PROMPT);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn custom_agents_replace_defaults_when_configured() {
        let dir = unique_temp_dir("agents");
        fs::write(
            dir.join("config.toml"),
            "[[agents]]\nname = \"security-scanner\"\nprompt = \"scan for security vulnerabilities\"\n",
        )
        .expect("write config");

        let cfg = load(&dir).expect("load config");
        assert_eq!(cfg.agents.len(), 1);
        assert_eq!(
            cfg.find_agent("security-scanner").map(|a| a.prompt.as_str()),
            Some("scan for security vulnerabilities")
        );
        assert!(cfg.find_agent("review-quality").is_none());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn dump_defaults_writes_config_and_prompt_templates() {
        let dir = unique_temp_dir("dump");
        dump_defaults(&dir).expect("dump defaults");

        let rendered = fs::read_to_string(dir.join("config.toml")).expect("read config");
        let parsed: AppConfig = toml::from_str(&rendered).expect("roundtrip config");
        assert_eq!(parsed, AppConfig::default());

        for name in [
            "task.md",
            "review_first.md",
            "review_second.md",
            "external_review.md",
            "external_eval.md",
            "finalize.md",
            "plan_create.md",
        ] {
            assert!(dir.join("prompts").join(name).exists(), "missing {name}");
        }

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn reset_declines_without_confirmation() {
        let dir = unique_temp_dir("reset-no");
        fs::write(dir.join("config.toml"), "task_retry_count = 9\n").expect("write config");

        let mut stdin = Cursor::new(b"n\n".to_vec());
        let mut stdout = Vec::new();
        let applied = reset(&dir, &mut stdin, &mut stdout).expect("reset");
        assert!(!applied);
        assert_eq!(load(&dir).expect("load").task_retry_count, 9);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn reset_restores_defaults_on_confirmation() {
        let dir = unique_temp_dir("reset-yes");
        fs::write(dir.join("config.toml"), "task_retry_count = 9\n").expect("write config");

        let mut stdin = Cursor::new(b"y\n".to_vec());
        let mut stdout = Vec::new();
        let applied = reset(&dir, &mut stdin, &mut stdout).expect("reset");
        assert!(applied);
        assert_eq!(load(&dir).expect("load"), AppConfig::default());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn resolve_config_dir_prefers_explicit_override() {
        let dir = resolve_config_dir(Some(Path::new("/tmp/custom")));
        assert_eq!(dir, PathBuf::from("/tmp/custom"));

        let fallback = resolve_config_dir(None);
        assert!(fallback.ends_with(".config/ralphex"));
    }
}
