use std::sync::OnceLock;

use regex::Regex;

use crate::runner::Runner;

const AGENT_WRAPPER_HEAD: &str =
    "Use the Task tool to launch a general-purpose agent with this prompt:";
const AGENT_WRAPPER_TAIL: &str = "Report findings only - no positive observations.";

fn agent_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{agent:([^}]+)\}\}").expect("agent reference regex"))
}

impl Runner {
    fn goal(&self) -> String {
        if let Some(plan) = &self.cfg.plan_file {
            return format!("implementation of plan at {}", plan.display());
        }
        if let Some(description) = &self.cfg.plan_description {
            return description.clone();
        }
        "current branch vs master".to_string()
    }

    pub(crate) fn build_task_prompt(&self) -> String {
        self.render(self.cfg.app.task_prompt(), "")
    }

    pub(crate) fn build_first_review_prompt(&self) -> String {
        self.render(self.cfg.app.review_first_prompt(), "")
    }

    pub(crate) fn build_second_review_prompt(&self) -> String {
        self.render(self.cfg.app.review_second_prompt(), "")
    }

    pub(crate) fn build_external_review_prompt(&self) -> String {
        self.render(self.cfg.app.external_review_prompt(), "")
    }

    pub(crate) fn build_external_eval_prompt(&self, findings: &str) -> String {
        self.render(self.cfg.app.external_eval_prompt(), findings)
    }

    pub(crate) fn build_finalize_prompt(&self) -> String {
        self.render(self.cfg.app.finalize_prompt(), "")
    }

    pub(crate) fn build_plan_create_prompt(&self) -> String {
        self.render(self.cfg.app.plan_create_prompt(), "")
    }

    /// Textual substitution over the closed placeholder set. Agent
    /// references expand first so agent bodies may themselves carry plain
    /// placeholders and get them filled in the second pass.
    fn render(&self, template: &str, codex_output: &str) -> String {
        let expanded = self.expand_agent_references(template);
        let plan = self
            .cfg
            .plan_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let progress = self.log.path().display().to_string();

        expanded
            .replace("{{CODEX_OUTPUT}}", codex_output)
            .replace("{{PLAN_FILE}}", &plan)
            .replace("{{PROGRESS_FILE}}", &progress)
            .replace("{{GOAL}}", &self.goal())
    }

    /// Replace each `{{agent:NAME}}` site with the named agent's prompt
    /// wrapped in the sub-agent launch instruction. Matching is
    /// case-sensitive; duplicate references expand at every site; unknown
    /// names stay verbatim and produce a warning.
    pub(crate) fn expand_agent_references(&self, prompt: &str) -> String {
        if self.cfg.app.agents.is_empty() || !prompt.contains("{{agent:") {
            return prompt.to_string();
        }

        let mut result = String::with_capacity(prompt.len());
        let mut last_end = 0;
        for caps in agent_ref_re().captures_iter(prompt) {
            let whole = caps.get(0).expect("whole match");
            let name = &caps[1];
            result.push_str(&prompt[last_end..whole.start()]);

            match self.cfg.app.find_agent(name) {
                Some(agent) => {
                    result.push_str(AGENT_WRAPPER_HEAD);
                    result.push('\n');
                    result.push_str(&agent.prompt);
                    result.push('\n');
                    result.push_str(AGENT_WRAPPER_TAIL);
                }
                None => {
                    self.log.print(&format!(
                        "[WARN] agent {name:?} not found, reference left unexpanded"
                    ));
                    result.push_str(whole.as_str());
                }
            }
            last_end = whole.end();
        }
        result.push_str(&prompt[last_end..]);
        result
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    use ralphex_core::config::{AppConfig, CustomAgent, PromptOverrides};
    use ralphex_core::PhaseHolder;

    use crate::runner::{Mode, Runner, RunnerConfig};
    use crate::test_support::{MockLog, ScriptedExecutor};

    fn mk_runner(plan_file: Option<&str>, app: AppConfig) -> (Runner, Arc<MockLog>) {
        let log = Arc::new(MockLog::new("progress-test.txt"));
        let cfg = RunnerConfig {
            plan_file: plan_file.map(PathBuf::from),
            plan_description: None,
            mode: Mode::Full,
            max_iterations: 50,
            iteration_delay: Duration::from_millis(1),
            task_retry_count: 1,
            external_enabled: true,
            finalize_enabled: true,
            app,
        };
        let runner = Runner::with_executors(
            cfg,
            log.clone(),
            PhaseHolder::new(),
            Box::new(ScriptedExecutor::new(vec![])),
            Box::new(ScriptedExecutor::new(vec![])),
        );
        (runner, log)
    }

    fn agents_only(agents: Vec<CustomAgent>) -> AppConfig {
        AppConfig {
            agents,
            ..AppConfig::default()
        }
    }

    #[test]
    fn task_prompt_substitutes_paths_and_keeps_sentinels() {
        let (runner, _log) = mk_runner(Some("docs/plans/test.md"), AppConfig::default());
        let prompt = runner.build_task_prompt();

        assert!(prompt.contains("docs/plans/test.md"));
        assert!(prompt.contains("progress-test.txt"));
        assert!(prompt.contains("<<<RALPHEX:ALL_TASKS_DONE>>>"));
        assert!(prompt.contains("<<<RALPHEX:TASK_FAILED>>>"));
        assert!(prompt.contains("ONE Task section per iteration"));
        assert!(prompt.contains("STOP HERE"));
        assert!(!prompt.contains("{{PLAN_FILE}}"));
        assert!(!prompt.contains("{{PROGRESS_FILE}}"));
    }

    #[test]
    fn first_review_prompt_expands_all_five_agents() {
        let (runner, _log) = mk_runner(Some("docs/plans/test.md"), AppConfig::default());
        let prompt = runner.build_first_review_prompt();

        assert!(prompt.contains("docs/plans/test.md"));
        assert!(prompt.contains("git diff master...HEAD"));
        assert!(prompt.contains("<<<RALPHEX:REVIEW_DONE>>>"));
        assert!(prompt.contains("<<<RALPHEX:TASK_FAILED>>>"));
        assert!(prompt.contains("Use the Task tool to launch a general-purpose agent"));
        assert!(prompt.contains("security issues"));
        assert!(prompt.contains("achieves the stated goal"));
        assert!(prompt.contains("test coverage"));
        assert!(!prompt.contains("{{agent:"));
    }

    #[test]
    fn first_review_prompt_without_plan_uses_branch_goal() {
        let (runner, _log) = mk_runner(None, AppConfig::default());
        let prompt = runner.build_first_review_prompt();

        assert!(prompt.contains("current branch vs master"));
        assert!(prompt.contains("<<<RALPHEX:REVIEW_DONE>>>"));
    }

    #[test]
    fn second_review_prompt_uses_only_two_agents() {
        let (runner, _log) = mk_runner(Some("docs/plans/test.md"), AppConfig::default());
        let prompt = runner.build_second_review_prompt();

        assert!(prompt.contains("docs/plans/test.md"));
        assert!(prompt.contains("git diff master...HEAD"));
        assert!(prompt.contains("security issues"));
        assert!(prompt.contains("achieves the stated goal"));
        assert!(!prompt.contains("test coverage"));
    }

    #[test]
    fn external_eval_prompt_embeds_findings_verbatim() {
        let findings = "Issue 1: Missing error check in foo.rs:42";
        let (runner, _log) = mk_runner(Some("docs/plans/test.md"), AppConfig::default());
        let prompt = runner.build_external_eval_prompt(findings);

        assert!(prompt.contains(findings));
        assert!(prompt.contains("<<<RALPHEX:CODEX_REVIEW_DONE>>>"));
        assert!(prompt.contains("Codex (GPT-5.2)"));
        assert!(prompt.contains("Valid issues"));
        assert!(prompt.contains("Invalid/irrelevant issues"));
    }

    #[test]
    fn custom_task_prompt_override_replaces_the_default() {
        let app = AppConfig {
            prompts: PromptOverrides {
                task: Some(
                    "Custom task prompt for {{PLAN_FILE}} with progress at {{PROGRESS_FILE}}"
                        .to_string(),
                ),
                ..PromptOverrides::default()
            },
            ..AppConfig::default()
        };
        let (runner, _log) = mk_runner(Some("docs/plans/test.md"), app);

        assert_eq!(
            runner.build_task_prompt(),
            "Custom task prompt for docs/plans/test.md with progress at progress-test.txt"
        );
    }

    #[test]
    fn custom_review_prompt_override_substitutes_goal() {
        let app = AppConfig {
            prompts: PromptOverrides {
                review_first: Some("Custom first review for {{GOAL}}".to_string()),
                ..PromptOverrides::default()
            },
            ..AppConfig::default()
        };

        let (runner, _log) = mk_runner(Some("docs/plans/test.md"), app.clone());
        assert_eq!(
            runner.build_first_review_prompt(),
            "Custom first review for implementation of plan at docs/plans/test.md"
        );

        let (runner, _log) = mk_runner(None, app);
        assert_eq!(
            runner.build_first_review_prompt(),
            "Custom first review for current branch vs master"
        );
    }

    #[test]
    fn custom_eval_prompt_override_substitutes_output_and_goal() {
        let app = AppConfig {
            prompts: PromptOverrides {
                external_eval: Some(
                    "Custom eval with output: {{CODEX_OUTPUT}} for {{GOAL}}".to_string(),
                ),
                ..PromptOverrides::default()
            },
            ..AppConfig::default()
        };
        let (runner, _log) = mk_runner(Some("docs/plans/test.md"), app);

        assert_eq!(
            runner.build_external_eval_prompt("found bug in main.rs"),
            "Custom eval with output: found bug in main.rs for implementation of plan at docs/plans/test.md"
        );
    }

    #[test]
    fn expands_a_single_agent_reference() {
        let app = agents_only(vec![CustomAgent {
            name: "security-scanner".to_string(),
            prompt: "scan for security vulnerabilities".to_string(),
        }]);
        let (runner, _log) = mk_runner(None, app);

        let result = runner.expand_agent_references("Check code:\n{{agent:security-scanner}}\nDone.");
        assert!(result.contains("Use the Task tool to launch a general-purpose agent with this prompt:"));
        assert!(result.contains("scan for security vulnerabilities"));
        assert!(result.contains("Report findings only - no positive observations."));
        assert!(!result.contains("{{agent:security-scanner}}"));
    }

    #[test]
    fn expands_multiple_agent_references() {
        let app = agents_only(vec![
            CustomAgent {
                name: "agent-a".to_string(),
                prompt: "first agent prompt".to_string(),
            },
            CustomAgent {
                name: "agent-b".to_string(),
                prompt: "second agent prompt".to_string(),
            },
        ]);
        let (runner, _log) = mk_runner(None, app);

        let result = runner.expand_agent_references("Run {{agent:agent-a}} then {{agent:agent-b}}.");
        assert!(result.contains("first agent prompt"));
        assert!(result.contains("second agent prompt"));
        assert!(!result.contains("{{agent:"));
    }

    #[test]
    fn missing_agent_stays_verbatim_and_warns() {
        let app = agents_only(vec![CustomAgent {
            name: "existing".to_string(),
            prompt: "exists".to_string(),
        }]);
        let (runner, log) = mk_runner(None, app);

        let result = runner.expand_agent_references("Run {{agent:missing-agent}} now.");
        assert!(result.contains("{{agent:missing-agent}}"));
        assert!(!result.contains("Use the Task tool"));

        let printed = log.printed();
        assert_eq!(printed.len(), 1);
        assert!(printed[0].contains("[WARN]"));
        assert!(printed[0].contains("not found"));
    }

    #[test]
    fn no_configured_agents_leaves_prompt_untouched() {
        let (runner, log) = mk_runner(None, agents_only(vec![]));
        let prompt = "Run {{agent:test}} now.";
        assert_eq!(runner.expand_agent_references(prompt), prompt);
        assert!(log.printed().is_empty());
    }

    #[test]
    fn prompt_without_references_passes_through() {
        let app = agents_only(vec![CustomAgent {
            name: "scanner".to_string(),
            prompt: "scan code".to_string(),
        }]);
        let (runner, _log) = mk_runner(None, app);

        let prompt = "Plain prompt without agent references.";
        assert_eq!(runner.expand_agent_references(prompt), prompt);
    }

    #[test]
    fn agent_references_compose_with_plain_variables() {
        let app = AppConfig {
            agents: vec![CustomAgent {
                name: "reviewer".to_string(),
                prompt: "review the code".to_string(),
            }],
            prompts: PromptOverrides {
                review_first: Some(
                    "Plan: {{PLAN_FILE}}, Goal: {{GOAL}}, Agent: {{agent:reviewer}}".to_string(),
                ),
                ..PromptOverrides::default()
            },
            ..AppConfig::default()
        };
        let (runner, _log) = mk_runner(Some("docs/plans/test.md"), app);

        let result = runner.build_first_review_prompt();
        assert!(result.contains("Plan: docs/plans/test.md"));
        assert!(result.contains("Goal: implementation of plan at docs/plans/test.md"));
        assert!(result.contains("review the code"));
        assert!(!result.contains("{{agent:reviewer}}"));
    }

    #[test]
    fn duplicate_references_expand_at_every_site() {
        let app = agents_only(vec![CustomAgent {
            name: "scanner".to_string(),
            prompt: "scan for issues".to_string(),
        }]);
        let (runner, _log) = mk_runner(None, app);

        let result =
            runner.expand_agent_references("First: {{agent:scanner}}\nSecond: {{agent:scanner}}");
        assert!(!result.contains("{{agent:scanner}}"));
        assert_eq!(
            result
                .matches("Use the Task tool to launch a general-purpose agent")
                .count(),
            2
        );
        assert_eq!(result.matches("scan for issues").count(), 2);
    }

    #[test]
    fn agent_bodies_keep_special_characters_through_expansion() {
        let app = agents_only(vec![CustomAgent {
            name: "regex-agent".to_string(),
            prompt: "check for patterns like {{PLAN_FILE}} and $variables\nwith newlines\tand tabs"
                .to_string(),
        }]);
        let (runner, _log) = mk_runner(None, app);

        let result = runner.expand_agent_references("Run {{agent:regex-agent}} now.");
        assert!(!result.contains("{{agent:regex-agent}}"));
        assert!(result.contains("{{PLAN_FILE}}"));
        assert!(result.contains("$variables"));
        assert!(result.contains("\n"));
        assert!(result.contains("\t"));
    }

    #[test]
    fn agent_name_matching_is_case_sensitive() {
        let app = agents_only(vec![CustomAgent {
            name: "Scanner".to_string(),
            prompt: "uppercase name".to_string(),
        }]);

        let (runner, _log) = mk_runner(None, app.clone());
        let result = runner.expand_agent_references("Run {{agent:scanner}} now.");
        assert!(result.contains("{{agent:scanner}}"));
        assert!(!result.contains("uppercase name"));

        let (runner, _log) = mk_runner(None, app);
        let result = runner.expand_agent_references("Run {{agent:Scanner}} now.");
        assert!(!result.contains("{{agent:Scanner}}"));
        assert!(result.contains("uppercase name"));
    }

    #[test]
    fn percent_signs_in_agent_bodies_survive() {
        let app = agents_only(vec![CustomAgent {
            name: "perf".to_string(),
            prompt: "check if CPU is below 80% and memory under 90%".to_string(),
        }]);
        let (runner, _log) = mk_runner(None, app);

        let result = runner.expand_agent_references("Run {{agent:perf}} now.");
        assert!(result.contains("80%"));
        assert!(result.contains("90%"));
        assert!(!result.contains("{{agent:perf}}"));
    }
}
