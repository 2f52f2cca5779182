use std::process::Command;

use crate::error::NotifyError;
use crate::types::{RunReport, RunStatus};

pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &'static str;
    fn send(&self, report: &RunReport) -> Result<(), NotifyError>;
}

/// Generic JSON webhook. The transport timeout lives inside curl, so reports
/// go out even when the run itself was cancelled.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    pub url: String,
    pub timeout_secs: u64,
}

impl WebhookSink {
    pub fn build_payload(report: &RunReport) -> serde_json::Value {
        serde_json::json!({
            "status": report.status.as_str(),
            "mode": report.mode,
            "plan_file": report
                .plan_file
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            "branch": report.branch,
            "duration_secs": report.duration.as_secs(),
            "files": report.files,
            "additions": report.additions,
            "deletions": report.deletions,
            "error": report.error.clone().unwrap_or_default(),
        })
    }
}

impl NotificationSink for WebhookSink {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn send(&self, report: &RunReport) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(&Self::build_payload(report)).map_err(|err| {
            NotifyError::Encode {
                message: err.to_string(),
            }
        })?;
        post_json(&self.url, &payload, self.timeout_secs)
    }
}

/// Slack incoming-webhook sink with a plain Block Kit text payload.
#[derive(Debug, Clone)]
pub struct SlackSink {
    pub webhook_url: String,
    pub channel: Option<String>,
    pub timeout_secs: u64,
}

impl SlackSink {
    pub fn build_payload(report: &RunReport, channel: Option<&str>) -> serde_json::Value {
        let marker = match report.status {
            RunStatus::Success => "✅",
            RunStatus::Failure => "🔴",
        };
        let text = format!("{marker} {}", report.summary());

        let mut payload = serde_json::json!({
            "text": text,
            "blocks": [
                {
                    "type": "section",
                    "text": { "type": "mrkdwn", "text": text }
                }
            ]
        });
        if let Some(channel) = channel {
            payload["channel"] = serde_json::Value::String(channel.to_string());
        }
        payload
    }
}

impl NotificationSink for SlackSink {
    fn name(&self) -> &'static str {
        "slack"
    }

    fn send(&self, report: &RunReport) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(&Self::build_payload(report, self.channel.as_deref()))
            .map_err(|err| NotifyError::Encode {
                message: err.to_string(),
            })?;
        post_json(&self.webhook_url, &payload, self.timeout_secs)
    }
}

fn post_json(url: &str, payload: &str, timeout_secs: u64) -> Result<(), NotifyError> {
    let output = Command::new("curl")
        .arg("-sS")
        .arg("-m")
        .arg(timeout_secs.to_string())
        .arg("-X")
        .arg("POST")
        .arg("-H")
        .arg("Content-Type: application/json")
        .arg("-d")
        .arg(payload)
        .arg(url)
        .output()
        .map_err(|err| NotifyError::Transport {
            message: format!("failed to execute curl: {err}"),
        })?;

    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(NotifyError::Transport {
        message: format!(
            "request failed (status {:?}): {}",
            output.status.code(),
            stderr.trim()
        ),
    })
}
