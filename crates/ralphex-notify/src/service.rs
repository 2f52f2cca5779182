use ralphex_core::config::NotifyConfig;

use crate::sink::{NotificationSink, SlackSink, WebhookSink};
use crate::types::RunReport;

/// Fans a run report out to every configured sink. Sink failures are logged
/// to stderr and never fail the run.
#[derive(Default)]
pub struct NotifyService {
    sinks: Vec<Box<dyn NotificationSink>>,
}

impl NotifyService {
    pub fn new(sinks: Vec<Box<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }

    pub fn from_config(config: &NotifyConfig) -> Self {
        let mut sinks: Vec<Box<dyn NotificationSink>> = Vec::new();
        if let Some(url) = &config.webhook_url {
            sinks.push(Box::new(WebhookSink {
                url: url.clone(),
                timeout_secs: config.timeout_secs,
            }));
        }
        if let Some(url) = &config.slack_webhook_url {
            sinks.push(Box::new(SlackSink {
                webhook_url: url.clone(),
                channel: config.slack_channel.clone(),
                timeout_secs: config.timeout_secs,
            }));
        }
        Self { sinks }
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn send(&self, report: &RunReport) {
        for sink in &self.sinks {
            if let Err(err) = sink.send(report) {
                eprintln!("warning: {} notification failed: {err}", sink.name());
            }
        }
    }
}
