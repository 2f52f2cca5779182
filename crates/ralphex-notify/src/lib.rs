pub mod error;
pub mod service;
pub mod sink;
pub mod types;

pub use error::NotifyError;
pub use service::NotifyService;
pub use sink::{NotificationSink, SlackSink, WebhookSink};
pub use types::{RunReport, RunStatus};
