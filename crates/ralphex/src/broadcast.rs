use std::path::Path;
use std::sync::Arc;

use ralphex_core::events::{EventBus, EventKind};
use ralphex_core::Phase;

use crate::progress::{ProgressLogger, RunnerLog};

/// Wraps the progress logger and additionally publishes every write to the
/// event bus the dashboard subscribes to. The phase holder is updated before
/// the phase event goes out, so subscribers never observe an event from a
/// phase the holder does not yet report.
pub struct BroadcastLogger {
    base: Arc<ProgressLogger>,
    bus: EventBus,
}

impl BroadcastLogger {
    pub fn new(base: Arc<ProgressLogger>, bus: EventBus) -> Self {
        Self { base, bus }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }
}

impl RunnerLog for BroadcastLogger {
    fn set_phase(&self, phase: Phase) {
        self.base.set_phase(phase);
        self.bus.publish(EventKind::Phase, None, phase.as_str());
    }

    fn print(&self, message: &str) {
        self.base.print(message);
        self.bus.publish(EventKind::Log, None, message);
    }

    fn print_raw(&self, text: &str) {
        self.base.print_raw(text);
        self.bus
            .publish(EventKind::Log, None, text.trim_end_matches('\n'));
    }

    fn print_section(&self, label: &str) {
        self.base.print_section(label);
        self.bus.publish(EventKind::Section, None, label);
    }

    fn print_aligned(&self, line: &str) {
        self.base.print_aligned(line);
        self.bus.publish(EventKind::Log, None, line);
    }

    fn log_diff_stats(&self, files: u64, additions: u64, deletions: u64) {
        self.base.log_diff_stats(files, additions, deletions);
        self.bus.publish(
            EventKind::DiffStats,
            None,
            format!("{files} files, +{additions}/-{deletions}"),
        );
    }

    fn path(&self) -> &Path {
        self.base.path()
    }

    fn task_started(&self, position: usize) {
        self.bus.publish(
            EventKind::TaskStart,
            Some(position),
            format!("task {position}"),
        );
    }

    fn task_ended(&self, position: usize) {
        self.bus.publish(
            EventKind::TaskEnd,
            Some(position),
            format!("task {position}"),
        );
    }
}
