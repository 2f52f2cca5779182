use std::fmt;

/// Sentinel tokens the agent prints to communicate state to the runner.
/// Tokens may appear anywhere on a line; detection is substring-based on the
/// raw (unfiltered) stream and the last occurrence wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    AllTasksDone,
    TaskFailed,
    ReviewDone,
    CodexReviewDone,
    PlanDone,
    FinalizeDone,
}

const ALL_SIGNALS: [Signal; 6] = [
    Signal::AllTasksDone,
    Signal::TaskFailed,
    Signal::ReviewDone,
    Signal::CodexReviewDone,
    Signal::PlanDone,
    Signal::FinalizeDone,
];

impl Signal {
    pub fn token(&self) -> &'static str {
        match self {
            Self::AllTasksDone => "<<<RALPHEX:ALL_TASKS_DONE>>>",
            Self::TaskFailed => "<<<RALPHEX:TASK_FAILED>>>",
            Self::ReviewDone => "<<<RALPHEX:REVIEW_DONE>>>",
            Self::CodexReviewDone => "<<<RALPHEX:CODEX_REVIEW_DONE>>>",
            Self::PlanDone => "<<<RALPHEX:PLAN_DONE>>>",
            Self::FinalizeDone => "<<<RALPHEX:FINALIZE_DONE>>>",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Find the last sentinel token in `raw`, or None when no token appears.
pub fn detect_signal(raw: &str) -> Option<Signal> {
    let mut last: Option<(usize, Signal)> = None;
    for signal in ALL_SIGNALS {
        if let Some(pos) = raw.rfind(signal.token()) {
            if last.map_or(true, |(best, _)| pos > best) {
                last = Some((pos, signal));
            }
        }
    }
    last.map(|(_, signal)| signal)
}

#[cfg(test)]
mod tests {
    use super::{detect_signal, Signal};

    #[test]
    fn detects_each_token() {
        assert_eq!(
            detect_signal("work done\n<<<RALPHEX:ALL_TASKS_DONE>>>\n"),
            Some(Signal::AllTasksDone)
        );
        assert_eq!(
            detect_signal("<<<RALPHEX:TASK_FAILED>>>"),
            Some(Signal::TaskFailed)
        );
        assert_eq!(
            detect_signal("<<<RALPHEX:REVIEW_DONE>>>"),
            Some(Signal::ReviewDone)
        );
        assert_eq!(
            detect_signal("<<<RALPHEX:CODEX_REVIEW_DONE>>>"),
            Some(Signal::CodexReviewDone)
        );
        assert_eq!(
            detect_signal("<<<RALPHEX:PLAN_DONE>>>"),
            Some(Signal::PlanDone)
        );
        assert_eq!(
            detect_signal("<<<RALPHEX:FINALIZE_DONE>>>"),
            Some(Signal::FinalizeDone)
        );
    }

    #[test]
    fn token_may_appear_mid_line() {
        assert_eq!(
            detect_signal("prefix <<<RALPHEX:REVIEW_DONE>>> suffix"),
            Some(Signal::ReviewDone)
        );
    }

    #[test]
    fn last_token_wins() {
        let raw = "<<<RALPHEX:TASK_FAILED>>>\nretrying...\n<<<RALPHEX:ALL_TASKS_DONE>>>\n";
        assert_eq!(detect_signal(raw), Some(Signal::AllTasksDone));

        let reversed = "<<<RALPHEX:ALL_TASKS_DONE>>>\noops\n<<<RALPHEX:TASK_FAILED>>>\n";
        assert_eq!(detect_signal(reversed), Some(Signal::TaskFailed));
    }

    #[test]
    fn no_token_yields_none() {
        assert_eq!(detect_signal("plain output with no markers"), None);
        assert_eq!(detect_signal(""), None);
    }

    #[test]
    fn near_miss_tokens_are_ignored() {
        assert_eq!(detect_signal("<<RALPHEX:REVIEW_DONE>>"), None);
        assert_eq!(detect_signal("<<<RALPHEX:REVIEW_DONE>>"), None);
        assert_eq!(detect_signal("<<<ralphex:review_done>>>"), None);
    }

    #[test]
    fn same_token_repeated_is_still_that_token() {
        let raw = "<<<RALPHEX:REVIEW_DONE>>>\n<<<RALPHEX:REVIEW_DONE>>>\n";
        assert_eq!(detect_signal(raw), Some(Signal::ReviewDone));
    }
}
