use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Cooperative cancellation token shared between the signal handler, the
/// runner, executors, and the dashboard. Cloning shares the flag.
///
/// Cancellation is one-way: once set it never resets.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: Mutex<bool>,
    cond: Condvar,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let mut cancelled = self.inner.cancelled.lock().expect("cancel lock");
        *cancelled = true;
        self.inner.cond.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.lock().expect("cancel lock")
    }

    /// Sleep up to `duration`, waking immediately on cancellation.
    /// Returns true when the token was cancelled before the sleep completed.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = std::time::Instant::now() + duration;
        let mut cancelled = self.inner.cancelled.lock().expect("cancel lock");
        loop {
            if *cancelled {
                return true;
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .inner
                .cond
                .wait_timeout(cancelled, deadline - now)
                .expect("cancel wait");
            cancelled = guard;
        }
    }

    /// Block up to `duration` waiting for cancellation. Same as [`sleep`]
    /// but named for watcher loops where cancellation is the event awaited.
    ///
    /// [`sleep`]: CancelToken::sleep
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        self.sleep(duration)
    }
}
