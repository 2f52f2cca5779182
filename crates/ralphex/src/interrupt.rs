use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use ralphex_core::CancelToken;

/// Seconds between the interrupt notice and the forced exit.
pub const FORCE_EXIT_SECS: u64 = 5;

const WATCH_POLL: Duration = Duration::from_millis(100);

type CleanupFn = Box<dyn FnOnce() + Send>;

/// At-most-once cleanup cell shared between the main thread (which registers
/// the worktree cleanup once it exists) and the interrupt watcher (which
/// drains it on the force-exit path). Whoever runs first wins; the other
/// call is a no-op.
#[derive(Default)]
pub struct CleanupSlot {
    inner: Mutex<Option<CleanupFn>>,
}

impl CleanupSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the cleanup.
    pub fn set(&self, f: impl FnOnce() + Send + 'static) {
        *self.inner.lock().expect("cleanup lock") = Some(Box::new(f));
    }

    /// Take and run the cleanup, if any.
    pub fn run(&self) {
        let f = self.inner.lock().expect("cleanup lock").take();
        if let Some(f) = f {
            f();
        }
    }
}

/// Bridge SIGINT/SIGTERM into the cancellation token.
pub fn install_signal_handler(cancel: &CancelToken) {
    let cancel = cancel.clone();
    if let Err(err) = ctrlc::set_handler(move || cancel.cancel()) {
        eprintln!("warning: failed to install interrupt handler: {err}");
    }
}

/// Watcher guard; dropping it stops the watcher thread.
pub struct InterruptWatcher {
    done: Arc<AtomicBool>,
}

impl Drop for InterruptWatcher {
    fn drop(&mut self) {
        self.done.store(true, Ordering::SeqCst);
    }
}

/// Start the interrupt watcher: on cancellation it prints an immediate
/// notice and arms the force-exit watchdog. If graceful shutdown does not
/// finish within [`FORCE_EXIT_SECS`], the watcher runs the registered
/// cleanup once and aborts the process.
pub fn start_interrupt_watcher(cancel: CancelToken, cleanup: Arc<CleanupSlot>) -> InterruptWatcher {
    let done = Arc::new(AtomicBool::new(false));
    let watcher_done = done.clone();

    thread::spawn(move || {
        loop {
            if watcher_done.load(Ordering::SeqCst) {
                return;
            }
            if cancel.wait_timeout(WATCH_POLL) {
                break;
            }
        }

        eprintln!("\ninterrupting... (force exit in {FORCE_EXIT_SECS}s)");
        let ticks = FORCE_EXIT_SECS * 10;
        for _ in 0..ticks {
            if watcher_done.load(Ordering::SeqCst) {
                return;
            }
            thread::sleep(WATCH_POLL);
        }

        eprintln!("force exit");
        cleanup.run();
        std::process::exit(1);
    });

    InterruptWatcher { done }
}
