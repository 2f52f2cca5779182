use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Per-subscriber queue capacity. A subscriber that falls further behind
/// loses its oldest events, accounted in its drop counter.
pub const SUBSCRIBER_BACKLOG: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Log,
    Section,
    Phase,
    TaskStart,
    TaskEnd,
    DiffStats,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Section => "section",
            Self::Phase => "phase",
            Self::TaskStart => "task-start",
            Self::TaskEnd => "task-end",
            Self::DiffStats => "diff-stats",
        }
    }
}

/// A record fanned out to every dashboard subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    /// Strictly increasing publish order, shared across all subscribers.
    pub seq: u64,
    /// Milliseconds since the bus was created (monotonic clock).
    pub at_ms: u64,
    /// 1-based plan-task position for task events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<usize>,
    pub payload: String,
    /// Identifies the source progress file in watch mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

#[derive(Debug)]
struct SubscriberInner {
    queue: Mutex<VecDeque<Event>>,
    cond: Condvar,
    dropped: AtomicU64,
}

/// Receiving end of a subscription. Dropping it detaches from the bus.
#[derive(Debug)]
pub struct EventStream {
    inner: Arc<SubscriberInner>,
}

impl EventStream {
    /// Pop the next event, waiting up to `timeout`. Returns None on timeout
    /// so callers can interleave cancellation checks.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Event> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.inner.queue.lock().expect("subscriber lock");
        loop {
            if let Some(event) = queue.pop_front() {
                return Some(event);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .inner
                .cond
                .wait_timeout(queue, deadline - now)
                .expect("subscriber wait");
            queue = guard;
        }
    }

    /// Pop the next event without blocking.
    pub fn try_recv(&self) -> Option<Event> {
        self.inner.queue.lock().expect("subscriber lock").pop_front()
    }

    /// Number of events this subscriber lost to backlog overflow.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
struct BusState {
    next_seq: u64,
    subscribers: Vec<Weak<SubscriberInner>>,
}

/// Fan-out bus for broadcast events. Publishing never blocks: slow
/// subscribers drop their oldest events past [`SUBSCRIBER_BACKLOG`].
/// Cloning shares the bus.
#[derive(Debug, Clone)]
pub struct EventBus {
    state: Arc<Mutex<BusState>>,
    started: Instant,
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(BusState {
                next_seq: 0,
                subscribers: Vec::new(),
            })),
            started: Instant::now(),
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> EventStream {
        let inner = Arc::new(SubscriberInner {
            queue: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
            dropped: AtomicU64::new(0),
        });
        let mut state = self.state.lock().expect("bus lock");
        state.subscribers.push(Arc::downgrade(&inner));
        EventStream { inner }
    }

    pub fn publish(&self, kind: EventKind, task: Option<usize>, payload: impl Into<String>) {
        self.publish_for_session(kind, task, payload, None);
    }

    pub fn publish_for_session(
        &self,
        kind: EventKind,
        task: Option<usize>,
        payload: impl Into<String>,
        session: Option<String>,
    ) {
        // seq assignment and fan-out happen under the bus lock so every
        // subscriber observes the same total order.
        let mut state = self.state.lock().expect("bus lock");
        let event = Event {
            kind,
            seq: state.next_seq,
            at_ms: self.started.elapsed().as_millis() as u64,
            task,
            payload: payload.into(),
            session,
        };
        state.next_seq += 1;

        state.subscribers.retain(|weak| {
            let Some(subscriber) = weak.upgrade() else {
                return false;
            };
            let mut queue = subscriber.queue.lock().expect("subscriber lock");
            if queue.len() >= SUBSCRIBER_BACKLOG {
                queue.pop_front();
                subscriber.dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(event.clone());
            subscriber.cond.notify_one();
            true
        });
    }

    pub fn subscriber_count(&self) -> usize {
        let mut state = self.state.lock().expect("bus lock");
        state.subscribers.retain(|weak| weak.strong_count() > 0);
        state.subscribers.len()
    }
}
