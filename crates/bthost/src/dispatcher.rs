//! Deferred work and timers
//!
//! Every component that needs a timeout or wants to run something later goes through the
//! [`Dispatcher`] trait. Tasks run one at a time on whatever loop drives the dispatcher,
//! so a task never races another task of the same dispatcher.
//!
//! [`ManualDispatcher`] is a work queue with a manually advanced clock. Tests drive it
//! directly; an embedder can drive it from its own event loop by calling
//! [`ManualDispatcher::advance_to`] with the wall clock.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::{Duration, Instant};

/// A unit of deferred work
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Identifies a posted task so it can be cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

/// Scheduling primitive consumed by the L2CAP and GAP components
pub trait Dispatcher: Send + Sync {
    /// Current time as seen by this dispatcher
    fn now(&self) -> Instant;

    /// Run `task` once `deadline` has been reached
    fn post_at(&self, deadline: Instant, task: Task) -> TaskId;

    /// Cancel a task that has not run yet. Returns false if it already ran or was cancelled.
    fn cancel(&self, id: TaskId) -> bool;

    /// Run `task` as soon as possible, after the current task returns
    fn post(&self, task: Task) -> TaskId {
        self.post_at(self.now(), task)
    }

    /// Run `task` after `delay` has elapsed
    fn post_after(&self, delay: Duration, task: Task) -> TaskId {
        self.post_at(self.now() + delay, task)
    }
}

struct ManualState {
    now: Instant,
    next_id: u64,
    queue: BTreeMap<(Instant, u64), Task>,
    deadlines: HashMap<u64, Instant>,
}

/// Single-threaded work queue with a manually advanced clock
pub struct ManualDispatcher {
    state: Mutex<ManualState>,
}

impl ManualDispatcher {
    /// Create a dispatcher whose clock starts at the current instant
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ManualState {
                now: Instant::now(),
                next_id: 1,
                queue: BTreeMap::new(),
                deadlines: HashMap::new(),
            }),
        }
    }

    /// Number of tasks waiting to run
    pub fn pending_tasks(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Run every task that is due at the current time, including tasks posted by them.
    /// Returns the number of tasks run.
    pub fn run_until_idle(&self) -> usize {
        let now = self.now();
        self.run_due(now)
    }

    /// Move the clock forward by `delay`, running tasks in deadline order as their
    /// deadlines are reached.
    pub fn advance(&self, delay: Duration) -> usize {
        let target = self.now() + delay;
        self.advance_to(target)
    }

    /// Move the clock forward to `target` (never backwards), running due tasks in order
    pub fn advance_to(&self, target: Instant) -> usize {
        let count = self.run_due(target);
        let mut state = self.state.lock();
        if target > state.now {
            state.now = target;
        }
        count
    }

    fn run_due(&self, target: Instant) -> usize {
        let mut count = 0;
        loop {
            // The lock is released before the task runs so the task may post or cancel.
            let task = {
                let mut state = self.state.lock();
                let key = match state.queue.keys().next() {
                    Some(key) if key.0 <= target => *key,
                    _ => break,
                };
                if key.0 > state.now {
                    state.now = key.0;
                }
                state.deadlines.remove(&key.1);
                state.queue.remove(&key)
            };
            if let Some(task) = task {
                task();
                count += 1;
            }
        }
        count
    }
}

impl Default for ManualDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ManualDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ManualDispatcher")
            .field("pending_tasks", &state.queue.len())
            .finish()
    }
}

impl Dispatcher for ManualDispatcher {
    fn now(&self) -> Instant {
        self.state.lock().now
    }

    fn post_at(&self, deadline: Instant, task: Task) -> TaskId {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.queue.insert((deadline, id), task);
        state.deadlines.insert(id, deadline);
        TaskId(id)
    }

    fn cancel(&self, id: TaskId) -> bool {
        let mut state = self.state.lock();
        match state.deadlines.remove(&id.0) {
            Some(deadline) => state.queue.remove(&(deadline, id.0)).is_some(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_tasks_run_in_deadline_then_post_order() {
        let dispatcher = ManualDispatcher::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (delay, tag) in [(20, "c"), (10, "a"), (10, "b")] {
            let order = order.clone();
            dispatcher.post_after(
                Duration::from_millis(delay),
                Box::new(move || order.lock().push(tag)),
            );
        }

        assert_eq!(dispatcher.run_until_idle(), 0);
        assert_eq!(dispatcher.advance(Duration::from_millis(10)), 2);
        assert_eq!(*order.lock(), vec!["a", "b"]);
        assert_eq!(dispatcher.advance(Duration::from_millis(10)), 1);
        assert_eq!(*order.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_cancelled_task_never_runs() {
        let dispatcher = ManualDispatcher::new();
        let ran = Arc::new(Mutex::new(false));
        let flag = ran.clone();
        let id = dispatcher.post(Box::new(move || *flag.lock() = true));

        assert!(dispatcher.cancel(id));
        assert!(!dispatcher.cancel(id));
        dispatcher.run_until_idle();
        assert!(!*ran.lock());
    }

    #[test]
    fn test_task_posted_from_task_runs_in_same_pass() {
        let dispatcher = Arc::new(ManualDispatcher::new());
        let count = Arc::new(Mutex::new(0));

        let inner_dispatcher = dispatcher.clone();
        let inner_count = count.clone();
        dispatcher.post(Box::new(move || {
            *inner_count.lock() += 1;
            let c = inner_count.clone();
            inner_dispatcher.post(Box::new(move || *c.lock() += 1));
        }));

        assert_eq!(dispatcher.run_until_idle(), 2);
        assert_eq!(*count.lock(), 2);
    }

    #[test]
    fn test_clock_advances_to_task_deadline_while_running() {
        let dispatcher = Arc::new(ManualDispatcher::new());
        let start = dispatcher.now();
        let seen = Arc::new(Mutex::new(None));

        let d = dispatcher.clone();
        let s = seen.clone();
        dispatcher.post_after(
            Duration::from_secs(3),
            Box::new(move || *s.lock() = Some(d.now())),
        );
        dispatcher.advance(Duration::from_secs(5));

        assert_eq!(*seen.lock(), Some(start + Duration::from_secs(3)));
        assert_eq!(dispatcher.now(), start + Duration::from_secs(5));
    }
}
