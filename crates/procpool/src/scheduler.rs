//! Virtual-time task runner for the pool's single sequence
//!
//! Every timer in the pool (spare deadlines, deferred creation, shutdown
//! delays, keep-alive expiry) is a delayed task on a [`TaskRunner`]. Time only
//! moves when the owner advances it, which keeps tests deterministic; the
//! [`crate::driver`] advances it in step with the wall clock.

use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap},
    fmt,
    ops::Add,
    time::Duration,
};

/// A point on the sequence's monotonic clock, measured from its origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TimeTicks(Duration);

impl TimeTicks {
    /// Clock origin
    pub const ZERO: TimeTicks = TimeTicks(Duration::ZERO);

    /// Ticks at `offset` from the origin
    pub fn from_origin(offset: Duration) -> Self {
        Self(offset)
    }

    /// Offset from the origin
    pub fn since_origin(self) -> Duration {
        self.0
    }

    /// Elapsed time since `earlier`, zero if `earlier` is later
    pub fn saturating_duration_since(self, earlier: TimeTicks) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

impl Add<Duration> for TimeTicks {
    type Output = TimeTicks;

    fn add(self, rhs: Duration) -> TimeTicks {
        TimeTicks(self.0.saturating_add(rhs))
    }
}

impl fmt::Display for TimeTicks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0.as_millis())
    }
}

/// Handle to a posted task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

/// A unit of work run against the sequence owner
pub type Task<C> = Box<dyn FnOnce(&mut C)>;

/// Delayed-task queue over a virtual clock
///
/// Tasks run in deadline order; tasks sharing a deadline run in posting order.
pub struct TaskRunner<C> {
    now: TimeTicks,
    next_seq: u64,
    queue: BinaryHeap<Reverse<(TimeTicks, u64)>>,
    tasks: HashMap<u64, Task<C>>,
}

impl<C> TaskRunner<C> {
    /// Create an empty runner at the clock origin
    pub fn new() -> Self {
        Self {
            now: TimeTicks::ZERO,
            next_seq: 0,
            queue: BinaryHeap::new(),
            tasks: HashMap::new(),
        }
    }

    /// Current virtual time
    pub fn now(&self) -> TimeTicks {
        self.now
    }

    /// Post a task to run as soon as the sequence is pumped
    pub fn post_task(&mut self, task: impl FnOnce(&mut C) + 'static) -> TaskId {
        self.post_delayed_task(Duration::ZERO, task)
    }

    /// Post a task to run once `delay` has elapsed
    pub fn post_delayed_task(
        &mut self,
        delay: Duration,
        task: impl FnOnce(&mut C) + 'static,
    ) -> TaskId {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.queue.push(Reverse((self.now + delay, seq)));
        self.tasks.insert(seq, Box::new(task));
        TaskId(seq)
    }

    /// Cancel a task; returns false when it already ran or was cancelled
    pub fn cancel(&mut self, id: TaskId) -> bool {
        self.tasks.remove(&id.0).is_some()
    }

    /// Whether the task is still queued
    pub fn is_pending(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id.0)
    }

    /// Number of queued tasks
    pub fn pending_count(&self) -> usize {
        self.tasks.len()
    }

    /// Deadline of the earliest live task
    pub fn next_deadline(&mut self) -> Option<TimeTicks> {
        self.discard_cancelled();
        self.queue.peek().map(|Reverse((deadline, _))| *deadline)
    }

    /// Remove and return the next task whose deadline has passed
    pub fn pop_ready(&mut self) -> Option<Task<C>> {
        self.discard_cancelled();
        match self.queue.peek() {
            Some(Reverse((deadline, _))) if *deadline <= self.now => {
                let Reverse((_, seq)) = self.queue.pop()?;
                self.tasks.remove(&seq)
            }
            _ => None,
        }
    }

    /// Move the clock forward; never moves it back
    pub fn advance_to(&mut self, time: TimeTicks) {
        if time > self.now {
            self.now = time;
        }
    }

    fn discard_cancelled(&mut self) {
        while let Some(Reverse((_, seq))) = self.queue.peek() {
            if self.tasks.contains_key(seq) {
                break;
            }
            self.queue.pop();
        }
    }
}

impl<C> Default for TaskRunner<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for TaskRunner<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRunner")
            .field("now", &self.now)
            .field("pending", &self.tasks.len())
            .finish()
    }
}
