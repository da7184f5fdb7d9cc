//! Ref-count guards that keep a host alive
//!
//! A [`RefToken`] holds one count of one [`RefKind`] on one host. Dropping the
//! token releases the count; when that leaves the host with no counts, the
//! host is queued for a teardown evaluation on the sequence.

use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, VecDeque},
    fmt,
    rc::Rc,
    time::Duration,
};

use crate::{
    ids::{HostId, KeepAliveHandleId},
    scheduler::TimeTicks,
};

/// Hosts waiting for a teardown evaluation
pub(crate) type TeardownQueue = Rc<RefCell<VecDeque<HostId>>>;

/// The four independent reasons a host is kept alive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RefKind {
    /// In-flight keepalive fetches and similar
    KeepAlive,
    /// Dedicated, shared and service workers
    Worker,
    /// Unload handlers and subframe shutdown delay
    ShutdownDelay,
    /// A navigation expects to reuse the process
    PendingReuse,
}

impl RefKind {
    pub const ALL: [RefKind; 4] = [
        RefKind::KeepAlive,
        RefKind::Worker,
        RefKind::ShutdownDelay,
        RefKind::PendingReuse,
    ];

    fn index(self) -> usize {
        match self {
            RefKind::KeepAlive => 0,
            RefKind::Worker => 1,
            RefKind::ShutdownDelay => 2,
            RefKind::PendingReuse => 3,
        }
    }
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RefKind::KeepAlive => "keep-alive",
            RefKind::Worker => "worker",
            RefKind::ShutdownDelay => "shutdown-delay",
            RefKind::PendingReuse => "pending-reuse",
        };
        f.write_str(name)
    }
}

/// Counter cell shared between a host and its tokens
#[derive(Debug, Default)]
pub(crate) struct RefCounts {
    counts: [Cell<usize>; 4],
    disabled: Cell<bool>,
    next_keep_alive: Cell<u64>,
    keep_alive_handles: RefCell<BTreeMap<KeepAliveHandleId, TimeTicks>>,
}

impl RefCounts {
    pub(crate) fn get(&self, kind: RefKind) -> usize {
        self.counts[kind.index()].get()
    }

    pub(crate) fn all_zero(&self) -> bool {
        self.counts.iter().all(|count| count.get() == 0)
    }

    pub(crate) fn is_disabled(&self) -> bool {
        self.disabled.get()
    }

    pub(crate) fn disable(&self) {
        self.disabled.set(true);
    }

    pub(crate) fn keep_alive_durations(&self, now: TimeTicks) -> Vec<(KeepAliveHandleId, Duration)> {
        self.keep_alive_handles
            .borrow()
            .iter()
            .map(|(id, start)| (*id, now.saturating_duration_since(*start)))
            .collect()
    }

    fn increment(&self, kind: RefKind) {
        let cell = &self.counts[kind.index()];
        cell.set(cell.get() + 1);
    }

    fn decrement(&self, kind: RefKind) -> usize {
        let cell = &self.counts[kind.index()];
        let current = cell.get();
        assert!(current > 0, "{} ref count went negative", kind);
        cell.set(current - 1);
        current - 1
    }
}

/// One held count; dropping it releases the count
#[must_use = "dropping a RefToken releases the count immediately"]
pub struct RefToken {
    host: HostId,
    kind: RefKind,
    counts: Rc<RefCounts>,
    teardown: TeardownQueue,
    keep_alive: Option<KeepAliveHandleId>,
    active: bool,
}

impl RefToken {
    pub(crate) fn acquire(
        host: HostId,
        kind: RefKind,
        counts: Rc<RefCounts>,
        teardown: TeardownQueue,
        now: TimeTicks,
    ) -> Self {
        let active = !counts.is_disabled();
        let mut keep_alive = None;
        if active {
            counts.increment(kind);
            if kind == RefKind::KeepAlive {
                let id = KeepAliveHandleId(counts.next_keep_alive.get() + 1);
                counts.next_keep_alive.set(id.0);
                counts.keep_alive_handles.borrow_mut().insert(id, now);
                keep_alive = Some(id);
            }
        }
        Self {
            host,
            kind,
            counts,
            teardown,
            keep_alive,
            active,
        }
    }

    pub fn host(&self) -> HostId {
        self.host
    }

    pub fn kind(&self) -> RefKind {
        self.kind
    }

    /// Handle id, for keep-alive tokens
    pub fn keep_alive_handle(&self) -> Option<KeepAliveHandleId> {
        self.keep_alive
    }

    /// Whether this token actually holds a count
    pub fn is_active(&self) -> bool {
        self.active && !self.counts.is_disabled()
    }
}

impl Drop for RefToken {
    fn drop(&mut self) {
        if !self.is_active() {
            return;
        }
        if let Some(id) = self.keep_alive {
            self.counts.keep_alive_handles.borrow_mut().remove(&id);
        }
        self.counts.decrement(self.kind);
        if self.counts.all_zero() {
            self.teardown.borrow_mut().push_back(self.host);
        }
    }
}

impl fmt::Debug for RefToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefToken")
            .field("host", &self.host)
            .field("kind", &self.kind)
            .field("active", &self.is_active())
            .finish()
    }
}
