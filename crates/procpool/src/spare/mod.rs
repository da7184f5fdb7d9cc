//! Pre-warmed ("spare") renderer processes
//!
//! The pool holds 0..N launched hosts for a single browser context. The
//! primary spare may carry a deadline after which the whole pool is torn
//! down; extra spares are started one at a time as earlier ones become ready.
//! Every outcome is recorded as a reason code rather than an error.

mod manager;

use std::rc::Rc;

use procpool_config::{Platform, SpareConfig};
use serde::{Deserialize, Serialize};

pub use manager::SpareManager;

use crate::{
    allocation::ProcessAllocationContext,
    host::SpareObserver,
    ids::{BrowserContextId, HostId},
    scheduler::{TaskId, TimeTicks},
};

/// Launch state of a pooled spare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpareState {
    Launching,
    Ready,
}

/// One pooled spare
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpareEntry {
    pub host: HostId,
    pub state: SpareState,
    pub launch_requested_at: TimeTicks,
    /// False for auto-replenished extra spares
    pub primary: bool,
}

/// Why an allocation attempt could not use a spare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum NoSpareRendererReason {
    NotYetCreatedFirstLaunch = 0,
    NotYetCreatedAfterWarmup = 1,
    TakenByPreviousNavigation = 2,
    Timeout = 3,
    ProcessLimit = 4,
    ProcessExited = 5,
    MemoryPressure = 6,
    AppBackgrounded = 7,
    ContextDestroyed = 8,
    MismatchedBrowserContext = 9,
    MismatchedStoragePartition = 10,
    RefusedByEmbedder = 11,
    RefusedBySiteInstance = 12,
    RefusedNonNavigation = 13,
    IncompatibleProcessFlags = 14,
}

impl NoSpareRendererReason {
    /// Name used as a histogram suffix
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotYetCreatedFirstLaunch => "NotYetCreatedFirstLaunch",
            Self::NotYetCreatedAfterWarmup => "NotYetCreatedAfterWarmup",
            Self::TakenByPreviousNavigation => "TakenByPreviousNavigation",
            Self::Timeout => "Timeout",
            Self::ProcessLimit => "ProcessLimit",
            Self::ProcessExited => "ProcessExited",
            Self::MemoryPressure => "MemoryPressure",
            Self::AppBackgrounded => "AppBackgrounded",
            Self::ContextDestroyed => "ContextDestroyed",
            Self::MismatchedBrowserContext => "MismatchedBrowserContext",
            Self::MismatchedStoragePartition => "MismatchedStoragePartition",
            Self::RefusedByEmbedder => "RefusedByEmbedder",
            Self::RefusedBySiteInstance => "RefusedBySiteInstance",
            Self::RefusedNonNavigation => "RefusedNonNavigation",
            Self::IncompatibleProcessFlags => "IncompatibleProcessFlags",
        }
    }
}

/// What happened to a spare that left the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum SpareRendererDispatchResult {
    Used = 0,
    Overridden = 1,
    Timeout = 2,
    Killed = 3,
}

/// Outcome of one `maybe_take_spare` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum SpareProcessMaybeTakeAction {
    NoSparePresent = 0,
    MismatchedBrowserContext = 1,
    MismatchedStoragePartition = 2,
    RefusedByEmbedder = 3,
    SpareTaken = 4,
    RefusedBySiteInstance = 5,
    RefusedForPdfContent = 6,
    RefusedForJitMismatch = 7,
    RefusedForV8OptimizationMismatch = 8,
    RefusedNonNavigation = 9,
}

/// Foreground state reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplicationState {
    Foreground,
    Background,
}

/// System memory pressure
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MemoryPressureLevel {
    None,
    Moderate,
    Critical,
}

/// When the pool tears itself down if nobody takes a spare
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SpareDeadline {
    Never,
    At { when: TimeTicks, task: TaskId },
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct DeferredCreation {
    pub(crate) task: TaskId,
    pub(crate) context: BrowserContextId,
    pub(crate) scheduled_at: TimeTicks,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Replenishment {
    pub(crate) context: BrowserContextId,
    /// A taken spare that has not finished launching yet
    pub(crate) waiting_for: Option<HostId>,
}

/// Spare pool state owned by the browser
pub(crate) struct SparePool {
    pub(crate) config: SpareConfig,
    pub(crate) platform: Platform,
    pub(crate) entries: Vec<SpareEntry>,
    pub(crate) context: Option<BrowserContextId>,
    pub(crate) deadline: Option<SpareDeadline>,
    pub(crate) deferred: Option<DeferredCreation>,
    pub(crate) replenish: Option<Replenishment>,
    pub(crate) extra_pending: bool,
    pub(crate) absence_reason: NoSpareRendererReason,
    pub(crate) previously_taken: Option<ProcessAllocationContext>,
    pub(crate) observers: Vec<Rc<dyn SpareObserver>>,
}

impl SparePool {
    pub(crate) fn new(config: SpareConfig, platform: Platform) -> Self {
        Self {
            config,
            platform,
            entries: Vec::new(),
            context: None,
            deadline: None,
            deferred: None,
            replenish: None,
            extra_pending: false,
            absence_reason: NoSpareRendererReason::NotYetCreatedFirstLaunch,
            previously_taken: None,
            observers: Vec::new(),
        }
    }

    pub(crate) fn target_count(&self) -> usize {
        self.config.target_spare_count()
    }

    pub(crate) fn contains(&self, host: HostId) -> bool {
        self.entries.iter().any(|e| e.host == host)
    }

    pub(crate) fn hosts(&self) -> Vec<HostId> {
        self.entries.iter().map(|e| e.host).collect()
    }

    /// Remove an entry, promoting the next one when the primary leaves
    pub(crate) fn remove(&mut self, host: HostId) -> Option<SpareEntry> {
        let index = self.entries.iter().position(|e| e.host == host)?;
        let entry = self.entries.remove(index);
        if entry.primary {
            if let Some(next) = self.entries.first_mut() {
                next.primary = true;
            }
        }
        if self.entries.is_empty() {
            self.context = None;
        }
        Some(entry)
    }
}
