//! One [`ProcessHost`] per renderer process
//!
//! The host tracks everything the pool needs to decide whether the process
//! can be reused, how important it is, and when it may go away:
//! - four independent ref counts held through [`RefToken`] guards
//! - attached listeners (frames, widgets)
//! - priority clients and other priority inputs
//! - the site lock and the content flags it was created for
//!
//! Teardown itself is driven by [`crate::browser::Browser`], which owns the
//! hosts and the registries they must leave first.

mod observer;
mod priority;
mod refcount;

use std::{collections::BTreeSet, fmt, rc::Rc, time::Duration};

use procpool_config::Platform;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

pub use observer::{HostObserver, SpareObserver};
pub use priority::{
    ChildProcessImportance, PriorityClient, PriorityClientId, PriorityLevel, ProcessPriority,
};
pub use refcount::{RefKind, RefToken};

pub(crate) use priority::PriorityInputs;
pub(crate) use refcount::{RefCounts, TeardownQueue};

use crate::{
    error::LaunchError,
    ids::{BrowserContextId, HostId, KeepAliveHandleId},
    launcher::{LaunchRequest, LauncherEvent, ProcessLauncher},
    scheduler::TimeTicks,
    site::{ProcessLock, SiteInfo, StoragePartitionConfig},
};

/// Content restrictions a process was created with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct HostFlags {
    pub guest_only: bool,
    pub jit_disabled: bool,
    pub pdf: bool,
    pub v8_optimizations_disabled: bool,
}

impl HostFlags {
    /// Flags a process needs to host `site_info`
    pub fn for_site(site_info: &SiteInfo) -> Self {
        Self {
            guest_only: site_info.is_guest(),
            jit_disabled: site_info.is_jit_disabled(),
            pdf: site_info.is_pdf(),
            v8_optimizations_disabled: site_info.are_v8_optimizations_disabled(),
        }
    }

    /// Whether these flags are exactly what `site_info` needs
    pub fn matches_site(&self, site_info: &SiteInfo) -> bool {
        *self == Self::for_site(site_info)
    }
}

/// Lifecycle of the OS process behind a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostState {
    Created,
    Launching,
    Ready,
    Dead,
}

/// Why a host is still alive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum DelayShutdownReason {
    NoDelay = 0,
    SingleProcess = 2,
    NoProcess = 3,
    Unload = 4,
    FetchKeepAlive = 5,
    Worker = 6,
    PendingReuse = 7,
    ShutdownDelay = 8,
    Listener = 9,
}

/// Handle for an attached listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ListenerId(pub u64);

/// Browser-side handle to one renderer process
pub struct ProcessHost {
    id: HostId,
    browser_context: BrowserContextId,
    storage_partition: StoragePartitionConfig,
    flags: HostFlags,
    platform: Platform,
    process_lock: ProcessLock,
    state: HostState,
    pid: Option<u32>,
    refs: Rc<RefCounts>,
    teardown: TeardownQueue,
    listeners: BTreeSet<ListenerId>,
    next_listener: u64,
    priority_inputs: PriorityInputs,
    priority: ProcessPriority,
    launcher: Rc<dyn ProcessLauncher>,
    observers: Vec<Rc<dyn HostObserver>>,
    sudden_termination_allowed: bool,
    is_unused: bool,
    shutdown_requested: bool,
    fast_shutdown_started: bool,
    exit_notified: bool,
    created_at: TimeTicks,
}

impl ProcessHost {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: HostId,
        browser_context: BrowserContextId,
        storage_partition: StoragePartitionConfig,
        flags: HostFlags,
        platform: Platform,
        launcher: Rc<dyn ProcessLauncher>,
        teardown: TeardownQueue,
        now: TimeTicks,
    ) -> Self {
        Self {
            id,
            browser_context,
            storage_partition,
            flags,
            platform,
            process_lock: ProcessLock::Unlocked,
            state: HostState::Created,
            pid: None,
            refs: Rc::new(RefCounts::default()),
            teardown,
            listeners: BTreeSet::new(),
            next_listener: 0,
            priority_inputs: PriorityInputs::default(),
            priority: ProcessPriority::default(),
            launcher,
            observers: Vec::new(),
            sudden_termination_allowed: true,
            is_unused: true,
            shutdown_requested: false,
            fast_shutdown_started: false,
            exit_notified: false,
            created_at: now,
        }
    }

    pub fn id(&self) -> HostId {
        self.id
    }

    pub fn browser_context(&self) -> BrowserContextId {
        self.browser_context
    }

    pub fn storage_partition(&self) -> &StoragePartitionConfig {
        &self.storage_partition
    }

    pub fn flags(&self) -> HostFlags {
        self.flags
    }

    pub fn state(&self) -> HostState {
        self.state
    }

    /// OS process id, once launched
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn created_at(&self) -> TimeTicks {
        self.created_at
    }

    pub fn is_ready(&self) -> bool {
        self.state == HostState::Ready
    }

    pub fn is_dead(&self) -> bool {
        self.state == HostState::Dead
    }

    /// Whether the process is launching or running
    pub fn has_process(&self) -> bool {
        matches!(self.state, HostState::Launching | HostState::Ready)
    }

    /// True until the host is handed out for content
    pub fn is_unused(&self) -> bool {
        self.is_unused
    }

    pub(crate) fn mark_used(&mut self) {
        self.is_unused = false;
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested
    }

    pub fn fast_shutdown_started(&self) -> bool {
        self.fast_shutdown_started
    }

    pub(crate) fn set_fast_shutdown_started(&mut self) {
        self.fast_shutdown_started = true;
    }

    pub fn sudden_termination_allowed(&self) -> bool {
        self.sudden_termination_allowed
    }

    /// Set to false while the renderer has unload handlers that must run
    pub fn set_sudden_termination_allowed(&mut self, allowed: bool) {
        self.sudden_termination_allowed = allowed;
    }

    pub fn process_lock(&self) -> &ProcessLock {
        &self.process_lock
    }

    /// Commit the process to `lock`
    ///
    /// # Panics
    ///
    /// Panics when the process already holds a different lock.
    pub fn set_process_lock(&mut self, lock: ProcessLock) {
        if self.process_lock == lock {
            return;
        }
        assert!(
            self.process_lock.is_unlocked(),
            "{} is locked to {} and cannot be relocked to {}",
            self.id,
            self.process_lock,
            lock
        );
        debug!(host = %self.id, lock = %lock, "Process locked");
        self.process_lock = lock;
    }

    // Launch lifecycle

    pub(crate) fn launch(&mut self, events: UnboundedSender<LauncherEvent>) -> Result<(), LaunchError> {
        assert_eq!(self.state, HostState::Created, "{} launched twice", self.id);
        self.state = HostState::Launching;
        let request = LaunchRequest {
            host: self.id,
            browser_context: self.browser_context,
            flags: self.flags,
            priority: self.priority,
            events,
        };
        if let Err(e) = self.launcher.launch(request) {
            self.state = HostState::Dead;
            return Err(e);
        }
        debug!(host = %self.id, context = %self.browser_context, "Launch requested");
        Ok(())
    }

    /// Returns false when the event is stale
    pub(crate) fn on_launched(&mut self, pid: u32) -> bool {
        if self.state != HostState::Launching {
            return false;
        }
        self.state = HostState::Ready;
        self.pid = Some(pid);
        debug!(host = %self.id, pid, "Process ready");
        self.push_priority();
        true
    }

    /// Returns true if the host was alive before
    pub(crate) fn mark_dead(&mut self) -> bool {
        let was_alive = self.state != HostState::Dead;
        self.state = HostState::Dead;
        self.pid = None;
        was_alive
    }

    /// True exactly once per host
    pub(crate) fn take_exit_notification(&mut self) -> bool {
        !std::mem::replace(&mut self.exit_notified, true)
    }

    pub(crate) fn request_shutdown(&mut self) {
        self.shutdown_requested = true;
    }

    /// Stop the OS process; no-op when there is none
    pub(crate) fn terminate(&mut self, exit_code: i32) -> bool {
        if !self.has_process() {
            return false;
        }
        if let Err(e) = self.launcher.terminate(self.id, exit_code) {
            warn!(host = %self.id, error = %e, "Failed to terminate process");
        }
        self.mark_dead()
    }

    // Ref counts

    pub fn ref_count(&self, kind: RefKind) -> usize {
        self.refs.get(kind)
    }

    pub fn are_all_ref_counts_zero(&self) -> bool {
        self.refs.all_zero()
    }

    pub fn are_ref_counts_disabled(&self) -> bool {
        self.refs.is_disabled()
    }

    pub(crate) fn acquire(&self, kind: RefKind, now: TimeTicks) -> RefToken {
        RefToken::acquire(self.id, kind, self.refs.clone(), self.teardown.clone(), now)
    }

    pub(crate) fn disable_ref_counts(&mut self) {
        self.refs.disable();
    }

    /// How long each outstanding keep-alive handle has been held
    pub fn keep_alive_durations(&self, now: TimeTicks) -> Vec<(KeepAliveHandleId, Duration)> {
        self.refs.keep_alive_durations(now)
    }

    // Listeners

    pub(crate) fn add_listener(&mut self) -> ListenerId {
        self.next_listener += 1;
        let id = ListenerId(self.next_listener);
        self.listeners.insert(id);
        id
    }

    pub(crate) fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(&id)
    }

    pub fn has_listeners(&self) -> bool {
        !self.listeners.is_empty()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// All ref counts are zero (or frozen) and nothing is attached
    pub fn is_eligible_for_teardown(&self) -> bool {
        (self.refs.is_disabled() || self.refs.all_zero()) && self.listeners.is_empty()
    }

    /// First reason, if any, that keeps the host from shutting down
    pub fn delay_shutdown_reason(&self, single_process: bool) -> DelayShutdownReason {
        if single_process {
            return DelayShutdownReason::SingleProcess;
        }
        if !self.has_process() {
            return DelayShutdownReason::NoProcess;
        }
        if self.has_listeners() {
            return DelayShutdownReason::Listener;
        }
        if !self.sudden_termination_allowed {
            return DelayShutdownReason::Unload;
        }
        if self.refs.is_disabled() {
            return DelayShutdownReason::NoDelay;
        }
        if self.ref_count(RefKind::KeepAlive) > 0 {
            return DelayShutdownReason::FetchKeepAlive;
        }
        if self.ref_count(RefKind::Worker) > 0 {
            return DelayShutdownReason::Worker;
        }
        if self.ref_count(RefKind::PendingReuse) > 0 {
            return DelayShutdownReason::PendingReuse;
        }
        if self.ref_count(RefKind::ShutdownDelay) > 0 {
            return DelayShutdownReason::ShutdownDelay;
        }
        DelayShutdownReason::NoDelay
    }

    // Priority

    pub fn priority(&self) -> ProcessPriority {
        self.priority
    }

    pub fn add_priority_client(&mut self, client: PriorityClient) -> PriorityClientId {
        self.priority_inputs.next_client += 1;
        let id = PriorityClientId(self.priority_inputs.next_client);
        self.priority_inputs.clients.insert(id, client);
        self.refresh_priority();
        id
    }

    /// Returns false for an unknown client
    pub fn update_priority_client(&mut self, id: PriorityClientId, client: PriorityClient) -> bool {
        match self.priority_inputs.clients.get_mut(&id) {
            Some(existing) => {
                *existing = client;
                self.refresh_priority();
                true
            }
            None => false,
        }
    }

    pub fn remove_priority_client(&mut self, id: PriorityClientId) -> bool {
        let removed = self.priority_inputs.clients.remove(&id).is_some();
        if removed {
            self.refresh_priority();
        }
        removed
    }

    pub fn on_media_stream_added(&mut self) {
        self.priority_inputs.media_streams += 1;
        self.refresh_priority();
    }

    pub fn on_media_stream_removed(&mut self) {
        let count = &mut self.priority_inputs.media_streams;
        assert!(*count > 0, "media stream count went negative");
        *count -= 1;
        self.refresh_priority();
    }

    pub fn on_foreground_service_worker_added(&mut self) {
        self.priority_inputs.foreground_service_workers += 1;
        self.refresh_priority();
    }

    pub fn on_foreground_service_worker_removed(&mut self) {
        let count = &mut self.priority_inputs.foreground_service_workers;
        assert!(*count > 0, "foreground service worker count went negative");
        *count -= 1;
        self.refresh_priority();
    }

    pub fn add_loading_boost(&mut self) {
        self.priority_inputs.loading_boosts += 1;
        self.refresh_priority();
    }

    pub fn remove_loading_boost(&mut self) {
        let count = &mut self.priority_inputs.loading_boosts;
        assert!(*count > 0, "loading boost count went negative");
        *count -= 1;
        self.refresh_priority();
    }

    pub fn set_immersive_xr(&mut self, active: bool) {
        self.priority_inputs.immersive_xr = active;
        self.refresh_priority();
    }

    pub fn set_priority_override(&mut self, level: Option<PriorityLevel>) {
        self.priority_inputs.override_level = level;
        self.refresh_priority();
    }

    pub fn has_priority_override(&self) -> bool {
        self.priority_inputs.override_level.is_some()
    }

    pub(crate) fn set_spare_priority(&mut self, spare: bool) {
        self.priority_inputs.spare = spare;
        self.refresh_priority();
    }

    fn refresh_priority(&mut self) {
        let priority = self.priority_inputs.compute(self.platform);
        if priority == self.priority {
            return;
        }
        self.priority = priority;
        if self.is_ready() {
            self.push_priority();
        }
    }

    fn push_priority(&self) {
        if let Err(e) = self.launcher.set_priority(self.id, &self.priority) {
            warn!(host = %self.id, error = %e, "Failed to update process priority");
        }
    }

    // Observers

    pub fn add_observer(&mut self, observer: Rc<dyn HostObserver>) {
        self.observers.push(observer);
    }

    pub fn remove_observer(&mut self, observer: &Rc<dyn HostObserver>) -> bool {
        let target = Rc::as_ptr(observer) as *const ();
        let before = self.observers.len();
        self.observers
            .retain(|o| Rc::as_ptr(o) as *const () != target);
        before != self.observers.len()
    }

    pub(crate) fn observers_snapshot(&self) -> Vec<Rc<dyn HostObserver>> {
        self.observers.clone()
    }
}

impl fmt::Debug for ProcessHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHost")
            .field("id", &self.id)
            .field("browser_context", &self.browser_context)
            .field("state", &self.state)
            .field("lock", &self.process_lock)
            .field("flags", &self.flags)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
