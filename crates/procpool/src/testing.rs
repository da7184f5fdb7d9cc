//! Test doubles for the launcher, observers and embedder
//!
//! Enabled for this crate's own tests and, through the `test-utils` feature,
//! for downstream integration tests.

use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, HashMap, HashSet},
    time::Duration,
};

use tokio::sync::mpsc::UnboundedSender;
use url::Url;

use crate::{
    embedder::EmbedderHooks,
    error::LaunchError,
    host::{HostObserver, ProcessHost, ProcessPriority, SpareObserver},
    ids::{BrowserContextId, HostId},
    launcher::{
        ChildProcessTerminationInfo, LaunchRequest, LauncherEvent, ProcessLauncher,
        TerminationStatus,
    },
    site::{SiteInfo, StoragePartitionConfig},
};

#[derive(Default)]
struct FakeLauncherState {
    auto_ready: bool,
    fail_launches: bool,
    next_pid: u32,
    senders: BTreeMap<HostId, UnboundedSender<LauncherEvent>>,
    requests: Vec<(HostId, ProcessPriority)>,
    priorities: Vec<(HostId, ProcessPriority)>,
    terminations: Vec<(HostId, i32)>,
}

/// In-memory launcher that records every call
///
/// In auto-ready mode each launch is answered with `Launched` immediately;
/// otherwise the test completes launches with [`FakeLauncher::complete_launch`].
pub struct FakeLauncher {
    state: RefCell<FakeLauncherState>,
}

impl FakeLauncher {
    /// Launches complete as soon as the browser drains its events
    pub fn new() -> Self {
        Self {
            state: RefCell::new(FakeLauncherState {
                auto_ready: true,
                next_pid: 1000,
                ..Default::default()
            }),
        }
    }

    /// Launches stay pending until completed by the test
    pub fn manual() -> Self {
        let launcher = Self::new();
        launcher.state.borrow_mut().auto_ready = false;
        launcher
    }

    /// Make every following launch fail synchronously
    pub fn set_fail_launches(&self, fail: bool) {
        self.state.borrow_mut().fail_launches = fail;
    }

    /// Report a pending launch as complete
    pub fn complete_launch(&self, host: HostId) -> bool {
        let mut state = self.state.borrow_mut();
        state.next_pid += 1;
        let pid = state.next_pid;
        Self::send(&state, host, LauncherEvent::Launched { host, pid })
    }

    /// Report a pending launch as failed
    pub fn fail_launch(&self, host: HostId) -> bool {
        let state = self.state.borrow();
        Self::send(
            &state,
            host,
            LauncherEvent::LaunchFailed {
                host,
                error: LaunchError::SpawnFailed("scripted failure".to_string()),
            },
        )
    }

    /// Report that the process crashed
    pub fn crash(&self, host: HostId) -> bool {
        let state = self.state.borrow();
        Self::send(
            &state,
            host,
            LauncherEvent::Exited {
                host,
                info: ChildProcessTerminationInfo {
                    status: TerminationStatus::ProcessCrashed,
                    exit_code: 139,
                },
            },
        )
    }

    pub fn launched_hosts(&self) -> Vec<HostId> {
        self.state.borrow().requests.iter().map(|(h, _)| *h).collect()
    }

    /// Priority each host was launched with
    pub fn launch_priority(&self, host: HostId) -> Option<ProcessPriority> {
        self.state
            .borrow()
            .requests
            .iter()
            .find(|(h, _)| *h == host)
            .map(|(_, p)| *p)
    }

    /// Priorities pushed after launch, oldest first
    pub fn priorities_for(&self, host: HostId) -> Vec<ProcessPriority> {
        self.state
            .borrow()
            .priorities
            .iter()
            .filter(|(h, _)| *h == host)
            .map(|(_, p)| *p)
            .collect()
    }

    pub fn terminations(&self) -> Vec<(HostId, i32)> {
        self.state.borrow().terminations.clone()
    }

    pub fn was_terminated(&self, host: HostId) -> bool {
        self.state.borrow().terminations.iter().any(|(h, _)| *h == host)
    }

    fn send(state: &FakeLauncherState, host: HostId, event: LauncherEvent) -> bool {
        state
            .senders
            .get(&host)
            .map(|tx| tx.send(event).is_ok())
            .unwrap_or(false)
    }
}

impl Default for FakeLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessLauncher for FakeLauncher {
    fn launch(&self, request: LaunchRequest) -> Result<(), LaunchError> {
        let mut state = self.state.borrow_mut();
        if state.fail_launches {
            return Err(LaunchError::SpawnFailed("launches disabled".to_string()));
        }
        state.requests.push((request.host, request.priority));
        state.senders.insert(request.host, request.events);
        if state.auto_ready {
            state.next_pid += 1;
            let pid = state.next_pid;
            Self::send(&state, request.host, LauncherEvent::Launched { host: request.host, pid });
        }
        Ok(())
    }

    fn set_priority(&self, host: HostId, priority: &ProcessPriority) -> Result<(), LaunchError> {
        self.state.borrow_mut().priorities.push((host, *priority));
        Ok(())
    }

    fn terminate(&self, host: HostId, exit_code: i32) -> Result<(), LaunchError> {
        let mut state = self.state.borrow_mut();
        state.terminations.push((host, exit_code));
        state.senders.remove(&host);
        Ok(())
    }
}

/// An event seen by a [`RecordingObserver`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservedEvent {
    Ready(HostId),
    Exited(HostId, TerminationStatus),
    Destroyed(HostId),
    SpareReady(HostId),
    SparesChanged(Vec<HostId>),
}

/// Observer that keeps every notification in order
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: RefCell<Vec<ObservedEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ObservedEvent> {
        self.events.borrow().clone()
    }

    pub fn exited_count(&self, host: HostId) -> usize {
        self.count(|e| matches!(e, ObservedEvent::Exited(h, _) if *h == host))
    }

    pub fn destroyed_count(&self, host: HostId) -> usize {
        self.count(|e| matches!(e, ObservedEvent::Destroyed(h) if *h == host))
    }

    pub fn ready_count(&self, host: HostId) -> usize {
        self.count(|e| matches!(e, ObservedEvent::Ready(h) if *h == host))
    }

    pub fn spare_ready_count(&self) -> usize {
        self.count(|e| matches!(e, ObservedEvent::SpareReady(_)))
    }

    fn count(&self, predicate: impl Fn(&ObservedEvent) -> bool) -> usize {
        self.events.borrow().iter().filter(|e| predicate(e)).count()
    }
}

impl HostObserver for RecordingObserver {
    fn process_ready(&self, host: HostId) {
        self.events.borrow_mut().push(ObservedEvent::Ready(host));
    }

    fn process_exited(&self, host: HostId, info: &ChildProcessTerminationInfo) {
        self.events
            .borrow_mut()
            .push(ObservedEvent::Exited(host, info.status));
    }

    fn host_destroyed(&self, host: HostId) {
        self.events.borrow_mut().push(ObservedEvent::Destroyed(host));
    }
}

impl SpareObserver for RecordingObserver {
    fn spare_ready(&self, host: HostId) {
        self.events.borrow_mut().push(ObservedEvent::SpareReady(host));
    }

    fn spares_changed(&self, spares: &[HostId]) {
        self.events
            .borrow_mut()
            .push(ObservedEvent::SparesChanged(spares.to_vec()));
    }
}

/// Embedder whose answers are set by the test
#[derive(Debug, Default)]
pub struct ScriptedEmbedder {
    refuse_spares: Cell<bool>,
    try_existing: Cell<bool>,
    unsuitable_hosts: RefCell<HashSet<HostId>>,
    unreusable_hosts: RefCell<HashSet<HostId>>,
    process_per_site: RefCell<HashSet<Url>>,
    partitions: RefCell<HashMap<Url, StoragePartitionConfig>>,
    effective_urls: RefCell<HashMap<Url, Url>>,
    spare_delay: Cell<Option<Duration>>,
    ignored_for_limit: Cell<usize>,
}

impl ScriptedEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse_spares(&self, refuse: bool) {
        self.refuse_spares.set(refuse);
    }

    pub fn try_existing_hosts(&self, enabled: bool) {
        self.try_existing.set(enabled);
    }

    pub fn mark_unsuitable(&self, host: HostId) {
        self.unsuitable_hosts.borrow_mut().insert(host);
    }

    pub fn forbid_reuse(&self, host: HostId) {
        self.unreusable_hosts.borrow_mut().insert(host);
    }

    pub fn use_process_per_site(&self, site_url: Url) {
        self.process_per_site.borrow_mut().insert(site_url);
    }

    pub fn set_partition(&self, site_url: Url, partition: StoragePartitionConfig) {
        self.partitions.borrow_mut().insert(site_url, partition);
    }

    pub fn set_effective_url(&self, url: Url, effective: Url) {
        self.effective_urls.borrow_mut().insert(url, effective);
    }

    pub fn set_spare_delay(&self, delay: Option<Duration>) {
        self.spare_delay.set(delay);
    }

    pub fn ignore_for_limit(&self, count: usize) {
        self.ignored_for_limit.set(count);
    }
}

impl EmbedderHooks for ScriptedEmbedder {
    fn is_suitable_host(&self, host: &ProcessHost, _site_info: &SiteInfo) -> bool {
        !self.unsuitable_hosts.borrow().contains(&host.id())
    }

    fn should_use_spare_render_process_host(
        &self,
        _context: BrowserContextId,
        _site_info: &SiteInfo,
    ) -> bool {
        !self.refuse_spares.get()
    }

    fn should_try_to_use_existing_process_host(
        &self,
        _context: BrowserContextId,
        _site_info: &SiteInfo,
    ) -> bool {
        self.try_existing.get()
    }

    fn may_reuse_host(&self, host: &ProcessHost) -> bool {
        !self.unreusable_hosts.borrow().contains(&host.id())
    }

    fn should_use_process_per_site(&self, _context: BrowserContextId, site_info: &SiteInfo) -> bool {
        self.process_per_site.borrow().contains(site_info.site_url())
    }

    fn storage_partition_config_for_site(
        &self,
        _context: BrowserContextId,
        site_url: &Url,
    ) -> Option<StoragePartitionConfig> {
        self.partitions.borrow().get(site_url).cloned()
    }

    fn effective_url(&self, _context: BrowserContextId, url: &Url) -> Url {
        self.effective_urls
            .borrow()
            .get(url)
            .cloned()
            .unwrap_or_else(|| url.clone())
    }

    fn spare_renderer_delay_for_site(
        &self,
        _context: BrowserContextId,
        _site_url: &Url,
    ) -> Option<Duration> {
        self.spare_delay.get()
    }

    fn process_count_to_ignore_for_limit(&self) -> usize {
        self.ignored_for_limit.get()
    }
}
