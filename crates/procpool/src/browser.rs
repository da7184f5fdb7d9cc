//! The browser-process root that owns every pool component
//!
//! There are no globals: the task runner, hosts, registries, spare pool and
//! metrics all live in one [`Browser`], and every timer is a task that gets
//! `&mut Browser` when it runs.

use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet, VecDeque},
    rc::Rc,
    time::Duration,
};

use procpool_config::{Platform, PoolConfig};
use rand::{rngs::StdRng, SeedableRng};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    context::BrowserContext,
    embedder::{DefaultEmbedder, EmbedderHooks},
    error::{PoolError, Result},
    host::{HostFlags, HostObserver, ProcessHost, TeardownQueue},
    ids::{BrowserContextId, HostId, IdGenerator},
    launcher::{ChildProcessTerminationInfo, LauncherEvent, ProcessLauncher, TerminationStatus},
    metrics::Metrics,
    reuse::ReuseRegistry,
    scheduler::{TaskId, TaskRunner, TimeTicks},
    site::{site_for_url, SiteInfo, SiteInstance, StoragePartitionConfig},
    spare::{SpareManager, SparePool},
};

/// Memory a renderer is assumed to need when deriving the process limit
const ESTIMATED_RENDERER_MEMORY_MB: u64 = 60;
/// Bounds of the derived process limit
const MIN_RENDERER_PROCESS_COUNT: usize = 3;
const MAX_RENDERER_PROCESS_COUNT: usize = 82;

/// Owner of the allocation subsystem and its sequence
pub struct Browser {
    pub(crate) config: PoolConfig,
    pub(crate) runner: TaskRunner<Browser>,
    pub(crate) launcher: Rc<dyn ProcessLauncher>,
    pub(crate) embedder: Rc<dyn EmbedderHooks>,
    pub(crate) metrics: Metrics,
    pub(crate) contexts: BTreeMap<BrowserContextId, BrowserContext>,
    pub(crate) hosts: BTreeMap<HostId, ProcessHost>,
    pub(crate) registry: ReuseRegistry,
    pub(crate) spare: SparePool,
    pub(crate) teardown: TeardownQueue,
    pub(crate) rng: StdRng,
    pub(crate) browser_idle: bool,
    pub(crate) physical_memory_mb: u64,
    events_tx: UnboundedSender<LauncherEvent>,
    events_rx: UnboundedReceiver<LauncherEvent>,
    host_ids: IdGenerator,
    context_ids: IdGenerator,
    max_process_count_override: Option<usize>,
    process_per_site: BTreeSet<Url>,
}

impl Browser {
    /// Build a browser from a resolved configuration
    pub fn new(config: PoolConfig, launcher: Rc<dyn ProcessLauncher>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let process_per_site = config
            .process
            .process_per_site
            .iter()
            .filter_map(|site| match Url::parse(site) {
                Ok(url) => Some(site_for_url(&url)),
                Err(e) => {
                    warn!(site = %site, error = %e, "Ignoring invalid process-per-site entry");
                    None
                }
            })
            .collect();

        Self {
            spare: SparePool::new(config.spare.clone(), config.process.platform),
            physical_memory_mb: config.process.physical_memory_mb,
            max_process_count_override: config.process.max_renderer_process_count,
            config,
            runner: TaskRunner::new(),
            launcher,
            embedder: Rc::new(DefaultEmbedder),
            metrics: Metrics::new(),
            contexts: BTreeMap::new(),
            hosts: BTreeMap::new(),
            registry: ReuseRegistry::new(),
            teardown: Rc::new(RefCell::new(VecDeque::new())),
            rng: StdRng::from_entropy(),
            browser_idle: true,
            events_tx,
            events_rx,
            host_ids: IdGenerator::default(),
            context_ids: IdGenerator::default(),
            process_per_site,
        }
    }

    pub fn with_embedder(mut self, embedder: Rc<dyn EmbedderHooks>) -> Self {
        self.embedder = embedder;
        self
    }

    /// Make random host selection reproducible
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn embedder(&self) -> &dyn EmbedderHooks {
        self.embedder.as_ref()
    }

    pub fn spare_manager(&mut self) -> SpareManager<'_> {
        SpareManager::new(self)
    }

    pub fn reuse_registry(&self) -> &ReuseRegistry {
        &self.registry
    }

    // Browser contexts

    pub fn create_browser_context(
        &mut self,
        name: impl Into<String>,
        off_the_record: bool,
    ) -> BrowserContextId {
        let id = BrowserContextId(self.context_ids.next());
        let context = BrowserContext::new(id, name, off_the_record);
        info!(context = %id, name = %context.name(), "Browser context created");
        self.contexts.insert(id, context);
        id
    }

    /// Shut a context down; pending spare work for it is cancelled
    pub fn destroy_browser_context(&mut self, context: BrowserContextId) -> Result<()> {
        let entry = self
            .contexts
            .get_mut(&context)
            .ok_or(PoolError::UnknownBrowserContext(context))?;
        if entry.is_destroyed() {
            return Err(PoolError::BrowserContextDestroyed(context));
        }
        entry.mark_destroyed();
        info!(context = %context, "Browser context destroyed");
        self.spare_manager().on_context_destroyed(context);
        self.registry.remove_context(context);
        Ok(())
    }

    pub fn context(&self, context: BrowserContextId) -> Option<&BrowserContext> {
        self.contexts.get(&context)
    }

    pub fn is_context_alive(&self, context: BrowserContextId) -> bool {
        self.contexts
            .get(&context)
            .is_some_and(|c| !c.is_destroyed())
    }

    pub(crate) fn check_context(&self, context: BrowserContextId) -> Result<&BrowserContext> {
        let entry = self
            .contexts
            .get(&context)
            .ok_or(PoolError::UnknownBrowserContext(context))?;
        if entry.is_destroyed() {
            return Err(PoolError::BrowserContextDestroyed(context));
        }
        Ok(entry)
    }

    // Hosts

    pub fn host(&self, id: HostId) -> Option<&ProcessHost> {
        self.hosts.get(&id)
    }

    pub fn host_mut(&mut self, id: HostId) -> Option<&mut ProcessHost> {
        self.hosts.get_mut(&id)
    }

    pub fn host_ids(&self) -> Vec<HostId> {
        self.hosts.keys().copied().collect()
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    pub fn add_host_observer(&mut self, host: HostId, observer: Rc<dyn HostObserver>) -> Result<()> {
        self.hosts
            .get_mut(&host)
            .ok_or(PoolError::UnknownHost(host))?
            .add_observer(observer);
        Ok(())
    }

    /// Create and launch a host
    pub(crate) fn create_host(
        &mut self,
        context: BrowserContextId,
        storage_partition: StoragePartitionConfig,
        flags: HostFlags,
        is_spare: bool,
    ) -> Result<HostId> {
        self.check_context(context)?;
        let id = HostId(self.host_ids.next());
        let mut host = ProcessHost::new(
            id,
            context,
            storage_partition,
            flags,
            self.config.process.platform,
            self.launcher.clone(),
            self.teardown.clone(),
            self.runner.now(),
        );
        if is_spare {
            host.set_spare_priority(true);
        }
        host.launch(self.events_tx.clone())?;
        debug!(host = %id, context = %context, spare = is_spare, "Process host created");
        self.hosts.insert(id, host);
        Ok(id)
    }

    // Reuse tracking

    pub fn add_frame_with_site(&mut self, host: HostId, site_info: &SiteInfo) -> Result<()> {
        let context = self.host_context(host)?;
        self.registry.add_frame_with_site(context, site_info.site_url(), host);
        Ok(())
    }

    pub fn remove_frame_with_site(&mut self, host: HostId, site_info: &SiteInfo) -> Result<bool> {
        let context = self.host_context(host)?;
        Ok(self
            .registry
            .remove_frame_with_site(context, site_info.site_url(), host))
    }

    pub fn add_expected_navigation_to_site(&mut self, host: HostId, site_info: &SiteInfo) -> Result<()> {
        let context = self.host_context(host)?;
        self.registry
            .add_expected_navigation_to_site(context, site_info.site_url(), host);
        Ok(())
    }

    pub fn remove_expected_navigation_to_site(
        &mut self,
        host: HostId,
        site_info: &SiteInfo,
    ) -> Result<bool> {
        let context = self.host_context(host)?;
        Ok(self
            .registry
            .remove_expected_navigation_to_site(context, site_info.site_url(), host))
    }

    fn host_context(&self, host: HostId) -> Result<BrowserContextId> {
        self.hosts
            .get(&host)
            .map(|h| h.browser_context())
            .ok_or(PoolError::UnknownHost(host))
    }

    // Sites

    /// Resolve a URL to a site instance in `context`
    ///
    /// The site comes from the embedder's effective URL while the lock URL
    /// comes from the URL itself.
    pub fn site_instance_for_url(&self, context: BrowserContextId, url: &Url) -> Result<SiteInstance> {
        let entry = self.check_context(context)?;
        let effective = self.embedder.effective_url(context, url);
        let site_url = site_for_url(&effective);
        let lock_url = site_for_url(url);
        let partition = self
            .embedder
            .storage_partition_config_for_site(context, &site_url)
            .unwrap_or_else(|| entry.default_storage_partition());
        let site_info = SiteInfo::new(site_url, partition).with_lock_url(lock_url);
        Ok(SiteInstance::new(context, site_info))
    }

    /// Whether the site gets a process locked to it
    pub fn requires_dedicated_process(&self, site_info: &SiteInfo) -> bool {
        self.config.process.site_per_process
            && !self.config.process.single_process
            && !site_info.is_empty_site()
    }

    /// Whether the site instance shares one process per site
    pub fn uses_process_per_site(&self, site_instance: &SiteInstance) -> bool {
        let site_info = &site_instance.site_info;
        if site_info.is_empty_site() {
            return false;
        }
        site_instance.reuse_policy == crate::site::ProcessReusePolicy::ProcessPerSite
            || self.process_per_site.contains(site_info.site_url())
            || self
                .embedder
                .should_use_process_per_site(site_instance.browser_context, site_info)
    }

    // Process limit

    /// Override the process limit; zero restores the platform default
    pub fn set_max_renderer_process_count(&mut self, count: usize) {
        self.max_process_count_override = (count > 0).then_some(count);
        debug!(limit = self.max_renderer_process_count(), "Renderer process limit set");
    }

    pub fn max_renderer_process_count(&self) -> usize {
        self.max_process_count_override
            .unwrap_or_else(|| Self::platform_max_renderer_process_count(self.physical_memory_mb))
    }

    /// Limit derived from physical memory: half of it split between renderers
    pub fn platform_max_renderer_process_count(physical_memory_mb: u64) -> usize {
        let count = physical_memory_mb / 2 / ESTIMATED_RENDERER_MEMORY_MB;
        (count as usize).clamp(MIN_RENDERER_PROCESS_COUNT, MAX_RENDERER_PROCESS_COUNT)
    }

    /// Live hosts, minus those the embedder asks to ignore
    pub fn process_count_for_limit(&self) -> usize {
        let live = self.hosts.values().filter(|h| !h.is_dead()).count();
        live.saturating_sub(self.embedder.process_count_to_ignore_for_limit())
    }

    pub fn is_process_limit_reached(&self) -> bool {
        self.process_count_for_limit() >= self.max_renderer_process_count()
    }

    // Environment signals

    pub fn set_browser_idle(&mut self, idle: bool) {
        self.browser_idle = idle;
        if idle {
            self.spare_manager().on_browser_idle();
        }
    }

    pub fn is_browser_idle(&self) -> bool {
        self.browser_idle
    }

    pub fn set_physical_memory_mb(&mut self, memory_mb: u64) {
        self.physical_memory_mb = memory_mb;
        self.spare_manager().on_memory_updated();
    }

    pub fn physical_memory_mb(&self) -> u64 {
        self.physical_memory_mb
    }

    pub fn platform(&self) -> Platform {
        self.config.process.platform
    }

    // Sequence

    pub fn now(&self) -> TimeTicks {
        self.runner.now()
    }

    pub fn post_delayed_task(
        &mut self,
        delay: Duration,
        task: impl FnOnce(&mut Browser) + 'static,
    ) -> TaskId {
        self.runner.post_delayed_task(delay, task)
    }

    pub fn cancel_task(&mut self, task: TaskId) -> bool {
        self.runner.cancel(task)
    }

    /// Deadline of the next queued task
    pub fn next_task_deadline(&mut self) -> Option<TimeTicks> {
        self.runner.next_deadline()
    }

    pub(crate) fn advance_clock_to(&mut self, time: TimeTicks) {
        self.runner.advance_to(time);
    }

    /// Run launcher events, teardown evaluations and due tasks until none
    /// are left, without moving the clock
    pub fn run_until_idle(&mut self) {
        loop {
            let mut progressed = false;
            while let Ok(event) = self.events_rx.try_recv() {
                self.handle_launcher_event(event);
                progressed = true;
            }
            progressed |= self.process_teardown_queue();
            if let Some(task) = self.runner.pop_ready() {
                task(self);
                progressed = true;
            }
            if !progressed {
                break;
            }
        }
    }

    /// Advance the virtual clock by `delta`, running everything that comes
    /// due along the way
    pub fn fast_forward_by(&mut self, delta: Duration) {
        let end = self.now() + delta;
        self.run_until_idle();
        while let Some(deadline) = self.runner.next_deadline() {
            if deadline > end {
                break;
            }
            self.runner.advance_to(deadline);
            self.run_until_idle();
        }
        self.runner.advance_to(end);
        self.run_until_idle();
    }

    /// Wait for the next launcher event
    pub(crate) async fn recv_event(&mut self) -> Option<LauncherEvent> {
        self.events_rx.recv().await
    }

    pub(crate) fn handle_launcher_event(&mut self, event: LauncherEvent) {
        match event {
            LauncherEvent::Launched { host, pid } => {
                let Some(entry) = self.hosts.get_mut(&host) else {
                    return;
                };
                if !entry.on_launched(pid) {
                    return;
                }
                let observers = entry.observers_snapshot();
                self.spare_manager().on_host_launched(host);
                for observer in observers {
                    observer.process_ready(host);
                }
            }
            LauncherEvent::LaunchFailed { host, error } => {
                warn!(host = %host, error = %error, "Renderer launch failed");
                self.on_process_gone(
                    host,
                    ChildProcessTerminationInfo {
                        status: TerminationStatus::LaunchFailed,
                        exit_code: -1,
                    },
                );
            }
            LauncherEvent::Exited { host, info } => {
                debug!(host = %host, status = ?info.status, code = info.exit_code, "Renderer exited");
                self.on_process_gone(host, info);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeLauncher, ScriptedEmbedder};

    fn browser() -> (Browser, Rc<FakeLauncher>) {
        let launcher = Rc::new(FakeLauncher::new());
        (Browser::new(PoolConfig::default(), launcher.clone()), launcher)
    }

    #[test]
    fn test_platform_limit_is_clamped() {
        assert_eq!(Browser::platform_max_renderer_process_count(256), 3);
        assert_eq!(Browser::platform_max_renderer_process_count(8_192), 68);
        assert_eq!(Browser::platform_max_renderer_process_count(1 << 20), 82);
    }

    #[test]
    fn test_zero_restores_default_limit() {
        let (mut browser, _) = browser();
        browser.set_max_renderer_process_count(2);
        assert_eq!(browser.max_renderer_process_count(), 2);
        browser.set_max_renderer_process_count(0);
        assert_eq!(browser.max_renderer_process_count(), 68);
    }

    #[test]
    fn test_destroy_context_twice() {
        let (mut browser, _) = browser();
        let ctx = browser.create_browser_context("default", false);
        browser.destroy_browser_context(ctx).unwrap();
        assert!(!browser.is_context_alive(ctx));
        assert!(matches!(
            browser.destroy_browser_context(ctx),
            Err(PoolError::BrowserContextDestroyed(_))
        ));
        assert!(matches!(
            browser.destroy_browser_context(BrowserContextId(99)),
            Err(PoolError::UnknownBrowserContext(_))
        ));
    }

    #[test]
    fn test_site_instance_uses_effective_url_for_site() {
        let launcher = Rc::new(FakeLauncher::new());
        let embedder = Rc::new(ScriptedEmbedder::new());
        let url = Url::parse("https://app.hosted.com/start").unwrap();
        embedder.set_effective_url(url.clone(), Url::parse("chrome-app://store.example/").unwrap());
        let mut browser = Browser::new(PoolConfig::default(), launcher).with_embedder(embedder);
        let ctx = browser.create_browser_context("default", true);

        let instance = browser.site_instance_for_url(ctx, &url).unwrap();
        assert_eq!(instance.site_info.site_url().as_str(), "chrome-app://store.example/");
        assert_eq!(instance.site_info.process_lock_url().as_str(), "https://hosted.com/");
        assert!(instance.site_info.storage_partition().in_memory);
    }

    #[test]
    fn test_launch_failure_surfaces_as_error() {
        let (mut browser, launcher) = browser();
        let ctx = browser.create_browser_context("default", false);
        launcher.set_fail_launches(true);
        let result = browser.create_host(ctx, StoragePartitionConfig::default(), HostFlags::default(), false);
        assert!(matches!(result, Err(PoolError::Launch(_))));
        assert_eq!(browser.host_count(), 0);
    }

    #[test]
    fn test_fast_forward_runs_due_tasks_in_order() {
        let (mut browser, _) = browser();
        let log = Rc::new(RefCell::new(Vec::new()));
        for (delay, tag) in [(3, "c"), (1, "a"), (2, "b")] {
            let log = log.clone();
            browser.post_delayed_task(Duration::from_secs(delay), move |browser: &mut Browser| {
                log.borrow_mut().push((tag, browser.now().since_origin().as_secs()));
            });
        }
        browser.fast_forward_by(Duration::from_secs(2));
        assert_eq!(*log.borrow(), vec![("a", 1), ("b", 2)]);
        assert_eq!(browser.now().since_origin(), Duration::from_secs(2));

        browser.fast_forward_by(Duration::from_secs(5));
        assert_eq!(log.borrow().len(), 3);
    }
}
