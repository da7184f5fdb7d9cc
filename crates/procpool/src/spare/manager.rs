use std::{
    collections::BTreeSet,
    rc::Rc,
    time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use super::{
    ApplicationState, DeferredCreation, MemoryPressureLevel, NoSpareRendererReason, Replenishment,
    SpareDeadline, SpareEntry, SpareProcessMaybeTakeAction, SpareRendererDispatchResult,
    SpareState, SparePool,
};
use crate::{
    allocation::ProcessAllocationContext,
    browser::Browser,
    host::{HostFlags, SpareObserver},
    ids::{BrowserContextId, HostId},
    metrics::{self, no_spare_renderer_histogram, Metrics},
    scheduler::TimeTicks,
    site::SiteInstance,
    suitability::{flag_mismatch, FlagMismatch},
};

/// Operations on the browser's spare pool
///
/// Obtained from [`Browser::spare_manager`]; borrows the browser for the
/// duration of the call chain.
pub struct SpareManager<'a> {
    browser: &'a mut Browser,
}

impl<'a> SpareManager<'a> {
    pub(crate) fn new(browser: &'a mut Browser) -> Self {
        Self { browser }
    }

    fn pool(&self) -> &SparePool {
        &self.browser.spare
    }

    fn pool_mut(&mut self) -> &mut SparePool {
        &mut self.browser.spare
    }

    fn now(&self) -> TimeTicks {
        self.browser.runner.now()
    }

    // Queries

    pub fn has_spare_renderer(&self) -> bool {
        !self.pool().entries.is_empty()
    }

    /// Pooled spare hosts, primary first
    pub fn spares(&self) -> Vec<HostId> {
        self.pool().hosts()
    }

    pub fn spare_ids(&self) -> BTreeSet<HostId> {
        self.pool().hosts().into_iter().collect()
    }

    pub fn entries(&self) -> &[SpareEntry] {
        &self.pool().entries
    }

    /// Context the pooled spares belong to
    pub fn spare_context(&self) -> Option<BrowserContextId> {
        self.pool().context
    }

    /// When the pool will destroy itself; `None` when it never expires or
    /// is empty
    pub fn deadline(&self) -> Option<TimeTicks> {
        match self.pool().deadline {
            Some(SpareDeadline::At { when, .. }) => Some(when),
            _ => None,
        }
    }

    pub fn has_deferred_creation(&self) -> bool {
        self.pool().deferred.is_some()
    }

    /// Reason recorded for the next failed take on an empty pool
    pub fn absence_reason(&self) -> NoSpareRendererReason {
        self.pool().absence_reason
    }

    pub fn add_observer(&mut self, observer: Rc<dyn SpareObserver>) {
        self.pool_mut().observers.push(observer);
    }

    pub fn remove_observer(&mut self, observer: &Rc<dyn SpareObserver>) -> bool {
        let target = Rc::as_ptr(observer) as *const ();
        let observers = &mut self.pool_mut().observers;
        let before = observers.len();
        observers.retain(|o| Rc::as_ptr(o) as *const () != target);
        before != observers.len()
    }

    // Warm-up

    /// Ensure one spare exists for `context`
    ///
    /// Without a timeout the spare never expires and a deferred creation for
    /// the same context is cancelled. With a timeout the later of the old and
    /// new deadlines wins.
    pub fn warmup_spare(&mut self, context: BrowserContextId, timeout: Option<Duration>) {
        if !self.browser.is_context_alive(context) {
            return;
        }

        if timeout.is_none() && self.pool().deferred.map(|d| d.context) == Some(context) {
            if let Some(deferred) = self.pool_mut().deferred.take() {
                self.browser.runner.cancel(deferred.task);
                self.record_delay(deferred.scheduled_at);
            }
        }

        if self.pool().context == Some(context) && !self.pool().entries.is_empty() {
            self.extend_deadline(timeout);
            return;
        }

        if !self.pool().entries.is_empty() {
            debug!(context = %context, "Evicting spares pooled for another context");
            self.destroy_all(Some(SpareRendererDispatchResult::Overridden));
        }

        if self.browser.is_process_limit_reached() {
            debug!(context = %context, "Process limit reached, no spare created");
            self.pool_mut().absence_reason = NoSpareRendererReason::ProcessLimit;
            return;
        }

        if self.create_spare(context, true).is_some() {
            self.set_fresh_deadline(timeout);
        }
    }

    /// React to an allocation in `context`
    ///
    /// `delay` is the embedder's requested delay before the next spare.
    pub fn prepare_for_future_requests(
        &mut self,
        context: BrowserContextId,
        delay: Option<Duration>,
    ) {
        let platform = self.pool().platform;
        if let Some(timeout) = self.pool().config.mobile_warmup_timeout(platform) {
            self.warmup_spare(context, Some(timeout));
            return;
        }

        match delay {
            Some(delay) => {
                if let Some(previous) = self.pool_mut().deferred.take() {
                    self.browser.runner.cancel(previous.task);
                }
                let task = self.browser.runner.post_delayed_task(delay, move |browser: &mut Browser| {
                    browser.spare_manager().on_deferred_creation(context);
                });
                let scheduled_at = self.now();
                self.pool_mut().deferred = Some(DeferredCreation {
                    task,
                    context,
                    scheduled_at,
                });
                debug!(context = %context, delay_ms = delay.as_millis() as u64, "Spare creation deferred");
            }
            None if self.pool().config.keep_spare_at_all_times => {
                self.warmup_spare(context, None);
            }
            None => {
                self.destroy_all(Some(SpareRendererDispatchResult::Overridden));
            }
        }
    }

    // Taking

    /// Hand out a pooled spare if it fits, recording why not otherwise
    pub fn maybe_take_spare(
        &mut self,
        context: BrowserContextId,
        site_instance: &SiteInstance,
        allocation: ProcessAllocationContext,
    ) -> Option<HostId> {
        let started = Instant::now();
        let outcome = self.check_take(context, site_instance, allocation);
        let metrics = self.browser.metrics.clone();
        let elapsed = started.elapsed();
        metrics.record_micros(metrics::SPARE_PROCESS_MAYBE_TAKE_TIME, elapsed);

        match outcome {
            Ok(host) => {
                metrics.record_micros(metrics::SPARE_PROCESS_MAYBE_TAKE_TIME_TAKEN, elapsed);
                metrics.record_enum(
                    metrics::SPARE_PROCESS_MAYBE_TAKE_ACTION,
                    SpareProcessMaybeTakeAction::SpareTaken as i64,
                );
                Some(self.take(host, allocation))
            }
            Err((action, reason)) => {
                metrics.record_enum(metrics::SPARE_PROCESS_MAYBE_TAKE_ACTION, action as i64);
                self.record_no_spare(&metrics, reason, allocation);
                None
            }
        }
    }

    fn check_take(
        &self,
        context: BrowserContextId,
        site_instance: &SiteInstance,
        allocation: ProcessAllocationContext,
    ) -> Result<HostId, (SpareProcessMaybeTakeAction, NoSpareRendererReason)> {
        use SpareProcessMaybeTakeAction as Action;

        let pool = self.pool();
        if pool.entries.is_empty() {
            let reason = if pool.deferred.is_some() {
                NoSpareRendererReason::NotYetCreatedAfterWarmup
            } else {
                pool.absence_reason
            };
            return Err((Action::NoSparePresent, reason));
        }
        if pool.context != Some(context) {
            return Err((
                Action::MismatchedBrowserContext,
                NoSpareRendererReason::MismatchedBrowserContext,
            ));
        }

        let candidate = pool
            .entries
            .iter()
            .find(|e| e.state == SpareState::Ready)
            .or_else(|| pool.entries.first())
            .map(|e| e.host)
            .ok_or((Action::NoSparePresent, pool.absence_reason))?;
        let host = self
            .browser
            .host(candidate)
            .ok_or((Action::NoSparePresent, NoSpareRendererReason::ProcessExited))?;

        let site_info = &site_instance.site_info;
        if host.storage_partition() != site_info.storage_partition() {
            return Err((
                Action::MismatchedStoragePartition,
                NoSpareRendererReason::MismatchedStoragePartition,
            ));
        }
        if self.browser.process_count_for_limit() > self.browser.max_renderer_process_count() {
            return Err((Action::NoSparePresent, NoSpareRendererReason::ProcessLimit));
        }
        if !self
            .browser
            .embedder
            .should_use_spare_render_process_host(context, site_info)
        {
            return Err((Action::RefusedByEmbedder, NoSpareRendererReason::RefusedByEmbedder));
        }
        if let Some(mismatch) = flag_mismatch(host.flags(), site_info) {
            let action = match mismatch {
                FlagMismatch::Guest => Action::RefusedBySiteInstance,
                FlagMismatch::Pdf => Action::RefusedForPdfContent,
                FlagMismatch::Jit => Action::RefusedForJitMismatch,
                FlagMismatch::V8Optimizations => Action::RefusedForV8OptimizationMismatch,
            };
            return Err((action, NoSpareRendererReason::IncompatibleProcessFlags));
        }
        if self.browser.uses_process_per_site(site_instance)
            && self
                .browser
                .registry
                .get_sole_process_host_for_site(context, site_info.site_url())
                .is_some()
        {
            return Err((
                Action::RefusedBySiteInstance,
                NoSpareRendererReason::RefusedBySiteInstance,
            ));
        }
        if self.pool().config.only_for_navigation && !allocation.is_navigation() {
            return Err((
                Action::RefusedNonNavigation,
                NoSpareRendererReason::RefusedNonNavigation,
            ));
        }
        Ok(candidate)
    }

    /// Hand `host` out of the pool; also used when the allocator picks a
    /// pooled spare as an existing host
    pub(crate) fn take(&mut self, host: HostId, allocation: ProcessAllocationContext) -> HostId {
        let context = self.pool().context;
        let entry = self.pool_mut().remove(host);
        self.browser
            .metrics
            .record_enum(metrics::SPARE_RENDERER_DISPATCH_RESULT, SpareRendererDispatchResult::Used as i64);
        {
            let pool = self.pool_mut();
            pool.previously_taken = Some(allocation);
            pool.absence_reason = NoSpareRendererReason::TakenByPreviousNavigation;
        }
        if self.pool().entries.is_empty() {
            self.clear_deadline();
        }
        info!(host = %host, source = %allocation.source, "Spare renderer taken");
        self.notify_changed();

        let pool = self.pool();
        let replenishes = pool.config.keep_spare_at_all_times || pool.target_count() > 1;
        if let (true, Some(context), Some(entry)) = (replenishes, context, entry) {
            let waiting_for = (entry.state == SpareState::Launching).then_some(host);
            self.pool_mut().replenish = Some(Replenishment {
                context,
                waiting_for,
            });
            self.browser.runner.post_task(|browser: &mut Browser| {
                browser.spare_manager().try_replenish();
            });
        }
        host
    }

    fn record_no_spare(
        &self,
        metrics: &Metrics,
        reason: NoSpareRendererReason,
        allocation: ProcessAllocationContext,
    ) {
        metrics.record_enum(metrics::NO_SPARE_PRESENT_REASON, reason as i64);
        metrics.record_enum(
            &no_spare_renderer_histogram("AllocationSource", reason.as_str()),
            allocation.source as i64,
        );
        if let Some(navigation) = allocation.navigation {
            metrics.record_enum(
                &no_spare_renderer_histogram("NavigationStage", reason.as_str()),
                navigation.stage as i64,
            );
            metrics.record_bool(
                &no_spare_renderer_histogram("ForCOOP", reason.as_str()),
                navigation.requires_new_browsing_context_group_for_coop,
            );
        }

        if reason != NoSpareRendererReason::TakenByPreviousNavigation {
            return;
        }
        let Some(previous) = self.pool().previously_taken else {
            return;
        };
        metrics.record_enum(metrics::PREVIOUSLY_TAKEN_SOURCE, previous.source as i64);
        if let Some(before) = previous.navigation {
            metrics.record_enum(metrics::PREVIOUSLY_TAKEN_STAGE, before.stage as i64);
            metrics.record_bool(
                metrics::PREVIOUSLY_TAKEN_FOR_COOP,
                before.requires_new_browsing_context_group_for_coop,
            );
            if let Some(now) = allocation.navigation {
                if now.navigation_id == before.navigation_id {
                    metrics.record_enum(
                        metrics::TAKEN_IN_SAME_NAVIGATION_STAGES,
                        before.stage as i64 * 100 + now.stage as i64,
                    );
                    metrics.record_bool(
                        metrics::TAKEN_IN_SAME_NAVIGATION_FOR_COOP,
                        now.requires_new_browsing_context_group_for_coop,
                    );
                }
            }
        }
    }

    // Teardown

    /// Destroy every spare and cancel all pending work
    pub fn cleanup_spares_for_testing(&mut self) {
        if let Some(deferred) = self.pool_mut().deferred.take() {
            self.browser.runner.cancel(deferred.task);
        }
        {
            let pool = self.pool_mut();
            pool.replenish = None;
            pool.extra_pending = false;
        }
        self.destroy_all(None);
    }

    /// Destroy all but the first `keep` spares (default one)
    pub fn cleanup_extra_spares(&mut self, keep: Option<usize>) {
        let keep = keep.unwrap_or(1);
        let doomed: Vec<HostId> = self.pool().hosts().into_iter().skip(keep).collect();
        for host in doomed {
            self.destroy_spare(host, None);
        }
        self.pool_mut().extra_pending = false;
    }

    pub fn on_application_state_changed(&mut self, state: ApplicationState) {
        if state == ApplicationState::Background && self.pool().config.kill_when_backgrounded {
            info!("Application backgrounded, destroying spares");
            self.destroy_all(None);
            self.pool_mut().absence_reason = NoSpareRendererReason::AppBackgrounded;
        }
    }

    pub fn on_memory_pressure(&mut self, level: MemoryPressureLevel) {
        if level == MemoryPressureLevel::Critical && self.has_spare_renderer() {
            warn!("Critical memory pressure, destroying spares");
            self.destroy_all(None);
            self.pool_mut().absence_reason = NoSpareRendererReason::MemoryPressure;
        }
    }

    // Events from the browser

    pub(crate) fn on_context_destroyed(&mut self, context: BrowserContextId) {
        if self.pool().deferred.map(|d| d.context) == Some(context) {
            if let Some(deferred) = self.pool_mut().deferred.take() {
                self.browser.runner.cancel(deferred.task);
            }
        }
        if self.pool().replenish.map(|r| r.context) == Some(context) {
            self.pool_mut().replenish = None;
        }
        if self.pool().context == Some(context) {
            self.destroy_all(None);
            self.pool_mut().absence_reason = NoSpareRendererReason::ContextDestroyed;
        }
    }

    pub(crate) fn on_host_launched(&mut self, host: HostId) {
        let now = self.now();
        let requested = self
            .pool_mut()
            .entries
            .iter_mut()
            .find(|e| e.host == host)
            .map(|entry| {
                entry.state = SpareState::Ready;
                entry.launch_requested_at
            });

        if let Some(requested_at) = requested {
            self.browser.metrics.record_time(
                metrics::SPARE_PROCESS_STARTUP_TIME,
                now.saturating_duration_since(requested_at),
            );
            debug!(host = %host, "Spare renderer ready");
            for observer in self.pool().observers.clone() {
                observer.spare_ready(host);
            }
            self.maybe_start_extra_spare();
        }

        self.release_replenish_wait(host);
    }

    /// Returns true when `host` was a pooled spare
    pub(crate) fn on_host_exited(&mut self, host: HostId) -> bool {
        self.release_replenish_wait(host);
        if !self.pool().contains(host) {
            return false;
        }
        warn!(host = %host, "Spare renderer exited");
        self.pool_mut().remove(host);
        self.browser
            .metrics
            .record_enum(metrics::SPARE_RENDERER_DISPATCH_RESULT, SpareRendererDispatchResult::Killed as i64);
        self.pool_mut().absence_reason = NoSpareRendererReason::ProcessExited;
        if self.pool().entries.is_empty() {
            self.clear_deadline();
        }
        self.notify_changed();
        true
    }

    pub(crate) fn on_host_destroyed(&mut self, host: HostId) {
        self.release_replenish_wait(host);
        if self.pool_mut().remove(host).is_some() {
            if self.pool().entries.is_empty() {
                self.clear_deadline();
            }
            self.notify_changed();
        }
    }

    pub(crate) fn on_browser_idle(&mut self) {
        self.try_replenish();
        if self.pool().extra_pending {
            self.maybe_start_extra_spare();
        }
    }

    pub(crate) fn on_memory_updated(&mut self) {
        if self.pool().extra_pending {
            self.maybe_start_extra_spare();
        }
    }

    // Internals

    fn on_deferred_creation(&mut self, context: BrowserContextId) {
        let Some(deferred) = self.pool_mut().deferred.take() else {
            return;
        };
        if !self.browser.is_context_alive(deferred.context) || deferred.context != context {
            return;
        }
        self.record_delay(deferred.scheduled_at);
        self.warmup_spare(context, None);
    }

    fn on_deadline_expired(&mut self) {
        self.pool_mut().deadline = None;
        info!(spares = self.pool().entries.len(), "Spare renderers timed out");
        self.destroy_all(Some(SpareRendererDispatchResult::Timeout));
        self.pool_mut().absence_reason = NoSpareRendererReason::Timeout;
    }

    fn try_replenish(&mut self) {
        let Some(replenish) = self.pool().replenish else {
            return;
        };
        if replenish.waiting_for.is_some() || !self.browser.browser_idle {
            return;
        }
        self.pool_mut().replenish = None;
        if self.pool().deferred.is_some() {
            return;
        }

        let context = replenish.context;
        if !self.browser.is_context_alive(context) {
            return;
        }
        let pool = self.pool();
        if pool.entries.len() >= pool.target_count() {
            return;
        }
        if pool.entries.is_empty() {
            self.warmup_spare(context, None);
        } else if pool.context == Some(context) && !self.browser.is_process_limit_reached() {
            self.create_spare(context, false);
        }
    }

    fn release_replenish_wait(&mut self, host: HostId) {
        let released = match &mut self.pool_mut().replenish {
            Some(replenish) if replenish.waiting_for == Some(host) => {
                replenish.waiting_for = None;
                true
            }
            _ => false,
        };
        if released {
            self.try_replenish();
        }
    }

    fn maybe_start_extra_spare(&mut self) {
        let pool = self.pool();
        let Some(context) = pool.context else {
            self.pool_mut().extra_pending = false;
            return;
        };
        if pool.entries.len() >= pool.target_count() {
            self.pool_mut().extra_pending = false;
            return;
        }
        if pool.entries.iter().any(|e| e.state == SpareState::Launching) {
            return;
        }
        let min_memory = pool.config.extra_spare_min_memory_mb;
        if !self.browser.browser_idle || self.browser.physical_memory_mb < min_memory {
            debug!(context = %context, "Extra spare postponed");
            self.pool_mut().extra_pending = true;
            return;
        }
        self.pool_mut().extra_pending = false;
        if self.browser.is_process_limit_reached() {
            return;
        }
        self.create_spare(context, false);
    }

    fn create_spare(&mut self, context: BrowserContextId, primary: bool) -> Option<HostId> {
        let partition = self.browser.context(context)?.default_storage_partition();
        match self
            .browser
            .create_host(context, partition, HostFlags::default(), true)
        {
            Ok(host) => {
                let launch_requested_at = self.now();
                let pool = self.pool_mut();
                let primary = primary || pool.entries.is_empty();
                pool.entries.push(SpareEntry {
                    host,
                    state: SpareState::Launching,
                    launch_requested_at,
                    primary,
                });
                pool.context = Some(context);
                info!(host = %host, context = %context, primary, "Spare renderer created");
                self.notify_changed();
                Some(host)
            }
            Err(e) => {
                warn!(context = %context, error = %e, "Failed to create spare renderer");
                self.pool_mut().absence_reason = NoSpareRendererReason::ProcessExited;
                None
            }
        }
    }

    fn destroy_spare(&mut self, host: HostId, result: Option<SpareRendererDispatchResult>) {
        if self.pool_mut().remove(host).is_none() {
            return;
        }
        if let Some(result) = result {
            self.browser
                .metrics
                .record_enum(metrics::SPARE_RENDERER_DISPATCH_RESULT, result as i64);
        }
        if self.pool().entries.is_empty() {
            self.clear_deadline();
        }
        debug!(host = %host, result = ?result, "Destroying spare renderer");
        self.notify_changed();
        // Spares hold no listeners, so this tears the host down now.
        self.browser.disable_ref_counts_internal(host);
    }

    fn destroy_all(&mut self, result: Option<SpareRendererDispatchResult>) {
        for host in self.pool().hosts() {
            self.destroy_spare(host, result);
        }
        self.clear_deadline();
    }

    fn set_fresh_deadline(&mut self, timeout: Option<Duration>) {
        self.clear_deadline();
        let deadline = match timeout {
            None => SpareDeadline::Never,
            Some(timeout) => self.schedule_deadline(timeout),
        };
        self.pool_mut().deadline = Some(deadline);
    }

    fn extend_deadline(&mut self, timeout: Option<Duration>) {
        let current = self.pool().deadline;
        let next = match (current, timeout) {
            (Some(SpareDeadline::Never), _) => return,
            (Some(SpareDeadline::At { task, .. }), None) => {
                self.browser.runner.cancel(task);
                SpareDeadline::Never
            }
            (Some(SpareDeadline::At { when, task }), Some(timeout)) => {
                if self.now() + timeout <= when {
                    return;
                }
                self.browser.runner.cancel(task);
                self.schedule_deadline(timeout)
            }
            (None, None) => SpareDeadline::Never,
            (None, Some(timeout)) => self.schedule_deadline(timeout),
        };
        self.pool_mut().deadline = Some(next);
    }

    fn schedule_deadline(&mut self, timeout: Duration) -> SpareDeadline {
        let when = self.now() + timeout;
        let task = self
            .browser
            .runner
            .post_delayed_task(timeout, |browser: &mut Browser| {
                browser.spare_manager().on_deadline_expired();
            });
        SpareDeadline::At { when, task }
    }

    fn clear_deadline(&mut self) {
        if let Some(SpareDeadline::At { task, .. }) = self.pool_mut().deadline.take() {
            self.browser.runner.cancel(task);
        }
    }

    fn record_delay(&self, scheduled_at: TimeTicks) {
        let delay = self.now().saturating_duration_since(scheduled_at);
        self.browser
            .metrics
            .record_time(metrics::SPARE_PROCESS_DELAY_TIME, delay);
    }

    fn notify_changed(&self) {
        let spares = self.pool().hosts();
        for observer in self.pool().observers.clone() {
            observer.spares_changed(&spares);
        }
    }
}
