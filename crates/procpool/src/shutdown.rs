//! Host teardown, shutdown delays and the fast-shutdown path

use std::time::Duration;

use procpool_config::Platform;
use tracing::{debug, info, warn};

use crate::{
    browser::Browser,
    error::{PoolError, Result},
    host::{DelayShutdownReason, ListenerId, RefKind, RefToken},
    ids::{HostId, KeepAliveHandleId},
    launcher::{ChildProcessTerminationInfo, RESULT_CODE_KILLED_BAD_MESSAGE, RESULT_CODE_NORMAL_EXIT},
    site::SiteInfo,
};

/// Which outstanding work a fast shutdown may ignore
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FastShutdownOptions {
    /// Only shut down if exactly this many listeners are attached
    pub page_count: Option<usize>,
    pub skip_unload_handlers: bool,
    pub ignore_workers: bool,
    pub ignore_keep_alive: bool,
}

impl Browser {
    // Ref counts and listeners

    /// Take one count of `kind` on `host`
    pub fn acquire_ref(&mut self, host: HostId, kind: RefKind) -> Result<RefToken> {
        let now = self.now();
        let entry = self.hosts.get(&host).ok_or(PoolError::UnknownHost(host))?;
        Ok(entry.acquire(kind, now))
    }

    /// Keep `host` alive for at most `timeout` (the configured keep-alive
    /// timeout when `None`)
    pub fn keep_alive_for(
        &mut self,
        host: HostId,
        timeout: Option<Duration>,
    ) -> Result<Option<KeepAliveHandleId>> {
        let token = self.acquire_ref(host, RefKind::KeepAlive)?;
        let handle = token.keep_alive_handle();
        let timeout = timeout.unwrap_or_else(|| self.config.process.keep_alive_timeout());
        self.runner.post_delayed_task(timeout, move |_: &mut Browser| drop(token));
        Ok(handle)
    }

    /// Freeze the counters of `host` and tear it down if nothing is attached
    pub fn disable_ref_counts(&mut self, host: HostId) -> Result<()> {
        if !self.hosts.contains_key(&host) {
            return Err(PoolError::UnknownHost(host));
        }
        self.disable_ref_counts_internal(host);
        Ok(())
    }

    pub(crate) fn disable_ref_counts_internal(&mut self, host: HostId) {
        let Some(entry) = self.hosts.get_mut(&host) else {
            return;
        };
        entry.disable_ref_counts();
        debug!(host = %host, "Ref counts disabled");
        self.evaluate_teardown(host);
    }

    pub fn add_listener(&mut self, host: HostId) -> Result<ListenerId> {
        let entry = self.hosts.get_mut(&host).ok_or(PoolError::UnknownHost(host))?;
        Ok(entry.add_listener())
    }

    /// Detach a listener; the last one going triggers a teardown evaluation
    pub fn remove_listener(&mut self, host: HostId, listener: ListenerId) -> Result<bool> {
        let entry = self.hosts.get_mut(&host).ok_or(PoolError::UnknownHost(host))?;
        let removed = entry.remove_listener(listener);
        if removed && !entry.has_listeners() {
            self.evaluate_teardown(host);
        }
        Ok(removed)
    }

    pub fn delay_shutdown_reason(&self, host: HostId) -> Result<DelayShutdownReason> {
        let entry = self.hosts.get(&host).ok_or(PoolError::UnknownHost(host))?;
        Ok(entry.delay_shutdown_reason(self.config.process.single_process))
    }

    // Shutdown delay

    /// Whether hosts linger after their last frame goes away
    pub fn should_delay_process_shutdown(&self) -> bool {
        let process = &self.config.process;
        process.platform != Platform::Mobile && !process.single_process && process.site_per_process
    }

    /// Keep `host` around for `subframe_timeout + unload_timeout` so a new
    /// frame of the same site can reuse it
    pub fn delay_process_shutdown(
        &mut self,
        host: HostId,
        subframe_timeout: Duration,
        unload_timeout: Duration,
        site_info: &SiteInfo,
    ) -> Result<()> {
        if !self.hosts.contains_key(&host) {
            return Err(PoolError::UnknownHost(host));
        }
        if !self.should_delay_process_shutdown() {
            return Ok(());
        }
        let token = self.acquire_ref(host, RefKind::ShutdownDelay)?;
        let context = self.hosts[&host].browser_context();
        let site_url = site_info.site_url().clone();
        self.registry.add_for_shutdown_delay(context, &site_url, host);
        let delay = subframe_timeout + unload_timeout;
        debug!(host = %host, site = %site_url, delay_ms = delay.as_millis() as u64, "Process shutdown delayed");
        self.runner.post_delayed_task(delay, move |browser: &mut Browser| {
            browser.registry.remove_for_shutdown_delay(context, &site_url, host);
            drop(token);
        });
        Ok(())
    }

    /// Forget `host` in the delayed-shutdown tracker; its timer still runs
    pub fn stop_tracking_process_for_shutdown_delay(&mut self, host: HostId) {
        self.registry.stop_tracking_for_shutdown_delay(host);
    }

    // Termination

    /// Terminate `host` right away when nothing would notice
    pub fn fast_shutdown_if_possible(
        &mut self,
        host: HostId,
        options: FastShutdownOptions,
    ) -> Result<bool> {
        let single_process = self.config.process.single_process;
        let entry = self.hosts.get_mut(&host).ok_or(PoolError::UnknownHost(host))?;
        if single_process || !entry.has_process() {
            return Ok(false);
        }
        if options.page_count.is_some_and(|count| count != entry.listener_count()) {
            return Ok(false);
        }
        if !options.skip_unload_handlers && !entry.sudden_termination_allowed() {
            return Ok(false);
        }
        if !options.ignore_workers && entry.ref_count(RefKind::Worker) > 0 {
            return Ok(false);
        }
        if !options.ignore_keep_alive && entry.ref_count(RefKind::KeepAlive) > 0 {
            return Ok(false);
        }
        if entry.ref_count(RefKind::PendingReuse) > 0 {
            return Ok(false);
        }

        entry.set_fast_shutdown_started();
        entry.terminate(RESULT_CODE_NORMAL_EXIT);
        let notify = entry.take_exit_notification();
        let observers = entry.observers_snapshot();
        let eligible = entry.is_eligible_for_teardown();
        info!(host = %host, "Fast shutdown");

        self.spare_manager().on_host_destroyed(host);
        self.registry.remove_host(host);
        if notify {
            let info = ChildProcessTerminationInfo::normal();
            for observer in &observers {
                observer.process_exited(host, &info);
            }
        }
        if eligible {
            self.destroy_host(host);
        }
        Ok(true)
    }

    /// Kill a renderer that sent a malformed message
    pub fn shutdown_for_bad_message(&mut self, host: HostId) -> Result<()> {
        let entry = self.hosts.get_mut(&host).ok_or(PoolError::UnknownHost(host))?;
        warn!(host = %host, "Killing renderer after bad message");
        entry.request_shutdown();
        entry.terminate(RESULT_CODE_KILLED_BAD_MESSAGE);
        let notify = entry.take_exit_notification();
        let observers = entry.observers_snapshot();
        let listeners = entry.has_listeners();

        self.spare_manager().on_host_exited(host);
        self.registry.remove_host(host);
        if notify {
            let info = ChildProcessTerminationInfo::killed(RESULT_CODE_KILLED_BAD_MESSAGE);
            for observer in &observers {
                observer.process_exited(host, &info);
            }
        }
        if !listeners {
            self.destroy_host(host);
        }
        Ok(())
    }

    /// The OS process behind `host` is gone
    pub(crate) fn on_process_gone(&mut self, host: HostId, info: ChildProcessTerminationInfo) {
        let Some(entry) = self.hosts.get_mut(&host) else {
            return;
        };
        if !entry.mark_dead() {
            return;
        }
        let notify = entry.take_exit_notification();
        let observers = entry.observers_snapshot();
        let listeners = entry.has_listeners();

        self.spare_manager().on_host_exited(host);
        self.registry.remove_host(host);
        if notify {
            for observer in &observers {
                observer.process_exited(host, &info);
            }
        }
        if !listeners {
            self.destroy_host(host);
        }
    }

    // Teardown

    /// Evaluate every queued host; returns whether any were queued
    pub(crate) fn process_teardown_queue(&mut self) -> bool {
        let mut progressed = false;
        loop {
            let next = self.teardown.borrow_mut().pop_front();
            let Some(host) = next else {
                break;
            };
            progressed = true;
            self.evaluate_teardown(host);
        }
        progressed
    }

    fn evaluate_teardown(&mut self, host: HostId) {
        if self.hosts.get(&host).is_some_and(|h| h.is_eligible_for_teardown()) {
            self.destroy_host(host);
        }
    }

    /// Remove `host` from every registry, stop its process and drop it
    ///
    /// Observers hear about it only after the host is unreachable.
    pub(crate) fn destroy_host(&mut self, host: HostId) {
        if !self.hosts.contains_key(&host) {
            return;
        }
        self.spare_manager().on_host_destroyed(host);
        self.registry.remove_host(host);

        let Some(mut entry) = self.hosts.remove(&host) else {
            return;
        };
        entry.terminate(RESULT_CODE_NORMAL_EXIT);
        let notify = entry.take_exit_notification();
        let observers = entry.observers_snapshot();
        info!(host = %host, "Process host destroyed");

        if notify {
            let info = ChildProcessTerminationInfo::normal();
            for observer in &observers {
                observer.process_exited(host, &info);
            }
        }
        for observer in &observers {
            observer.host_destroyed(host);
        }
    }
}
