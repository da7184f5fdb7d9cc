//! Choosing the process that hosts a site instance
//!
//! Candidates are tried in a fixed order: a pooled spare, the sole
//! process-per-site host, a host with pending or committed frames of the same
//! site, any suitable existing host (only when the process limit is reached or
//! the embedder asks), and finally a newly launched host.

use rand::seq::SliceRandom;
use tracing::{debug, info};

use crate::{
    allocation::ProcessAllocationContext,
    browser::Browser,
    error::Result,
    host::HostFlags,
    ids::HostId,
    site::{ProcessLock, ProcessReusePolicy, SiteInstance},
    suitability::{may_reuse_and_is_suitable, IsolationContext},
};

/// How an allocation was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AllocationPath {
    Spare,
    ProcessPerSite,
    Reuse,
    Existing,
    New,
}

impl AllocationPath {
    fn as_str(self) -> &'static str {
        match self {
            Self::Spare => "spare",
            Self::ProcessPerSite => "process-per-site",
            Self::Reuse => "reuse",
            Self::Existing => "existing",
            Self::New => "new",
        }
    }
}

impl Browser {
    /// Pick or create the host for `site_instance`
    ///
    /// Fails only for an unknown or destroyed browser context, or when a new
    /// process cannot be launched.
    pub fn get_process_host_for_site_instance(
        &mut self,
        site_instance: &SiteInstance,
        allocation: ProcessAllocationContext,
    ) -> Result<HostId> {
        let context = site_instance.browser_context;
        self.check_context(context)?;
        let site_info = &site_instance.site_info;
        let requires_dedicated = self.requires_dedicated_process(site_info);
        let process_per_site = self.uses_process_per_site(site_instance);

        let spare = self
            .spare_manager()
            .maybe_take_spare(context, site_instance, allocation);
        let (host, path) = if let Some(host) = spare {
            (host, AllocationPath::Spare)
        } else if let Some(host) = process_per_site
            .then(|| self.process_per_site_host(site_instance))
            .flatten()
        {
            (host, AllocationPath::ProcessPerSite)
        } else if let Some(host) = self.find_reusable_process_host_for_site_instance(site_instance) {
            (host, AllocationPath::Reuse)
        } else if let Some(host) = self.existing_host_if_wanted(site_instance, allocation) {
            (host, AllocationPath::Existing)
        } else {
            let host = self.create_host(
                context,
                site_info.storage_partition().clone(),
                HostFlags::for_site(site_info),
                false,
            )?;
            (host, AllocationPath::New)
        };

        if let Some(entry) = self.hosts.get_mut(&host) {
            if !site_info.is_empty_site() {
                entry.set_process_lock(ProcessLock::for_site(site_info, requires_dedicated));
            }
            entry.mark_used();
            entry.set_spare_priority(false);
        }
        if process_per_site {
            self.registry
                .register_sole_process_host_for_site(context, site_info.site_url(), host);
        }

        let delay = self
            .embedder
            .spare_renderer_delay_for_site(context, site_info.site_url());
        self.spare_manager().prepare_for_future_requests(context, delay);

        info!(
            host = %host,
            site = %site_info.site_url(),
            source = %allocation.source,
            path = path.as_str(),
            "Process allocated"
        );
        Ok(host)
    }

    /// A random suitable host among all live hosts, if any
    ///
    /// A pooled spare chosen here leaves the pool.
    pub fn get_existing_process_host(&mut self, site_instance: &SiteInstance) -> Option<HostId> {
        let isolation = IsolationContext::new(site_instance.browser_context);
        let site_info = &site_instance.site_info;
        let requires_dedicated = self.requires_dedicated_process(site_info);
        let candidates: Vec<HostId> = self
            .hosts
            .values()
            .filter(|host| {
                may_reuse_and_is_suitable(
                    host,
                    &isolation,
                    site_info,
                    requires_dedicated,
                    self.embedder.as_ref(),
                )
            })
            .map(|host| host.id())
            .collect();
        let chosen = candidates.choose(&mut self.rng).copied();
        debug!(candidates = candidates.len(), chosen = ?chosen, "Existing host lookup");
        chosen
    }

    /// A host with a pending or committed frame of the same site, for the
    /// reuse policies that ask for one
    pub fn find_reusable_process_host_for_site_instance(
        &mut self,
        site_instance: &SiteInstance,
    ) -> Option<HostId> {
        let policy = site_instance.reuse_policy;
        if !policy.reuses_pending_or_committed() {
            return None;
        }
        let context = site_instance.browser_context;
        let site_info = &site_instance.site_info;
        let isolation = IsolationContext::new(context);
        let requires_dedicated = self.requires_dedicated_process(site_info);
        let include_delayed = policy == ProcessReusePolicy::ReusePendingOrCommittedSiteSubframe;

        let candidates: Vec<HostId> = self
            .registry
            .candidates_for_site(context, site_info.site_url(), include_delayed)
            .into_iter()
            .filter(|id| {
                self.hosts.get(id).is_some_and(|host| {
                    may_reuse_and_is_suitable(
                        host,
                        &isolation,
                        site_info,
                        requires_dedicated,
                        self.embedder.as_ref(),
                    )
                })
            })
            .collect();
        let chosen = candidates.choose(&mut self.rng).copied()?;

        if self
            .registry
            .is_tracked_for_shutdown_delay(context, site_info.site_url(), chosen)
        {
            self.registry.stop_tracking_for_shutdown_delay(chosen);
        }
        Some(chosen)
    }

    fn process_per_site_host(&self, site_instance: &SiteInstance) -> Option<HostId> {
        let context = site_instance.browser_context;
        let site_info = &site_instance.site_info;
        let host = self
            .registry
            .get_sole_process_host_for_site(context, site_info.site_url())?;
        let entry = self.hosts.get(&host)?;
        may_reuse_and_is_suitable(
            entry,
            &IsolationContext::new(context),
            site_info,
            self.requires_dedicated_process(site_info),
            self.embedder.as_ref(),
        )
        .then_some(host)
    }

    fn existing_host_if_wanted(
        &mut self,
        site_instance: &SiteInstance,
        allocation: ProcessAllocationContext,
    ) -> Option<HostId> {
        let wanted = self.is_process_limit_reached()
            || self
                .embedder
                .should_try_to_use_existing_process_host(site_instance.browser_context, &site_instance.site_info);
        if !wanted {
            return None;
        }
        let host = self.get_existing_process_host(site_instance)?;
        if self.spare.contains(host) {
            self.spare_manager().take(host, allocation);
        }
        Some(host)
    }
}
