//! Whether an existing host may run a given site

use crate::{
    embedder::EmbedderHooks,
    host::{HostFlags, ProcessHost},
    ids::BrowserContextId,
    site::{ProcessLock, SiteInfo},
};

/// The isolation boundary a site instance lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsolationContext {
    pub browser_context: BrowserContextId,
}

impl IsolationContext {
    pub fn new(browser_context: BrowserContextId) -> Self {
        Self { browser_context }
    }
}

/// Whether a host's lock admits the site
pub fn is_lock_compatible(
    host: &ProcessHost,
    site_info: &SiteInfo,
    requires_dedicated_process: bool,
) -> bool {
    match host.process_lock() {
        ProcessLock::LockedToSite(lock_url) => {
            requires_dedicated_process && lock_url == site_info.process_lock_url()
        }
        ProcessLock::AllowAnySite => !requires_dedicated_process,
        ProcessLock::Unlocked => host.is_unused() || !requires_dedicated_process,
    }
}

/// Context, partition, content flags and lock all fit, and the embedder agrees
pub fn is_suitable_host(
    host: &ProcessHost,
    isolation: &IsolationContext,
    site_info: &SiteInfo,
    requires_dedicated_process: bool,
    embedder: &dyn EmbedderHooks,
) -> bool {
    if host.browser_context() != isolation.browser_context {
        return false;
    }
    if host.storage_partition() != site_info.storage_partition() {
        return false;
    }
    if !host.flags().matches_site(site_info) {
        return false;
    }
    if !is_lock_compatible(host, site_info, requires_dedicated_process) {
        return false;
    }
    embedder.is_suitable_host(host, site_info)
}

/// [`is_suitable_host`] for a host that is also alive and shareable
pub fn may_reuse_and_is_suitable(
    host: &ProcessHost,
    isolation: &IsolationContext,
    site_info: &SiteInfo,
    requires_dedicated_process: bool,
    embedder: &dyn EmbedderHooks,
) -> bool {
    if host.is_dead() || host.shutdown_requested() || host.fast_shutdown_started() {
        return false;
    }
    if !embedder.may_reuse_host(host) {
        return false;
    }
    is_suitable_host(host, isolation, site_info, requires_dedicated_process, embedder)
}

/// Which content flag, if any, a spare lacks for `site_info`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagMismatch {
    Guest,
    Pdf,
    Jit,
    V8Optimizations,
}

/// First flag difference between a spare's flags and a site's needs
pub fn flag_mismatch(flags: HostFlags, site_info: &SiteInfo) -> Option<FlagMismatch> {
    if flags.guest_only != site_info.is_guest() {
        Some(FlagMismatch::Guest)
    } else if flags.pdf != site_info.is_pdf() {
        Some(FlagMismatch::Pdf)
    } else if flags.jit_disabled != site_info.is_jit_disabled() {
        Some(FlagMismatch::Jit)
    } else if flags.v8_optimizations_disabled != site_info.are_v8_optimizations_disabled() {
        Some(FlagMismatch::V8Optimizations)
    } else {
        None
    }
}
