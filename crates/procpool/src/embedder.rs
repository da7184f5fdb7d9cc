//! Hooks the embedding application can use to veto or reshape decisions

use std::time::Duration;

use url::Url;

use crate::{
    host::ProcessHost,
    ids::BrowserContextId,
    site::{SiteInfo, StoragePartitionConfig},
};

/// Embedder policy consulted by the allocator and spare pool
///
/// Every method has a permissive default.
pub trait EmbedderHooks {
    /// Final say on whether `host` may run `site_info`
    fn is_suitable_host(&self, _host: &ProcessHost, _site_info: &SiteInfo) -> bool {
        true
    }

    /// Whether a pooled spare may be used for `site_info`
    fn should_use_spare_render_process_host(
        &self,
        _context: BrowserContextId,
        _site_info: &SiteInfo,
    ) -> bool {
        true
    }

    /// Ask the allocator to prefer existing hosts even below the limit
    fn should_try_to_use_existing_process_host(
        &self,
        _context: BrowserContextId,
        _site_info: &SiteInfo,
    ) -> bool {
        false
    }

    /// Whether `host` may be shared at all
    fn may_reuse_host(&self, _host: &ProcessHost) -> bool {
        true
    }

    /// Whether `site_info` uses one process per site
    fn should_use_process_per_site(&self, _context: BrowserContextId, _site_info: &SiteInfo) -> bool {
        false
    }

    /// Partition for a site; `None` uses the context default
    fn storage_partition_config_for_site(
        &self,
        _context: BrowserContextId,
        _site_url: &Url,
    ) -> Option<StoragePartitionConfig> {
        None
    }

    /// URL used to compute the site; defaults to the URL itself
    fn effective_url(&self, _context: BrowserContextId, url: &Url) -> Url {
        url.clone()
    }

    /// Delay before warming a spare after an allocation for `site_url`
    fn spare_renderer_delay_for_site(
        &self,
        _context: BrowserContextId,
        _site_url: &Url,
    ) -> Option<Duration> {
        None
    }

    /// Hosts the embedder owns that should not count towards the limit
    fn process_count_to_ignore_for_limit(&self) -> usize {
        0
    }
}

/// Embedder with every default
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultEmbedder;

impl EmbedderHooks for DefaultEmbedder {}
