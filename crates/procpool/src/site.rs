//! Sites, storage partitions and process locks

use std::fmt;

use serde::{Deserialize, Serialize};
use url::{Host, Url};

use crate::ids::BrowserContextId;

/// An isolated storage domain a process is pinned to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct StoragePartitionConfig {
    /// Owner of the partition; empty for the default partition
    pub partition_domain: String,
    /// Partition name inside the domain
    pub partition_name: String,
    /// Whether storage lives only in memory
    pub in_memory: bool,
}

impl StoragePartitionConfig {
    /// A named, non-default partition
    pub fn new(domain: impl Into<String>, name: impl Into<String>, in_memory: bool) -> Self {
        Self {
            partition_domain: domain.into(),
            partition_name: name.into(),
            in_memory,
        }
    }

    /// The default partition of a context
    pub fn default_for(off_the_record: bool) -> Self {
        Self {
            in_memory: off_the_record,
            ..Self::default()
        }
    }

    /// Whether this is a context's default partition
    pub fn is_default(&self) -> bool {
        self.partition_domain.is_empty() && self.partition_name.is_empty()
    }
}

impl fmt::Display for StoragePartitionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_default() {
            write!(f, "default")?;
        } else {
            write!(f, "{}/{}", self.partition_domain, self.partition_name)?;
        }
        if self.in_memory {
            write!(f, " (in-memory)")?;
        }
        Ok(())
    }
}

/// Derive the site of a URL: scheme plus registrable host
///
/// The registrable host is approximated by the last two DNS labels. IP
/// addresses are kept whole. URLs without a host are their own site.
pub fn site_for_url(url: &Url) -> Url {
    let site_host = match url.host() {
        Some(Host::Domain(domain)) => {
            let labels: Vec<&str> = domain.trim_end_matches('.').split('.').collect();
            let keep = labels.len().min(2);
            labels[labels.len() - keep..].join(".")
        }
        Some(host) => host.to_string(),
        None => return url.clone(),
    };
    Url::parse(&format!("{}://{}/", url.scheme(), site_host)).unwrap_or_else(|_| url.clone())
}

/// The process requirements of one site
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SiteInfo {
    site_url: Url,
    process_lock_url: Url,
    storage_partition: StoragePartitionConfig,
    is_guest: bool,
    is_pdf: bool,
    is_jit_disabled: bool,
    are_v8_optimizations_disabled: bool,
}

impl SiteInfo {
    /// Site info whose lock URL equals its site URL
    pub fn new(site_url: Url, storage_partition: StoragePartitionConfig) -> Self {
        Self {
            process_lock_url: site_url.clone(),
            site_url,
            storage_partition,
            is_guest: false,
            is_pdf: false,
            is_jit_disabled: false,
            are_v8_optimizations_disabled: false,
        }
    }

    /// Lock to a different URL than the site, e.g. when an effective URL
    /// maps content elsewhere
    pub fn with_lock_url(mut self, lock_url: Url) -> Self {
        self.process_lock_url = lock_url;
        self
    }

    pub fn guest(mut self, is_guest: bool) -> Self {
        self.is_guest = is_guest;
        self
    }

    pub fn pdf(mut self, is_pdf: bool) -> Self {
        self.is_pdf = is_pdf;
        self
    }

    pub fn jit_disabled(mut self, disabled: bool) -> Self {
        self.is_jit_disabled = disabled;
        self
    }

    pub fn v8_optimizations_disabled(mut self, disabled: bool) -> Self {
        self.are_v8_optimizations_disabled = disabled;
        self
    }

    pub fn site_url(&self) -> &Url {
        &self.site_url
    }

    pub fn process_lock_url(&self) -> &Url {
        &self.process_lock_url
    }

    pub fn storage_partition(&self) -> &StoragePartitionConfig {
        &self.storage_partition
    }

    pub fn is_guest(&self) -> bool {
        self.is_guest
    }

    pub fn is_pdf(&self) -> bool {
        self.is_pdf
    }

    pub fn is_jit_disabled(&self) -> bool {
        self.is_jit_disabled
    }

    pub fn are_v8_optimizations_disabled(&self) -> bool {
        self.are_v8_optimizations_disabled
    }

    /// Whether the site has no usable origin and can share any process
    pub fn is_empty_site(&self) -> bool {
        self.site_url.host().is_none()
    }
}

/// How a [`SiteInstance`] may share processes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProcessReusePolicy {
    #[default]
    Default,
    /// One process per site per browser context
    ProcessPerSite,
    /// Join a process with a pending or committed navigation to the site
    /// (out-of-process subframes)
    ReusePendingOrCommittedSiteSubframe,
    /// Same as the subframe policy, for workers
    ReusePendingOrCommittedSiteWorker,
}

impl ProcessReusePolicy {
    pub fn reuses_pending_or_committed(self) -> bool {
        matches!(
            self,
            Self::ReusePendingOrCommittedSiteSubframe | Self::ReusePendingOrCommittedSiteWorker
        )
    }
}

/// A site within one browser context, the unit the allocator places
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SiteInstance {
    pub browser_context: BrowserContextId,
    pub site_info: SiteInfo,
    pub reuse_policy: ProcessReusePolicy,
}

impl SiteInstance {
    pub fn new(browser_context: BrowserContextId, site_info: SiteInfo) -> Self {
        Self {
            browser_context,
            site_info,
            reuse_policy: ProcessReusePolicy::Default,
        }
    }

    pub fn with_reuse_policy(mut self, policy: ProcessReusePolicy) -> Self {
        self.reuse_policy = policy;
        self
    }
}

/// The site a process is permanently committed to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProcessLock {
    /// Nothing committed yet
    #[default]
    Unlocked,
    /// Shared by sites that do not need a dedicated process
    AllowAnySite,
    /// Dedicated to one site
    LockedToSite(Url),
}

impl ProcessLock {
    pub fn is_unlocked(&self) -> bool {
        matches!(self, Self::Unlocked)
    }

    pub fn is_locked_to_site(&self) -> bool {
        matches!(self, Self::LockedToSite(_))
    }

    /// The lock a site needs
    pub fn for_site(site_info: &SiteInfo, requires_dedicated_process: bool) -> Self {
        if requires_dedicated_process {
            Self::LockedToSite(site_info.process_lock_url().clone())
        } else {
            Self::AllowAnySite
        }
    }
}

impl fmt::Display for ProcessLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlocked => write!(f, "unlocked"),
            Self::AllowAnySite => write!(f, "allow-any-site"),
            Self::LockedToSite(url) => write!(f, "locked:{}", url),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_site_for_url_keeps_registrable_host() {
        assert_eq!(
            site_for_url(&url("https://mail.a.example.com/inbox?x=1")),
            url("https://example.com/")
        );
        assert_eq!(site_for_url(&url("http://foo.com")), url("http://foo.com/"));
        assert_eq!(
            site_for_url(&url("http://127.0.0.1:8080/path")),
            url("http://127.0.0.1/")
        );
    }

    #[test]
    fn test_hostless_url_is_its_own_site() {
        let blank = url("about:blank");
        assert_eq!(site_for_url(&blank), blank);
        let info = SiteInfo::new(blank, StoragePartitionConfig::default());
        assert!(info.is_empty_site());
    }

    #[test]
    fn test_lock_for_site() {
        let info = SiteInfo::new(url("https://a.com/"), StoragePartitionConfig::default())
            .with_lock_url(url("https://lock.a.com/"));
        assert_eq!(
            ProcessLock::for_site(&info, true),
            ProcessLock::LockedToSite(url("https://lock.a.com/"))
        );
        assert_eq!(ProcessLock::for_site(&info, false), ProcessLock::AllowAnySite);
    }

    #[test]
    fn test_default_partition() {
        assert!(StoragePartitionConfig::default_for(true).is_default());
        assert!(StoragePartitionConfig::default_for(true).in_memory);
        assert!(!StoragePartitionConfig::new("ext", "p", false).is_default());
    }
}
