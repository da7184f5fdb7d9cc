//! Bookkeeping for sharing processes between site instances
//!
//! Three registries, all keyed by browser context and site URL:
//! - process-per-site: the sole host of a site
//! - site trackers: hosts with committed frames or expected navigations
//! - delayed shutdown: hosts kept around briefly after their last frame left

use std::collections::{BTreeMap, BTreeSet, HashMap};

use url::Url;

use crate::ids::{BrowserContextId, HostId};

type SiteKey = (BrowserContextId, Url);

/// Per-site host counts
#[derive(Debug, Default)]
struct SiteProcessCountTracker {
    map: HashMap<SiteKey, BTreeMap<HostId, usize>>,
}

impl SiteProcessCountTracker {
    fn increment(&mut self, key: SiteKey, host: HostId) {
        *self.map.entry(key).or_default().entry(host).or_insert(0) += 1;
    }

    fn decrement(&mut self, key: &SiteKey, host: HostId) -> bool {
        let Some(hosts) = self.map.get_mut(key) else {
            return false;
        };
        let Some(count) = hosts.get_mut(&host) else {
            return false;
        };
        *count -= 1;
        if *count == 0 {
            hosts.remove(&host);
        }
        if hosts.is_empty() {
            self.map.remove(key);
        }
        true
    }

    fn hosts_for(&self, key: &SiteKey) -> impl Iterator<Item = HostId> + '_ {
        self.map.get(key).into_iter().flat_map(|hosts| hosts.keys().copied())
    }

    fn contains(&self, key: &SiteKey, host: HostId) -> bool {
        self.map.get(key).is_some_and(|hosts| hosts.contains_key(&host))
    }

    fn remove_host(&mut self, host: HostId) {
        self.map.retain(|_, hosts| {
            hosts.remove(&host);
            !hosts.is_empty()
        });
    }
}

/// Registries consulted before creating a new process
#[derive(Debug, Default)]
pub struct ReuseRegistry {
    sole_hosts: HashMap<SiteKey, HostId>,
    committed: SiteProcessCountTracker,
    expected: SiteProcessCountTracker,
    delayed_shutdown: SiteProcessCountTracker,
}

impl ReuseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Process-per-site

    pub fn register_sole_process_host_for_site(
        &mut self,
        context: BrowserContextId,
        site_url: &Url,
        host: HostId,
    ) {
        self.sole_hosts.insert((context, site_url.clone()), host);
    }

    pub fn get_sole_process_host_for_site(
        &self,
        context: BrowserContextId,
        site_url: &Url,
    ) -> Option<HostId> {
        self.sole_hosts.get(&(context, site_url.clone())).copied()
    }

    // Committed frames and expected navigations

    pub fn add_frame_with_site(&mut self, context: BrowserContextId, site_url: &Url, host: HostId) {
        self.committed.increment((context, site_url.clone()), host);
    }

    pub fn remove_frame_with_site(
        &mut self,
        context: BrowserContextId,
        site_url: &Url,
        host: HostId,
    ) -> bool {
        self.committed.decrement(&(context, site_url.clone()), host)
    }

    pub fn add_expected_navigation_to_site(
        &mut self,
        context: BrowserContextId,
        site_url: &Url,
        host: HostId,
    ) {
        self.expected.increment((context, site_url.clone()), host);
    }

    pub fn remove_expected_navigation_to_site(
        &mut self,
        context: BrowserContextId,
        site_url: &Url,
        host: HostId,
    ) -> bool {
        self.expected.decrement(&(context, site_url.clone()), host)
    }

    // Delayed shutdown

    pub fn add_for_shutdown_delay(&mut self, context: BrowserContextId, site_url: &Url, host: HostId) {
        self.delayed_shutdown.increment((context, site_url.clone()), host);
    }

    /// Drop one delayed-shutdown entry, e.g. when its timer fires
    pub fn remove_for_shutdown_delay(
        &mut self,
        context: BrowserContextId,
        site_url: &Url,
        host: HostId,
    ) -> bool {
        self.delayed_shutdown.decrement(&(context, site_url.clone()), host)
    }

    /// Drop every delayed-shutdown entry of `host`
    pub fn stop_tracking_for_shutdown_delay(&mut self, host: HostId) {
        self.delayed_shutdown.remove_host(host);
    }

    pub fn is_tracked_for_shutdown_delay(
        &self,
        context: BrowserContextId,
        site_url: &Url,
        host: HostId,
    ) -> bool {
        self.delayed_shutdown.contains(&(context, site_url.clone()), host)
    }

    /// Hosts with a committed frame or an expected navigation for the site,
    /// plus delayed-shutdown hosts when `include_delayed` is set
    pub fn candidates_for_site(
        &self,
        context: BrowserContextId,
        site_url: &Url,
        include_delayed: bool,
    ) -> Vec<HostId> {
        let key = (context, site_url.clone());
        let mut hosts: BTreeSet<HostId> = self
            .committed
            .hosts_for(&key)
            .chain(self.expected.hosts_for(&key))
            .collect();
        if include_delayed {
            hosts.extend(self.delayed_shutdown.hosts_for(&key));
        }
        hosts.into_iter().collect()
    }

    /// Forget a host everywhere
    pub fn remove_host(&mut self, host: HostId) {
        self.sole_hosts.retain(|_, h| *h != host);
        self.committed.remove_host(host);
        self.expected.remove_host(host);
        self.delayed_shutdown.remove_host(host);
    }

    /// Forget everything belonging to a context
    pub fn remove_context(&mut self, context: BrowserContextId) {
        self.sole_hosts.retain(|(ctx, _), _| *ctx != context);
        for tracker in [&mut self.committed, &mut self.expected, &mut self.delayed_shutdown] {
            tracker.map.retain(|(ctx, _), _| *ctx != context);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    const CTX: BrowserContextId = BrowserContextId(1);

    #[test]
    fn test_sole_host_is_per_context() {
        let mut registry = ReuseRegistry::new();
        let a = site("https://a.com/");
        registry.register_sole_process_host_for_site(CTX, &a, HostId(1));

        assert_eq!(registry.get_sole_process_host_for_site(CTX, &a), Some(HostId(1)));
        assert_eq!(registry.get_sole_process_host_for_site(BrowserContextId(2), &a), None);

        registry.remove_host(HostId(1));
        assert_eq!(registry.get_sole_process_host_for_site(CTX, &a), None);
    }

    #[test]
    fn test_frames_are_counted() {
        let mut registry = ReuseRegistry::new();
        let a = site("https://a.com/");
        registry.add_frame_with_site(CTX, &a, HostId(1));
        registry.add_frame_with_site(CTX, &a, HostId(1));
        registry.remove_frame_with_site(CTX, &a, HostId(1));
        assert_eq!(registry.candidates_for_site(CTX, &a, false), vec![HostId(1)]);

        registry.remove_frame_with_site(CTX, &a, HostId(1));
        assert!(registry.candidates_for_site(CTX, &a, false).is_empty());
        assert!(!registry.remove_frame_with_site(CTX, &a, HostId(1)));
    }

    #[test]
    fn test_delayed_hosts_only_when_requested() {
        let mut registry = ReuseRegistry::new();
        let a = site("https://a.com/");
        registry.add_expected_navigation_to_site(CTX, &a, HostId(2));
        registry.add_for_shutdown_delay(CTX, &a, HostId(3));

        assert_eq!(registry.candidates_for_site(CTX, &a, false), vec![HostId(2)]);
        assert_eq!(
            registry.candidates_for_site(CTX, &a, true),
            vec![HostId(2), HostId(3)]
        );

        registry.stop_tracking_for_shutdown_delay(HostId(3));
        assert!(!registry.is_tracked_for_shutdown_delay(CTX, &a, HostId(3)));
    }

    #[test]
    fn test_remove_context() {
        let mut registry = ReuseRegistry::new();
        let a = site("https://a.com/");
        registry.add_frame_with_site(CTX, &a, HostId(1));
        registry.register_sole_process_host_for_site(CTX, &a, HostId(1));
        registry.remove_context(CTX);
        assert!(registry.candidates_for_site(CTX, &a, true).is_empty());
        assert_eq!(registry.get_sole_process_host_for_site(CTX, &a), None);
    }
}
