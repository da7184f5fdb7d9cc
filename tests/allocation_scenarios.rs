//! End-to-end allocation scenarios through the public browser API

use std::rc::Rc;

use procpool::{
    testing::{FakeLauncher, ScriptedEmbedder},
    Browser, BrowserContextId, HostId, NavigationId, NavigationStage, PoolError,
    ProcessAllocationContext, ProcessAllocationSource, ProcessLock, ProcessReusePolicy,
    SiteInstance,
};
use procpool_config::PoolConfig;
use url::Url;

fn browser(config: PoolConfig) -> (Browser, Rc<FakeLauncher>) {
    let launcher = Rc::new(FakeLauncher::new());
    let browser = Browser::new(config, launcher.clone()).with_rng_seed(42);
    (browser, launcher)
}

fn instance(browser: &Browser, ctx: BrowserContextId, url: &str) -> SiteInstance {
    browser
        .site_instance_for_url(ctx, &Url::parse(url).unwrap())
        .unwrap()
}

fn navigation(id: u64) -> ProcessAllocationContext {
    ProcessAllocationContext::for_navigation(
        NavigationStage::BeforeNetworkRequest,
        NavigationId(id),
        false,
    )
}

fn allocate(browser: &mut Browser, ctx: BrowserContextId, url: &str, nav: u64) -> HostId {
    let site = instance(browser, ctx, url);
    let host = browser
        .get_process_host_for_site_instance(&site, navigation(nav))
        .unwrap();
    browser.run_until_idle();
    host
}

#[test]
fn test_distinct_sites_get_distinct_locked_hosts() {
    let (mut browser, _launcher) = browser(PoolConfig::default());
    let ctx = browser.create_browser_context("default", false);

    let sites = ["https://alpha.test/", "https://beta.test/", "https://gamma.test/"];
    let hosts: Vec<HostId> = sites
        .iter()
        .enumerate()
        .map(|(i, url)| allocate(&mut browser, ctx, url, i as u64 + 1))
        .collect();

    for (host, url) in hosts.iter().zip(sites) {
        assert_eq!(
            browser.host(*host).unwrap().process_lock(),
            &ProcessLock::LockedToSite(Url::parse(url).unwrap())
        );
    }
    assert_ne!(hosts[0], hosts[1]);
    assert_ne!(hosts[1], hosts[2]);
    // Every allocation leaves a fresh spare behind.
    assert_eq!(browser.spare_manager().spares().len(), 1);
    assert_eq!(browser.host_count(), 4);
}

#[test]
fn test_contexts_never_share_hosts() {
    let mut config = PoolConfig::default();
    config.process.process_per_site = vec!["https://shared.test".to_string()];
    let (mut browser, _launcher) = browser(config);
    let first = browser.create_browser_context("first", false);
    let second = browser.create_browser_context("second", true);

    let a = allocate(&mut browser, first, "https://shared.test/a", 1);
    let b = allocate(&mut browser, second, "https://shared.test/b", 2);
    let c = allocate(&mut browser, first, "https://www.shared.test/c", 3);

    assert_ne!(a, b);
    assert_eq!(a, c);
    assert_eq!(browser.host(b).unwrap().browser_context(), second);
}

#[test]
fn test_process_per_site_policy_shares_one_host() {
    let (mut browser, _launcher) = browser(PoolConfig::default());
    let ctx = browser.create_browser_context("default", false);

    let first = instance(&browser, ctx, "https://mail.example.org/inbox")
        .with_reuse_policy(ProcessReusePolicy::ProcessPerSite);
    let second = instance(&browser, ctx, "https://docs.example.org/")
        .with_reuse_policy(ProcessReusePolicy::ProcessPerSite);

    let a = browser
        .get_process_host_for_site_instance(&first, navigation(1))
        .unwrap();
    let b = browser
        .get_process_host_for_site_instance(&second, navigation(2))
        .unwrap();
    assert_eq!(a, b);
    assert_eq!(
        browser
            .reuse_registry()
            .get_sole_process_host_for_site(ctx, first.site_info.site_url()),
        Some(a)
    );
}

#[test]
fn test_subframes_join_committed_site() {
    let launcher = Rc::new(FakeLauncher::new());
    let embedder = Rc::new(ScriptedEmbedder::new());
    // Spares are tried before any reuse lookup.
    embedder.refuse_spares(true);
    let mut browser = Browser::new(PoolConfig::default(), launcher).with_embedder(embedder);
    let ctx = browser.create_browser_context("default", false);

    let main = instance(&browser, ctx, "https://widgets.test/");
    let host = browser
        .get_process_host_for_site_instance(&main, navigation(1))
        .unwrap();
    browser.add_frame_with_site(host, &main.site_info).unwrap();

    let subframe = instance(&browser, ctx, "https://cdn.widgets.test/frame")
        .with_reuse_policy(ProcessReusePolicy::ReusePendingOrCommittedSiteSubframe);
    let reused = browser
        .get_process_host_for_site_instance(
            &subframe,
            ProcessAllocationContext::new(ProcessAllocationSource::Test),
        )
        .unwrap();
    assert_eq!(reused, host);

    browser.remove_frame_with_site(host, &main.site_info).unwrap();
    let fresh = browser
        .get_process_host_for_site_instance(
            &subframe,
            ProcessAllocationContext::new(ProcessAllocationSource::Test),
        )
        .unwrap();
    assert_ne!(fresh, host);
}

#[test]
fn test_destroyed_context_rejects_allocation() {
    let (mut browser, launcher) = browser(PoolConfig::default());
    let ctx = browser.create_browser_context("default", false);
    let site = instance(&browser, ctx, "https://gone.test/");
    browser.destroy_browser_context(ctx).unwrap();

    let result = browser.get_process_host_for_site_instance(&site, navigation(1));
    assert!(matches!(result, Err(PoolError::BrowserContextDestroyed(_))));
    assert!(launcher.launched_hosts().is_empty());
}

#[test]
fn test_embedder_partition_keeps_hosts_apart() {
    let launcher = Rc::new(FakeLauncher::new());
    let embedder = Rc::new(ScriptedEmbedder::new());
    let mut browser = Browser::new(PoolConfig::default(), launcher).with_embedder(embedder.clone());
    let ctx = browser.create_browser_context("default", false);
    embedder.set_partition(
        Url::parse("https://isolated.test/").unwrap(),
        procpool::StoragePartitionConfig::new("isolated.test", "jar", false),
    );

    browser.spare_manager().warmup_spare(ctx, None);
    browser.run_until_idle();
    let spare = browser.spare_manager().spares()[0];

    let host = allocate(&mut browser, ctx, "https://isolated.test/", 1);
    assert_ne!(host, spare);
    assert!(!browser.host(host).unwrap().storage_partition().is_default());
    assert!(browser.spare_manager().spare_ids().contains(&spare));
}
