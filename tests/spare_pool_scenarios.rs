//! Spare pool behaviour observed from outside the crate

use std::rc::Rc;
use std::time::Duration;

use procpool::{
    metrics,
    testing::{FakeLauncher, ObservedEvent, RecordingObserver},
    Browser, BrowserContextId, NavigationId, NavigationStage, NoSpareRendererReason,
    ProcessAllocationContext, SpareObserver, SpareRendererDispatchResult, StoragePartitionConfig,
};
use procpool_config::PoolConfig;
use url::Url;

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

fn setup(config: PoolConfig) -> (Browser, Rc<FakeLauncher>, BrowserContextId) {
    let launcher = Rc::new(FakeLauncher::new());
    let mut browser = Browser::new(config, launcher.clone());
    let ctx = browser.create_browser_context("default", false);
    (browser, launcher, ctx)
}

fn navigation() -> ProcessAllocationContext {
    ProcessAllocationContext::for_navigation(NavigationStage::AfterResponse, NavigationId(1), false)
}

#[test]
fn test_warmup_for_new_context_overrides_old_spare() {
    let (mut browser, launcher, first) = setup(PoolConfig::default());
    let second = browser.create_browser_context("second", false);

    browser.spare_manager().warmup_spare(first, None);
    browser.run_until_idle();
    let old = browser.spare_manager().spares()[0];

    browser.spare_manager().warmup_spare(second, None);
    browser.run_until_idle();

    let spares = browser.spare_manager().spares();
    assert_eq!(spares.len(), 1);
    assert_ne!(spares[0], old);
    assert_eq!(browser.host(spares[0]).unwrap().browser_context(), second);
    assert!(launcher.was_terminated(old));
    assert_eq!(
        browser.metrics().bucket_count(
            metrics::SPARE_RENDERER_DISPATCH_RESULT,
            SpareRendererDispatchResult::Overridden as i64
        ),
        1
    );
}

#[test]
fn test_warmup_cancels_pending_deferral() {
    let (mut browser, launcher, ctx) = setup(PoolConfig::default());
    browser
        .spare_manager()
        .prepare_for_future_requests(ctx, Some(secs(3)));
    assert!(browser.spare_manager().has_deferred_creation());

    browser.spare_manager().warmup_spare(ctx, None);
    assert!(!browser.spare_manager().has_deferred_creation());
    assert_eq!(browser.spare_manager().spares().len(), 1);

    browser.fast_forward_by(secs(5));
    assert_eq!(browser.spare_manager().spares().len(), 1);
    assert_eq!(launcher.launched_hosts().len(), 1);
}

#[test]
fn test_repeated_warmup_keeps_one_process_until_later_deadline() {
    let (mut browser, launcher, ctx) = setup(PoolConfig::default());
    browser.spare_manager().warmup_spare(ctx, Some(secs(4)));
    browser.spare_manager().warmup_spare(ctx, Some(secs(9)));
    let spare = browser.spare_manager().spares()[0];

    browser.fast_forward_by(secs(8));
    assert_eq!(browser.spare_manager().spares(), vec![spare]);
    assert_eq!(launcher.launched_hosts(), vec![spare]);

    browser.fast_forward_by(secs(1));
    assert!(!browser.spare_manager().has_spare_renderer());
    assert_eq!(
        browser.spare_manager().absence_reason(),
        NoSpareRendererReason::Timeout
    );
}

#[test]
fn test_taken_spare_leaves_pool_and_is_replaced() {
    let (mut browser, _launcher, ctx) = setup(PoolConfig::default());
    browser.spare_manager().warmup_spare(ctx, None);
    browser.run_until_idle();
    let spare = browser.spare_manager().spares()[0];

    let site = browser
        .site_instance_for_url(ctx, &Url::parse("https://news.test/").unwrap())
        .unwrap();
    let host = browser
        .get_process_host_for_site_instance(&site, navigation())
        .unwrap();
    assert_eq!(host, spare);
    assert!(!browser.spare_manager().spare_ids().contains(&spare));
    // Keep-at-all-times warms a replacement.
    assert_eq!(browser.spare_manager().spares().len(), 1);
    assert_eq!(
        browser.metrics().bucket_count(
            metrics::SPARE_RENDERER_DISPATCH_RESULT,
            SpareRendererDispatchResult::Used as i64
        ),
        1
    );
}

#[test]
fn test_pool_empties_without_keep_mode() {
    let mut config = PoolConfig::default();
    config.spare.keep_spare_at_all_times = false;
    let (mut browser, _launcher, ctx) = setup(config);
    browser.spare_manager().warmup_spare(ctx, None);
    browser.run_until_idle();

    let site = browser
        .site_instance_for_url(ctx, &Url::parse("https://news.test/").unwrap())
        .unwrap();
    browser
        .get_process_host_for_site_instance(&site, navigation())
        .unwrap();
    assert!(!browser.spare_manager().has_spare_renderer());
}

#[test]
fn test_spare_never_crosses_partitions() {
    let (mut browser, _launcher, ctx) = setup(PoolConfig::default());
    browser.spare_manager().warmup_spare(ctx, None);
    browser.run_until_idle();
    let spare = browser.spare_manager().spares()[0];

    let mut site = browser
        .site_instance_for_url(ctx, &Url::parse("https://app.test/").unwrap())
        .unwrap();
    site.site_info = procpool::SiteInfo::new(
        site.site_info.site_url().clone(),
        StoragePartitionConfig::new("app.test", "sandbox", true),
    );

    assert_eq!(
        browser
            .spare_manager()
            .maybe_take_spare(ctx, &site, navigation()),
        None
    );
    assert_eq!(browser.spare_manager().spares(), vec![spare]);
}

#[test]
fn test_context_destroyed_during_deferral() {
    let (mut browser, launcher, ctx) = setup(PoolConfig::default());
    browser
        .spare_manager()
        .prepare_for_future_requests(ctx, Some(secs(1)));
    browser.destroy_browser_context(ctx).unwrap();

    browser.fast_forward_by(secs(2));
    assert!(!browser.spare_manager().has_spare_renderer());
    assert!(launcher.launched_hosts().is_empty());
}

#[test]
fn test_process_limit_gates_spare_creation() {
    let (mut browser, _launcher, ctx) = setup(PoolConfig::default());
    let site = browser
        .site_instance_for_url(ctx, &Url::parse("https://busy.test/").unwrap())
        .unwrap();
    browser
        .get_process_host_for_site_instance(&site, navigation())
        .unwrap();
    browser.spare_manager().cleanup_spares_for_testing();
    assert_eq!(browser.host_count(), 1);

    browser.set_max_renderer_process_count(1);
    browser.spare_manager().warmup_spare(ctx, None);
    assert!(!browser.spare_manager().has_spare_renderer());

    browser.set_max_renderer_process_count(2);
    browser.spare_manager().warmup_spare(ctx, None);
    assert_eq!(browser.spare_manager().spares().len(), 1);
}

#[test]
fn test_multiple_spares_stay_within_count() {
    let mut config = PoolConfig::default();
    config.spare.multiple_spares = true;
    config.spare.multiple_spares_count = 3;
    let (mut browser, _launcher, ctx) = setup(config);

    browser.spare_manager().warmup_spare(ctx, None);
    browser.run_until_idle();
    assert_eq!(browser.spare_manager().spares().len(), 3);

    // Further warmups only extend the existing pool.
    browser.spare_manager().warmup_spare(ctx, None);
    browser.set_physical_memory_mb(16_384);
    browser.run_until_idle();
    assert_eq!(browser.spare_manager().spares().len(), 3);
}

#[test]
fn test_spare_observer_sees_ready_and_changes() {
    let (mut browser, _launcher, ctx) = setup(PoolConfig::default());
    let observer = Rc::new(RecordingObserver::new());
    browser
        .spare_manager()
        .add_observer(observer.clone() as Rc<dyn SpareObserver>);

    browser.spare_manager().warmup_spare(ctx, None);
    browser.run_until_idle();
    let spare = browser.spare_manager().spares()[0];
    browser.spare_manager().cleanup_spares_for_testing();

    let events = observer.events();
    assert!(events.contains(&ObservedEvent::SparesChanged(vec![spare])));
    assert!(events.contains(&ObservedEvent::SpareReady(spare)));
    assert_eq!(events.last(), Some(&ObservedEvent::SparesChanged(vec![])));
}
