//! Drives a browser over real child processes

#![cfg(unix)]

use std::rc::Rc;
use std::time::Duration;

use procpool::{metrics, Browser, Driver, SpareRendererDispatchResult};
use procpool_config::PoolConfig;
use procpool_launcher::{OsLauncher, RendererCommand};

fn browser(command: RendererCommand) -> (Browser, Rc<OsLauncher>) {
    let launcher = Rc::new(OsLauncher::new(command));
    (Browser::new(PoolConfig::default(), launcher.clone()), launcher)
}

#[tokio::test]
async fn test_crashing_spare_is_dropped() {
    let (mut browser, launcher) = browser(RendererCommand::new("sh").args(["-c", "exit 3"]));
    let ctx = browser.create_browser_context("default", false);
    browser.spare_manager().warmup_spare(ctx, None);
    let spare = browser.spare_manager().spares()[0];

    let mut driver = Driver::new(browser);
    driver.run_for(Duration::from_millis(500)).await;

    let mut browser = driver.into_inner();
    assert!(!browser.spare_manager().has_spare_renderer());
    assert!(browser.host(spare).is_none());
    assert_eq!(launcher.pid(spare), None);
    assert_eq!(launcher.running_count(), 0);
    assert_eq!(
        browser.metrics().bucket_count(
            metrics::SPARE_RENDERER_DISPATCH_RESULT,
            SpareRendererDispatchResult::Killed as i64
        ),
        1
    );
}

#[tokio::test]
async fn test_long_running_spare_survives_until_cleanup() {
    let (mut browser, launcher) = browser(RendererCommand::new("sleep").args(["30"]));
    let ctx = browser.create_browser_context("default", false);
    browser.spare_manager().warmup_spare(ctx, None);

    let mut driver = Driver::new(browser);
    driver.run_for(Duration::from_millis(200)).await;

    let mut browser = driver.into_inner();
    let spare = browser.spare_manager().spares()[0];
    assert!(browser.host(spare).unwrap().is_ready());
    assert!(launcher.pid(spare).is_some());

    browser.spare_manager().cleanup_spares_for_testing();
    assert_eq!(browser.host_count(), 0);
    assert_eq!(launcher.pid(spare), None);
}
