//! A pool built from a config file and run by the tokio driver

use std::rc::Rc;
use std::time::Duration;

use procpool::{testing::FakeLauncher, Browser, Driver, NoSpareRendererReason};
use procpool_config::{ConfigLoader, Platform};
use tempfile::TempDir;

const CONFIG: &str = r#"
[spare]
multiple_spares = true
multiple_spares_count = 2

[process]
platform = "mobile"
keep_alive_timeout_ms = 5000
process_per_site = ["https://mail.test"]

[logging]
level = "debug"
"#;

fn load(dir: &TempDir) -> procpool_config::PoolConfig {
    let path = dir.path().join("procpool.toml");
    std::fs::write(&path, CONFIG).unwrap();
    ConfigLoader::with_path(&path).load().unwrap()
}

#[test]
fn test_file_settings_reach_the_browser() {
    let dir = TempDir::new().unwrap();
    let config = load(&dir);
    assert_eq!(config.process.platform, Platform::Mobile);

    let mut browser = Browser::new(config, Rc::new(FakeLauncher::new()));
    assert_eq!(browser.platform(), Platform::Mobile);
    assert!(!browser.should_delay_process_shutdown());

    let ctx = browser.create_browser_context("default", false);
    browser.spare_manager().warmup_spare(ctx, None);
    browser.run_until_idle();
    assert_eq!(browser.spare_manager().spares().len(), 2);

    let instance = browser
        .site_instance_for_url(ctx, &url::Url::parse("https://inbox.mail.test/").unwrap())
        .unwrap();
    assert!(browser.uses_process_per_site(&instance));
}

#[tokio::test(start_paused = true)]
async fn test_driver_expires_timed_spare() {
    let dir = TempDir::new().unwrap();
    let config = load(&dir);
    let mut browser = Browser::new(config, Rc::new(FakeLauncher::new()));
    let ctx = browser.create_browser_context("default", false);
    browser
        .spare_manager()
        .warmup_spare(ctx, Some(Duration::from_secs(10)));

    let mut driver = Driver::new(browser);
    driver.run_for(Duration::from_secs(9)).await;
    assert!(driver.browser_mut().spare_manager().has_spare_renderer());

    driver.run_for(Duration::from_secs(2)).await;
    let mut browser = driver.into_inner();
    assert!(!browser.spare_manager().has_spare_renderer());
    assert_eq!(
        browser.spare_manager().absence_reason(),
        NoSpareRendererReason::Timeout
    );
}

#[tokio::test(start_paused = true)]
async fn test_driver_stops_on_shutdown_signal() {
    let mut browser = Browser::new(
        procpool_config::PoolConfig::default(),
        Rc::new(FakeLauncher::new()),
    );
    let ctx = browser.create_browser_context("default", false);
    browser.spare_manager().warmup_spare(ctx, None);

    let (tx, rx) = tokio::sync::oneshot::channel::<&'static str>();
    tx.send("stop").unwrap();
    let mut driver = Driver::new(browser);
    let reason = driver.run_until(rx).await.unwrap();
    assert_eq!(reason, "stop");
    assert!(driver.browser().host_count() >= 1);
}
