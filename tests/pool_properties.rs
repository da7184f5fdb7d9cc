//! Property-based tests for spare pool invariants
//!
//! Random sequences of warmups, allocations, context teardown and clock
//! movement must never break the pool's shape:
//! - the pool never holds more spares than the configured count
//! - every pooled spare is a live, unused host of the pool's context
//! - at most one entry is the primary spare

use std::rc::Rc;
use std::time::Duration;

use proptest::prelude::*;
use procpool::{
    testing::FakeLauncher, Browser, BrowserContextId, NavigationId, NavigationStage,
    ProcessAllocationContext,
};
use procpool_config::PoolConfig;
use url::Url;

#[derive(Debug, Clone)]
enum Op {
    Warmup { ctx: usize, timeout_secs: Option<u64> },
    Prepare { ctx: usize, delay_secs: Option<u64> },
    Allocate { ctx: usize, site: usize },
    Crash { nth: usize },
    DestroyContext { ctx: usize },
    Advance { secs: u64 },
    Idle(bool),
    CleanupExtras,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..3usize, proptest::option::of(1..20u64))
            .prop_map(|(ctx, timeout_secs)| Op::Warmup { ctx, timeout_secs }),
        (0..3usize, proptest::option::of(1..5u64))
            .prop_map(|(ctx, delay_secs)| Op::Prepare { ctx, delay_secs }),
        (0..3usize, 0..4usize).prop_map(|(ctx, site)| Op::Allocate { ctx, site }),
        (0..8usize).prop_map(|nth| Op::Crash { nth }),
        (0..3usize).prop_map(|ctx| Op::DestroyContext { ctx }),
        (0..30u64).prop_map(|secs| Op::Advance { secs }),
        any::<bool>().prop_map(Op::Idle),
        Just(Op::CleanupExtras),
    ]
}

const SITES: [&str; 4] = [
    "https://one.test/",
    "https://two.test/",
    "https://three.test/",
    "https://four.test/",
];

fn apply(browser: &mut Browser, launcher: &FakeLauncher, contexts: &[BrowserContextId], op: &Op) {
    match *op {
        Op::Warmup { ctx, timeout_secs } => browser
            .spare_manager()
            .warmup_spare(contexts[ctx], timeout_secs.map(Duration::from_secs)),
        Op::Prepare { ctx, delay_secs } => {
            if browser.is_context_alive(contexts[ctx]) {
                browser
                    .spare_manager()
                    .prepare_for_future_requests(contexts[ctx], delay_secs.map(Duration::from_secs));
            }
        }
        Op::Allocate { ctx, site } => {
            let url = Url::parse(SITES[site]).unwrap();
            if let Ok(instance) = browser.site_instance_for_url(contexts[ctx], &url) {
                let allocation = ProcessAllocationContext::for_navigation(
                    NavigationStage::BeforeNetworkRequest,
                    NavigationId(site as u64),
                    false,
                );
                let _ = browser.get_process_host_for_site_instance(&instance, allocation);
            }
        }
        Op::Crash { nth } => {
            let hosts = browser.host_ids();
            if let Some(host) = hosts.get(nth % hosts.len().max(1)) {
                launcher.crash(*host);
            }
        }
        Op::DestroyContext { ctx } => {
            let _ = browser.destroy_browser_context(contexts[ctx]);
        }
        Op::Advance { secs } => browser.fast_forward_by(Duration::from_secs(secs)),
        Op::Idle(idle) => browser.set_browser_idle(idle),
        Op::CleanupExtras => browser.spare_manager().cleanup_extra_spares(None),
    }
    browser.run_until_idle();
}

fn check_pool(browser: &mut Browser, limit: usize) -> Result<(), TestCaseError> {
    let context = browser.spare_manager().spare_context();
    let entries = browser.spare_manager().entries().to_vec();
    prop_assert!(entries.len() <= limit, "pool of {} exceeds {}", entries.len(), limit);
    prop_assert!(entries.iter().filter(|e| e.primary).count() <= 1);
    for entry in &entries {
        let host = browser.host(entry.host);
        prop_assert!(host.is_some(), "pooled spare {} has no host", entry.host);
        let host = host.unwrap();
        prop_assert!(!host.is_dead());
        prop_assert!(host.is_unused());
        prop_assert_eq!(Some(host.browser_context()), context);
        prop_assert!(browser.is_context_alive(host.browser_context()));
    }
    Ok(())
}

fn run(config: PoolConfig, limit: usize, ops: &[Op]) -> Result<(), TestCaseError> {
    let launcher = Rc::new(FakeLauncher::new());
    let mut browser = Browser::new(config, launcher.clone()).with_rng_seed(3);
    let contexts: Vec<BrowserContextId> = (0..3)
        .map(|i| browser.create_browser_context(format!("ctx-{}", i), i == 2))
        .collect();
    for op in ops {
        apply(&mut browser, &launcher, &contexts, op);
        check_pool(&mut browser, limit)?;
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A single-spare pool never holds more than one spare
    #[test]
    fn prop_single_spare_pool_shape(ops in prop::collection::vec(op_strategy(), 1..40)) {
        run(PoolConfig::default(), 1, &ops)?;
    }

    /// A multi-spare pool never exceeds its configured count
    #[test]
    fn prop_multi_spare_pool_shape(
        count in 2..5usize,
        ops in prop::collection::vec(op_strategy(), 1..40)
    ) {
        let mut config = PoolConfig::default();
        config.spare.multiple_spares = true;
        config.spare.multiple_spares_count = count;
        run(config, count, &ops)?;
    }

    /// Ending every context leaves nothing pooled
    #[test]
    fn prop_destroying_all_contexts_empties_pool(ops in prop::collection::vec(op_strategy(), 1..30)) {
        let launcher = Rc::new(FakeLauncher::new());
        let mut browser = Browser::new(PoolConfig::default(), launcher.clone());
        let contexts: Vec<BrowserContextId> = (0..3)
            .map(|i| browser.create_browser_context(format!("ctx-{}", i), false))
            .collect();
        for op in &ops {
            apply(&mut browser, &launcher, &contexts, op);
        }
        for ctx in &contexts {
            let _ = browser.destroy_browser_context(*ctx);
        }
        browser.fast_forward_by(Duration::from_secs(60));
        prop_assert!(!browser.spare_manager().has_spare_renderer());
        prop_assert!(!browser.spare_manager().has_deferred_creation());
    }
}
