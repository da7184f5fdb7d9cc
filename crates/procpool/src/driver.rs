//! Real-time driver for the browser sequence
//!
//! The [`Browser`] keeps a virtual clock so tests stay deterministic. The
//! driver ties that clock to tokio time: it sleeps until the next delayed
//! task is due, wakes on launcher events, and runs the sequence in between.
//! `Browser` is `!Send`, so the driver runs on a current-thread runtime or
//! inside a `LocalSet`.

use std::{future::Future, time::Duration};

use tokio::time::Instant;
use tracing::debug;

use crate::{browser::Browser, scheduler::TimeTicks};

pub struct Driver {
    browser: Browser,
    origin: Instant,
}

impl Driver {
    pub fn new(browser: Browser) -> Self {
        let now = Instant::now();
        let origin = now
            .checked_sub(browser.now().since_origin())
            .unwrap_or(now);
        Self { browser, origin }
    }

    pub fn browser(&self) -> &Browser {
        &self.browser
    }

    pub fn browser_mut(&mut self) -> &mut Browser {
        &mut self.browser
    }

    pub fn into_inner(self) -> Browser {
        self.browser
    }

    /// Drive the sequence until `shutdown` completes
    pub async fn run_until<F: Future>(&mut self, shutdown: F) -> F::Output {
        tokio::pin!(shutdown);
        loop {
            self.sync_clock();
            self.browser.run_until_idle();
            let wake = self
                .browser
                .next_task_deadline()
                .map(|deadline| self.origin + deadline.since_origin());

            tokio::select! {
                biased;
                output = &mut shutdown => {
                    self.sync_clock();
                    self.browser.run_until_idle();
                    debug!(now = %self.browser.now(), "Driver stopped");
                    return output;
                }
                event = self.browser.recv_event() => {
                    if let Some(event) = event {
                        self.browser.handle_launcher_event(event);
                    }
                }
                _ = tokio::time::sleep_until(wake.unwrap_or_else(Instant::now)), if wake.is_some() => {}
            }
        }
    }

    /// Drive the sequence for `duration` of real time
    pub async fn run_for(&mut self, duration: Duration) {
        self.run_until(tokio::time::sleep(duration)).await;
    }

    fn sync_clock(&mut self) {
        let elapsed = TimeTicks::from_origin(self.origin.elapsed());
        if elapsed > self.browser.now() {
            self.browser.advance_clock_to(elapsed);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use procpool_config::PoolConfig;

    use super::*;
    use crate::testing::FakeLauncher;

    #[tokio::test(start_paused = true)]
    async fn test_spare_times_out_in_real_time() {
        let launcher = Rc::new(FakeLauncher::new());
        let mut browser = Browser::new(PoolConfig::default(), launcher);
        let ctx = browser.create_browser_context("default", false);
        browser
            .spare_manager()
            .warmup_spare(ctx, Some(Duration::from_secs(5)));

        let mut driver = Driver::new(browser);
        driver.run_for(Duration::from_secs(4)).await;
        assert!(driver.browser_mut().spare_manager().has_spare_renderer());

        driver.run_for(Duration::from_secs(2)).await;
        assert!(!driver.browser_mut().spare_manager().has_spare_renderer());
        assert!(driver.browser().now().since_origin() >= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_launch_events_are_drained() {
        let launcher = Rc::new(FakeLauncher::manual());
        let mut browser = Browser::new(PoolConfig::default(), launcher.clone());
        let ctx = browser.create_browser_context("default", false);
        browser.spare_manager().warmup_spare(ctx, None);
        let spare = browser.spare_manager().spares()[0];

        let mut driver = Driver::new(browser);
        assert!(launcher.complete_launch(spare));
        driver.run_for(Duration::from_millis(10)).await;
        assert!(driver.browser().host(spare).unwrap().is_ready());
    }
}
