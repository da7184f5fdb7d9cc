//! # procpool
//!
//! **Purpose**: Renderer-process allocation and lifecycle for a multi-process
//! browser
//!
//! Decides which OS process hosts a unit of web content, keeps pre-warmed
//! spare processes ready for upcoming navigations, and tracks each process's
//! ref-counted lifetime, priority and shutdown timing.
//!
//! ## Features
//!
//! - **Allocation**: spare -> process-per-site -> pending/committed reuse ->
//!   existing host -> new host, with suitability checks at every step
//! - **Spare Pool**: deferred warm-up, timeouts where the longest deadline
//!   wins, multiple spares, replenishment once the browser is idle
//! - **Lifetime**: `RefToken` guards for keep-alive, worker, shutdown-delay
//!   and pending-reuse counts; teardown once nothing holds the host
//! - **Priority**: derived from visibility clients, media, workers and
//!   loading boosts, pushed to the launcher when it changes
//! - **Metrics**: histogram samples for every spare decision
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::rc::Rc;
//!
//! use procpool::{Browser, ProcessAllocationContext, ProcessAllocationSource, ProcessLauncher};
//! use procpool_config::PoolConfig;
//!
//! # struct Launcher;
//! # impl ProcessLauncher for Launcher {
//! #     fn launch(&self, _: procpool::LaunchRequest) -> Result<(), procpool::LaunchError> { Ok(()) }
//! #     fn set_priority(&self, _: procpool::HostId, _: &procpool::ProcessPriority) -> Result<(), procpool::LaunchError> { Ok(()) }
//! #     fn terminate(&self, _: procpool::HostId, _: i32) -> Result<(), procpool::LaunchError> { Ok(()) }
//! # }
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut browser = Browser::new(PoolConfig::default(), Rc::new(Launcher));
//! let ctx = browser.create_browser_context("default", false);
//!
//! // Warm a spare ahead of the first navigation
//! browser.spare_manager().warmup_spare(ctx, None);
//! browser.run_until_idle();
//!
//! let url = url::Url::parse("https://example.com/")?;
//! let site = browser.site_instance_for_url(ctx, &url)?;
//! let host = browser.get_process_host_for_site_instance(
//!     &site,
//!     ProcessAllocationContext::new(ProcessAllocationSource::NavigationRequest),
//! )?;
//! println!("allocated {host}");
//! # Ok(())
//! # }
//! ```

pub mod allocation;
pub mod allocator;
pub mod browser;
pub mod context;
pub mod driver;
pub mod embedder;
pub mod error;
pub mod host;
pub mod ids;
pub mod launcher;
pub mod logging;
pub mod metrics;
pub mod reuse;
pub mod scheduler;
pub mod shutdown;
pub mod site;
pub mod spare;
pub mod suitability;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use allocation::{
    NavigationProcessAllocationContext, NavigationStage, ProcessAllocationContext,
    ProcessAllocationSource,
};
pub use browser::Browser;
pub use context::BrowserContext;
pub use driver::Driver;
pub use embedder::{DefaultEmbedder, EmbedderHooks};
pub use error::{LaunchError, PoolError, Result};
pub use host::{
    ChildProcessImportance, DelayShutdownReason, HostFlags, HostObserver, HostState, ListenerId,
    PriorityClient, PriorityClientId, PriorityLevel, ProcessHost, ProcessPriority, RefKind,
    RefToken, SpareObserver,
};
pub use ids::{BrowserContextId, HostId, KeepAliveHandleId, NavigationId};
pub use launcher::{
    ChildProcessTerminationInfo, LaunchRequest, LauncherEvent, ProcessLauncher, TerminationStatus,
    RESULT_CODE_KILLED_BAD_MESSAGE, RESULT_CODE_NORMAL_EXIT,
};
pub use metrics::{Metrics, MetricsSnapshot};
pub use reuse::ReuseRegistry;
pub use scheduler::{TaskId, TaskRunner, TimeTicks};
pub use shutdown::FastShutdownOptions;
pub use site::{
    site_for_url, ProcessLock, ProcessReusePolicy, SiteInfo, SiteInstance, StoragePartitionConfig,
};
pub use spare::{
    ApplicationState, MemoryPressureLevel, NoSpareRendererReason, SpareEntry,
    SpareProcessMaybeTakeAction, SpareRendererDispatchResult, SpareState, SpareManager,
};
pub use suitability::IsolationContext;
