//! # procpool-launcher
//!
//! **Purpose**: OS process launching for the procpool renderer pool
//!
//! Implements [`procpool::ProcessLauncher`] on top of `tokio::process`, so a
//! [`procpool::Browser`] can run real renderer processes instead of fakes.
//!
//! ## Features
//!
//! - **Asynchronous Launch**: Spawn reports `Launched` straight away, exits arrive later
//! - **Exit Supervision**: One task per renderer maps its exit status to a termination reason
//! - **Process Tree Kill**: SIGTERM→SIGKILL escalation on the process group, `taskkill /T` on Windows
//! - **Priority**: Priority levels map to nice values
//! - **Daemon**: The `procpoold` binary drives a pool from a config file
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::rc::Rc;
//!
//! use procpool::{Browser, Driver};
//! use procpool_config::PoolConfig;
//! use procpool_launcher::{OsLauncher, RendererCommand};
//!
//! # async fn run() {
//! let launcher = Rc::new(OsLauncher::new(RendererCommand::new("my-renderer")));
//! let mut browser = Browser::new(PoolConfig::default(), launcher);
//! let ctx = browser.create_browser_context("default", false);
//! browser.spare_manager().warmup_spare(ctx, None);
//!
//! let mut driver = Driver::new(browser);
//! driver.run_until(tokio::signal::ctrl_c()).await.ok();
//! # }
//! ```

pub mod child;
pub mod command;
pub mod error;
pub mod launcher;

pub use child::{termination_info, RendererChild, SIGKILL_TIMEOUT_MS};
pub use command::{RendererCommand, BROWSER_CONTEXT_ENV, HOST_ID_ENV};
pub use error::{LauncherError, Result};
pub use launcher::{nice_value, OsLauncher};
