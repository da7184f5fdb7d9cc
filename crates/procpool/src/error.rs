//! Error types for process allocation

use thiserror::Error;

use crate::ids::{BrowserContextId, HostId};

/// Errors visible to callers of the pool
///
/// Benign allocation misses are never errors; they surface as reason codes in
/// [`crate::metrics`].
#[derive(Debug, Error)]
pub enum PoolError {
    /// The browser context was never registered
    #[error("Unknown browser context: {0}")]
    UnknownBrowserContext(BrowserContextId),

    /// The browser context has been shut down
    #[error("Browser context destroyed: {0}")]
    BrowserContextDestroyed(BrowserContextId),

    /// The host id does not name a live host
    #[error("Unknown process host: {0}")]
    UnknownHost(HostId),

    /// The launcher refused the request
    #[error("Launch failed: {0}")]
    Launch(#[from] LaunchError),
}

/// Failures reported by a [`crate::launcher::ProcessLauncher`]
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LaunchError {
    /// The child could not be spawned
    #[error("Failed to spawn renderer: {0}")]
    SpawnFailed(String),

    /// No process exists for the host
    #[error("No running process for host {0}")]
    NotRunning(HostId),

    /// Priority could not be applied
    #[error("Failed to set priority: {0}")]
    PriorityFailed(String),

    /// Termination failed
    #[error("Failed to terminate process: {0}")]
    KillFailed(String),
}

/// Result type for pool operations
pub type Result<T> = std::result::Result<T, PoolError>;
