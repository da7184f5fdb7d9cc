//! Error types for the OS launcher

use std::io;

use procpool::{HostId, LaunchError};
use thiserror::Error;

/// OS launcher errors
#[derive(Debug, Error)]
pub enum LauncherError {
    /// Failed to spawn the renderer
    #[error("Failed to spawn renderer: {0}")]
    SpawnFailed(#[from] io::Error),

    /// The host has no running process
    #[error("No running process for {0}")]
    NotRunning(HostId),

    /// Failed to kill the renderer
    #[error("Failed to kill renderer: {0}")]
    KillFailed(String),

    /// Failed to change the renderer's scheduling priority
    #[error("Failed to set priority: {0}")]
    PriorityFailed(String),

    /// Invalid renderer command
    #[error("Invalid renderer command: {0}")]
    InvalidCommand(String),
}

/// Result type for launcher operations
pub type Result<T> = std::result::Result<T, LauncherError>;

impl From<LauncherError> for LaunchError {
    fn from(error: LauncherError) -> Self {
        match error {
            LauncherError::NotRunning(host) => LaunchError::NotRunning(host),
            LauncherError::KillFailed(reason) => LaunchError::KillFailed(reason),
            LauncherError::PriorityFailed(reason) => LaunchError::PriorityFailed(reason),
            LauncherError::SpawnFailed(e) => LaunchError::SpawnFailed(e.to_string()),
            LauncherError::InvalidCommand(reason) => LaunchError::SpawnFailed(reason),
        }
    }
}
