//! The seam between the pool and whatever starts OS processes
//!
//! Launching is asynchronous: [`ProcessLauncher::launch`] only starts the work,
//! and completion arrives later as a [`LauncherEvent`] on the channel carried
//! by the request. The browser drains that channel on its sequence.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use crate::{
    error::LaunchError,
    host::{HostFlags, ProcessPriority},
    ids::{BrowserContextId, HostId},
};

/// Exit code used when the browser tears a host down normally
pub const RESULT_CODE_NORMAL_EXIT: i32 = 0;
/// Exit code used when a renderer is killed for misbehaving
pub const RESULT_CODE_KILLED_BAD_MESSAGE: i32 = 13;

/// How a child process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TerminationStatus {
    NormalTermination,
    AbnormalTermination,
    ProcessWasKilled,
    ProcessCrashed,
    LaunchFailed,
}

/// Details reported with an exit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildProcessTerminationInfo {
    pub status: TerminationStatus,
    pub exit_code: i32,
}

impl ChildProcessTerminationInfo {
    pub fn normal() -> Self {
        Self {
            status: TerminationStatus::NormalTermination,
            exit_code: RESULT_CODE_NORMAL_EXIT,
        }
    }

    pub fn killed(exit_code: i32) -> Self {
        Self {
            status: TerminationStatus::ProcessWasKilled,
            exit_code,
        }
    }
}

/// Completion reports sent back to the sequence
#[derive(Debug, Clone, PartialEq)]
pub enum LauncherEvent {
    /// The child is running
    Launched { host: HostId, pid: u32 },
    /// The child never started
    LaunchFailed { host: HostId, error: LaunchError },
    /// The child went away
    Exited {
        host: HostId,
        info: ChildProcessTerminationInfo,
    },
}

impl LauncherEvent {
    pub fn host(&self) -> HostId {
        match self {
            Self::Launched { host, .. }
            | Self::LaunchFailed { host, .. }
            | Self::Exited { host, .. } => *host,
        }
    }
}

/// Everything needed to start one renderer
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub host: HostId,
    pub browser_context: BrowserContextId,
    pub flags: HostFlags,
    pub priority: ProcessPriority,
    pub events: UnboundedSender<LauncherEvent>,
}

/// Starts, reprioritises and stops renderer processes
///
/// Implementations use interior mutability; the pool shares one launcher
/// between every host.
pub trait ProcessLauncher {
    /// Begin launching; completion is reported through `request.events`
    fn launch(&self, request: LaunchRequest) -> Result<(), LaunchError>;

    /// Apply a new priority to a running process
    fn set_priority(&self, host: HostId, priority: &ProcessPriority) -> Result<(), LaunchError>;

    /// Stop the process; no further events are expected for `host`
    fn terminate(&self, host: HostId, exit_code: i32) -> Result<(), LaunchError>;
}
