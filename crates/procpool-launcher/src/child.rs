//! One running renderer process

use std::process::ExitStatus;
use std::time::Duration;

use procpool::{ChildProcessTerminationInfo, HostId, TerminationStatus};
use tokio::process::Child;
use tracing::{debug, warn};

use crate::error::{LauncherError, Result};

/// Delay between SIGTERM and SIGKILL when killing a renderer tree
pub const SIGKILL_TIMEOUT_MS: u64 = 200;

/// Wrapper around a spawned renderer
pub struct RendererChild {
    child: Child,
    host: HostId,
    pid: u32,
}

impl RendererChild {
    pub(crate) fn new(child: Child, host: HostId) -> Self {
        let pid = child.id().unwrap_or(0);
        Self { child, host, pid }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn host(&self) -> HostId {
        self.host
    }

    /// Check if process is still running
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Wait for the renderer to exit
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        self.child.wait().await.map_err(Into::into)
    }

    /// Kill the renderer and everything it started
    ///
    /// - Windows: `taskkill /pid <pid> /f /t`
    /// - Unix: SIGTERM to the process group, SIGKILL after [`SIGKILL_TIMEOUT_MS`]
    pub async fn kill_tree(&mut self) -> Result<()> {
        debug!(host = %self.host, pid = self.pid, "Killing renderer tree");

        #[cfg(windows)]
        {
            use tokio::process::Command;

            let mut killer = Command::new("taskkill")
                .args(["/pid", &self.pid.to_string(), "/f", "/t"])
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .spawn()
                .map_err(|e| LauncherError::KillFailed(e.to_string()))?;

            let _ = killer.wait().await;
            let _ = self.child.wait().await;
            return Ok(());
        }

        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            let pgid = Pid::from_raw(self.pid as i32);

            if let Err(e) = killpg(pgid, Signal::SIGTERM) {
                warn!(host = %self.host, error = %e, "SIGTERM to process group failed, killing process only");
                self.child
                    .kill()
                    .await
                    .map_err(|e| LauncherError::KillFailed(e.to_string()))?;
                return Ok(());
            }

            match tokio::time::timeout(Duration::from_millis(SIGKILL_TIMEOUT_MS), self.child.wait()).await {
                Ok(_) => debug!(host = %self.host, "Renderer exited after SIGTERM"),
                Err(_) => {
                    if let Err(e) = killpg(pgid, Signal::SIGKILL) {
                        warn!(host = %self.host, error = %e, "SIGKILL to process group failed, killing process only");
                    }
                    let _ = self.child.kill().await;
                }
            }
        }

        #[allow(unreachable_code)]
        Ok(())
    }
}

/// Classify how a renderer went away
pub fn termination_info(status: &ExitStatus) -> ChildProcessTerminationInfo {
    if let Some(code) = status.code() {
        let status = if code == 0 {
            TerminationStatus::NormalTermination
        } else {
            TerminationStatus::AbnormalTermination
        };
        return ChildProcessTerminationInfo {
            status,
            exit_code: code,
        };
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;

        if let Some(signal) = status.signal() {
            let killed = signal == nix::sys::signal::Signal::SIGKILL as i32
                || signal == nix::sys::signal::Signal::SIGTERM as i32;
            return ChildProcessTerminationInfo {
                status: if killed {
                    TerminationStatus::ProcessWasKilled
                } else {
                    TerminationStatus::ProcessCrashed
                },
                exit_code: 128 + signal,
            };
        }
    }

    ChildProcessTerminationInfo {
        status: TerminationStatus::AbnormalTermination,
        exit_code: -1,
    }
}
