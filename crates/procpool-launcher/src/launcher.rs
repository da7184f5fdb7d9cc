//! [`ProcessLauncher`] backed by real OS processes
//!
//! Each launch spawns the renderer command and a supervisor task that reports
//! the exit back to the browser, or kills the process tree when the browser
//! terminates the host. Must be used from inside a tokio runtime.

use std::cell::RefCell;
use std::collections::HashMap;

use procpool::{
    HostId, LaunchError, LaunchRequest, LauncherEvent, PriorityLevel, ProcessLauncher,
    ProcessPriority,
};
use tokio::sync::{mpsc::UnboundedSender, oneshot};
use tracing::{debug, info, warn};

use crate::{
    child::{termination_info, RendererChild},
    command::RendererCommand,
    error::{LauncherError, Result},
};

/// Nice value applied for a priority level
pub fn nice_value(level: PriorityLevel) -> i32 {
    match level {
        PriorityLevel::UserBlocking => 0,
        PriorityLevel::UserVisible => 5,
        PriorityLevel::BestEffort => 10,
    }
}

struct Running {
    pid: u32,
    kill: oneshot::Sender<i32>,
}

/// Launches renderers with `tokio::process`
pub struct OsLauncher {
    command: RendererCommand,
    running: RefCell<HashMap<HostId, Running>>,
}

impl OsLauncher {
    pub fn new(command: RendererCommand) -> Self {
        Self {
            command,
            running: RefCell::new(HashMap::new()),
        }
    }

    pub fn command(&self) -> &RendererCommand {
        &self.command
    }

    /// Pid of a launched host that is still running
    pub fn pid(&self, host: HostId) -> Option<u32> {
        self.sweep_exited();
        self.running.borrow().get(&host).map(|r| r.pid)
    }

    /// Number of renderers still tracked as running
    pub fn running_count(&self) -> usize {
        self.sweep_exited();
        self.running.borrow().len()
    }

    /// Forget renderers whose supervisor has finished
    fn sweep_exited(&self) {
        self.running.borrow_mut().retain(|host, running| {
            let alive = !running.kill.is_closed();
            if !alive {
                debug!(host = %host, pid = running.pid, "Forgetting exited renderer");
            }
            alive
        });
    }

    fn spawn(&self, request: &LaunchRequest) -> Result<RendererChild> {
        let mut cmd = self.command.build(request)?;
        let child = cmd.spawn()?;
        Ok(RendererChild::new(child, request.host))
    }
}

impl ProcessLauncher for OsLauncher {
    fn launch(&self, request: LaunchRequest) -> std::result::Result<(), LaunchError> {
        let child = self.spawn(&request).map_err(LaunchError::from)?;
        let host = request.host;
        let pid = child.pid();
        info!(host = %host, pid, program = %self.command.program, "Renderer spawned");

        let (kill, kill_rx) = oneshot::channel();
        self.sweep_exited();
        self.running.borrow_mut().insert(host, Running { pid, kill });
        let _ = request.events.send(LauncherEvent::Launched { host, pid });
        tokio::spawn(supervise(child, request.events, kill_rx));
        Ok(())
    }

    fn set_priority(
        &self,
        host: HostId,
        priority: &ProcessPriority,
    ) -> std::result::Result<(), LaunchError> {
        let pid = self
            .pid(host)
            .ok_or(LauncherError::NotRunning(host))
            .map_err(LaunchError::from)?;
        let nice = nice_value(priority.level);
        debug!(host = %host, pid, nice, level = ?priority.level, "Applying renderer priority");
        apply_nice(pid, nice)
            .map_err(|e| LauncherError::PriorityFailed(e.to_string()))
            .map_err(LaunchError::from)
    }

    fn terminate(&self, host: HostId, exit_code: i32) -> std::result::Result<(), LaunchError> {
        let running = self
            .running
            .borrow_mut()
            .remove(&host)
            .ok_or(LauncherError::NotRunning(host))
            .map_err(LaunchError::from)?;
        debug!(host = %host, pid = running.pid, exit_code, "Terminating renderer");
        // A closed receiver means the renderer already exited on its own.
        let _ = running.kill.send(exit_code);
        Ok(())
    }
}

impl Drop for OsLauncher {
    fn drop(&mut self) {
        for (_, running) in self.running.get_mut().drain() {
            let _ = running.kill.send(0);
        }
    }
}

/// Wait for the renderer to exit or for the browser to kill it
///
/// The kill receiver is closed before `Exited` is sent, so the launcher
/// already sees the entry as finished when the browser handles the event.
async fn supervise(
    mut child: RendererChild,
    events: UnboundedSender<LauncherEvent>,
    mut kill: oneshot::Receiver<i32>,
) {
    let host = child.host();
    tokio::select! {
        status = child.wait() => {
            kill.close();
            let info = match status {
                Ok(status) => termination_info(&status),
                Err(e) => {
                    warn!(host = %host, error = %e, "Failed to wait for renderer");
                    procpool::ChildProcessTerminationInfo {
                        status: procpool::TerminationStatus::AbnormalTermination,
                        exit_code: -1,
                    }
                }
            };
            debug!(host = %host, status = ?info.status, code = info.exit_code, "Renderer exited");
            let _ = events.send(LauncherEvent::Exited { host, info });
        }
        _ = &mut kill => {
            if let Err(e) = child.kill_tree().await {
                warn!(host = %host, error = %e, "Failed to kill renderer tree");
            }
        }
    }
}

/// Set the absolute nice value of `pid`; a vanished process is not an error
#[cfg(unix)]
fn apply_nice(pid: u32, nice: i32) -> std::io::Result<()> {
    // SAFETY: setpriority only takes integers.
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS as _, pid as libc::id_t, nice) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(err);
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn apply_nice(pid: u32, nice: i32) -> std::io::Result<()> {
    debug!(pid, nice, "Priority changes are not supported on this platform");
    Ok(())
}
