//! Renderer command line

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use procpool::{LaunchRequest, PriorityLevel};
use tokio::process::Command;

use crate::error::{LauncherError, Result};

/// Environment variable carrying the host id into the renderer
pub const HOST_ID_ENV: &str = "PROCPOOL_HOST_ID";
/// Environment variable carrying the browser context id into the renderer
pub const BROWSER_CONTEXT_ENV: &str = "PROCPOOL_BROWSER_CONTEXT";

/// How to start a renderer process
#[derive(Debug, Clone)]
pub struct RendererCommand {
    /// Executable command
    pub program: String,
    /// Arguments passed before the per-host switches
    pub args: Vec<String>,
    /// Working directory (None = current dir)
    pub working_dir: Option<PathBuf>,
    /// Environment variables (added to parent env)
    pub env: HashMap<String, String>,
    /// Append `--host-id`, flag and priority switches
    pub pass_host_switches: bool,
    /// Keep the renderer's stderr attached to ours
    pub inherit_stderr: bool,
}

impl RendererCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: vec![],
            working_dir: None,
            env: HashMap::new(),
            pass_host_switches: false,
            inherit_stderr: true,
        }
    }

    /// Set command arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn pass_host_switches(mut self, enabled: bool) -> Self {
        self.pass_host_switches = enabled;
        self
    }

    pub fn inherit_stderr(mut self, inherit: bool) -> Self {
        self.inherit_stderr = inherit;
        self
    }

    /// Per-host switches appended after the configured arguments
    pub fn host_switches(request: &LaunchRequest) -> Vec<String> {
        let mut switches = vec![format!("--host-id={}", request.host.get())];
        let flags = request.flags;
        if flags.guest_only {
            switches.push("--guest-only".to_string());
        }
        if flags.jit_disabled {
            switches.push("--js-flags=--jitless".to_string());
        }
        if flags.pdf {
            switches.push("--pdf-renderer".to_string());
        }
        if flags.v8_optimizations_disabled {
            switches.push("--js-flags=--no-opt".to_string());
        }
        if request.priority.level == PriorityLevel::BestEffort {
            switches.push("--renderer-background".to_string());
        }
        switches
    }

    /// Build the tokio command for one launch
    pub fn build(&self, request: &LaunchRequest) -> Result<Command> {
        if self.program.trim().is_empty() {
            return Err(LauncherError::InvalidCommand("empty program".to_string()));
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if self.pass_host_switches {
            cmd.args(Self::host_switches(request));
        }

        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd.env(HOST_ID_ENV, request.host.get().to_string());
        cmd.env(BROWSER_CONTEXT_ENV, request.browser_context.get().to_string());

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(if self.inherit_stderr {
            Stdio::inherit()
        } else {
            Stdio::null()
        });

        // Own process group so the whole renderer tree can be signalled.
        #[cfg(unix)]
        cmd.process_group(0);

        cmd.kill_on_drop(true);
        Ok(cmd)
    }
}

#[cfg(test)]
mod tests {
    use procpool::{BrowserContextId, HostFlags, HostId, ProcessPriority};
    use tokio::sync::mpsc;

    use super::*;

    fn request(flags: HostFlags, priority: ProcessPriority) -> LaunchRequest {
        let (events, _rx) = mpsc::unbounded_channel();
        LaunchRequest {
            host: HostId(4),
            browser_context: BrowserContextId(1),
            flags,
            priority,
            events,
        }
    }

    #[test]
    fn test_host_switches() {
        let flags = HostFlags {
            pdf: true,
            jit_disabled: true,
            ..Default::default()
        };
        let switches = RendererCommand::host_switches(&request(flags, ProcessPriority::default()));
        assert_eq!(switches[0], "--host-id=4");
        assert!(switches.contains(&"--pdf-renderer".to_string()));
        assert!(switches.contains(&"--js-flags=--jitless".to_string()));
        assert!(!switches.contains(&"--guest-only".to_string()));
    }

    #[test]
    fn test_empty_program_is_rejected() {
        let command = RendererCommand::new("  ");
        let result = command.build(&request(HostFlags::default(), ProcessPriority::default()));
        assert!(matches!(result, Err(LauncherError::InvalidCommand(_))));
    }
}
