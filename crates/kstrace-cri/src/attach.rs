//! Attaching `strace` to a host process.
//!
//! The tracer inherits the helper's stdout and stderr so the trace becomes
//! the helper container's log stream. Termination signals delivered to the
//! helper (pod deletion) are forwarded to the tracer, which detaches from the
//! target cleanly.

use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use kstrace_common::error::{KstraceError, Result};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

/// Default tracer flags: follow forks, microsecond timestamps.
const DEFAULT_FLAGS: &[&str] = &["-f", "-tt"];

/// A configured `strace` invocation against one process.
#[derive(Debug, Clone)]
pub struct TraceCommand {
    strace: PathBuf,
    pid: u32,
    extra_args: Vec<String>,
}

impl TraceCommand {
    /// Creates a command that attaches `strace` to `pid`.
    #[must_use]
    pub fn new(strace: impl Into<PathBuf>, pid: u32) -> Self {
        Self {
            strace: strace.into(),
            pid,
            extra_args: Vec::new(),
        }
    }

    /// Appends extra tracer arguments, placed before `-p`.
    #[must_use]
    pub fn with_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.extra_args.extend(args);
        self
    }

    /// Returns the full argument vector passed to `strace`.
    #[must_use]
    pub fn args(&self) -> Vec<String> {
        DEFAULT_FLAGS
            .iter()
            .map(ToString::to_string)
            .chain(self.extra_args.iter().cloned())
            .chain(["-p".to_string(), self.pid.to_string()])
            .collect()
    }

    /// Runs the tracer to completion and returns its exit code.
    ///
    /// A signal-terminated tracer reports `128 + signal`.
    ///
    /// # Errors
    ///
    /// Returns an error if the tracer cannot be spawned or waited on, or if
    /// the termination handler cannot be installed.
    pub fn run(&self) -> Result<i32> {
        tracing::info!(pid = self.pid, args = ?self.args(), "attaching tracer");

        let mut child = Command::new(&self.strace)
            .args(self.args())
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| KstraceError::Attach {
                container_id: format!("pid {}", self.pid),
                message: format!("cannot spawn {}: {e}", self.strace.display()),
            })?;

        forward_termination(child.id())?;

        let status = child.wait().map_err(|e| KstraceError::Io {
            path: self.strace.clone(),
            source: e,
        })?;
        let code = status
            .code()
            .unwrap_or_else(|| status.signal().map_or(1, |sig| 128 + sig));
        tracing::info!(pid = self.pid, code, "tracer exited");
        Ok(code)
    }
}

/// Forwards SIGINT/SIGTERM/SIGHUP received by this process to `child`.
fn forward_termination(child: u32) -> Result<()> {
    let child = Pid::from_raw(i32::try_from(child).map_err(|_| KstraceError::Attach {
        container_id: format!("pid {child}"),
        message: "tracer pid out of range".into(),
    })?);

    ctrlc::set_handler(move || {
        tracing::info!(child = child.as_raw(), "termination requested, detaching tracer");
        let _ = kill(child, Signal::SIGTERM);
    })
    .map_err(|e| KstraceError::Attach {
        container_id: format!("pid {child}"),
        message: format!("cannot install termination handler: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_place_pid_last() {
        let cmd = TraceCommand::new("/usr/bin/strace", 4242);
        assert_eq!(cmd.args(), vec!["-f", "-tt", "-p", "4242"]);
    }

    #[test]
    fn extra_args_precede_pid() {
        let cmd = TraceCommand::new("/usr/bin/strace", 7).with_args(["-e".to_string(), "trace=network".to_string()]);
        assert_eq!(cmd.args(), vec!["-f", "-tt", "-e", "trace=network", "-p", "7"]);
    }

    #[test]
    fn missing_tracer_is_an_attach_error() {
        let cmd = TraceCommand::new("/nonexistent/strace", 1);
        assert!(matches!(cmd.run(), Err(KstraceError::Attach { .. })));
    }
}
