//! Helper-pod entrypoint logic.
//!
//! Resolves the target container to its host process through the runtime
//! socket, then attaches the tracer. Runs as PID 1 of every helper container.

use std::path::PathBuf;

use kstrace_common::constants::{CRICTL_BIN, STRACE_BIN};
use kstrace_common::error::{KstraceError, Result};

use crate::attach::TraceCommand;
use crate::client::RuntimeClient;

/// Inputs of a helper container, taken from its command line.
#[derive(Debug, Clone)]
pub struct HelperArgs {
    /// CRI socket path, identical on the host and in the helper.
    pub socket_path: PathBuf,
    /// Runtime container identifier of the target.
    pub container_id: String,
    /// Extra tracer arguments.
    pub strace_args: Vec<String>,
}

/// Locates a binary on `PATH`.
///
/// # Errors
///
/// Returns [`KstraceError::NotFound`] if the binary is not installed in the
/// trace image.
pub fn locate(binary: &str) -> Result<PathBuf> {
    which::which(binary).map_err(|_| KstraceError::NotFound {
        kind: "binary",
        id: binary.to_string(),
    })
}

/// Runs the helper: resolve, attach, wait. Returns the tracer's exit code.
///
/// # Errors
///
/// Returns an error if a required binary is missing, the container cannot
/// be resolved, or the tracer cannot be started.
pub fn run(args: &HelperArgs) -> Result<i32> {
    if args.container_id.trim().is_empty() {
        return Err(KstraceError::validation("container id must not be empty"));
    }

    let client = RuntimeClient::with_binary(&args.socket_path, locate(CRICTL_BIN)?);
    let strace = locate(STRACE_BIN)?;

    let pid = client.resolve_pid(&args.container_id)?;
    TraceCommand::new(strace, pid)
        .with_args(args.strace_args.iter().cloned())
        .run()
}
