//! Unified error types for the kstrace workspace.
//!
//! The variants follow the failure taxonomy of a run: validation errors are
//! raised before anything touches the cluster, placement and attach errors are
//! fatal to a single tracer, and cleanup errors are reported but never
//! escalated by the orchestrator.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::TracerPhase;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum KstraceError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Flags, targets or the output destination are invalid.
    #[error("invalid invocation: {message}")]
    Validation {
        /// Description of the rejected input.
        message: String,
    },

    /// A cluster API call failed.
    #[error("cluster request '{operation}' failed: {message}")]
    Cluster {
        /// The API operation that failed.
        operation: &'static str,
        /// Message returned by the API server or the client.
        message: String,
    },

    /// The cluster refused an operation for lack of privilege.
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Description of the denied operation.
        message: String,
    },

    /// A helper pod could not be placed on the target's node.
    #[error("helper pod {pod} could not be scheduled: {reason}")]
    Scheduling {
        /// Helper pod name.
        pod: String,
        /// Scheduler message.
        reason: String,
    },

    /// The trace image could not be pulled on the target's node.
    #[error("helper pod {pod} could not pull its image: {reason}")]
    ImagePull {
        /// Helper pod name.
        pod: String,
        /// Kubelet message.
        reason: String,
    },

    /// Admission control rejected the helper pod.
    #[error("helper pod {pod} was rejected: {message}")]
    Admission {
        /// Helper pod name.
        pod: String,
        /// Admission message.
        message: String,
    },

    /// A helper container stopped before capture was asked to end.
    #[error("helper container {container} in {pod} terminated (exit code {exit_code}): {reason}")]
    HelperTerminated {
        /// Helper pod name.
        pod: String,
        /// Helper container name.
        container: String,
        /// Exit code reported by the kubelet.
        exit_code: i32,
        /// Termination reason or message.
        reason: String,
    },

    /// The runtime socket could not map a container to a process, or the
    /// tracer could not attach to it.
    #[error("cannot attach to container {container_id}: {message}")]
    Attach {
        /// Runtime container identifier.
        container_id: String,
        /// Description of the failure.
        message: String,
    },

    /// Trace output could not be written to its destination.
    #[error("cannot write trace output {artifact}: {source}")]
    Output {
        /// Artifact path or console label.
        artifact: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// An operation did not complete in time.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Description of the operation.
        operation: String,
        /// Bound that was exceeded.
        after: Duration,
    },

    /// A background task panicked or was aborted.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },

    /// The run was aborted by the operator.
    #[error("cancelled")]
    Cancelled,

    /// One or more tracers failed during the run.
    #[error("tracing failed for {}", summarize(.failures))]
    RunFailed {
        /// Every tracer failure, in teardown order.
        failures: Vec<TracerFailure>,
    },
}

impl KstraceError {
    /// Shorthand for a [`KstraceError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Returns whether this error means the object no longer exists.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// A failure attributed to one tracer and the phase it happened in.
#[derive(Debug)]
pub struct TracerFailure {
    /// `namespace/pod` of the target.
    pub target: String,
    /// Lifecycle phase that failed.
    pub phase: TracerPhase,
    /// The underlying error.
    pub source: Box<KstraceError>,
}

impl TracerFailure {
    /// Attributes `source` to `target` during `phase`.
    pub fn new(target: impl Into<String>, phase: TracerPhase, source: KstraceError) -> Self {
        Self {
            target: target.into(),
            phase,
            source: Box::new(source),
        }
    }
}

impl fmt::Display for TracerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.target, self.phase, self.source)
    }
}

fn summarize(failures: &[TracerFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, KstraceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_failed_names_every_target() {
        let err = KstraceError::RunFailed {
            failures: vec![
                TracerFailure::new(
                    "prod/web-2",
                    TracerPhase::Start,
                    KstraceError::Scheduling {
                        pod: "kstrace-web-2-0a1b2c3d".into(),
                        reason: "0/3 nodes are available".into(),
                    },
                ),
                TracerFailure::new(
                    "prod/web-3",
                    TracerPhase::Capture,
                    KstraceError::Cancelled,
                ),
            ],
        };
        let text = err.to_string();
        assert!(text.contains("prod/web-2 (start)"));
        assert!(text.contains("0/3 nodes are available"));
        assert!(text.contains("prod/web-3 (capture)"));
    }

    #[test]
    fn not_found_is_detected() {
        let err = KstraceError::NotFound {
            kind: "pod",
            id: "x".into(),
        };
        assert!(err.is_not_found());
        assert!(!KstraceError::Cancelled.is_not_found());
    }
}
