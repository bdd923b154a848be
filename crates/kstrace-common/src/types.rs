//! Domain primitive types used across the kstrace workspace.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::CONSOLE_SENTINEL;
use crate::error::KstraceError;

/// A container inside a target pod.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetContainer {
    /// Container name from the pod spec.
    pub name: String,
    /// Runtime container identifier with the `runtime://` prefix stripped.
    pub container_id: String,
    /// Image reference. Identity only, never used for tracing.
    pub image: String,
}

/// A resolved pod selected for tracing. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    /// Pod name.
    pub pod_name: String,
    /// Namespace of the pod.
    pub namespace: String,
    /// Node the pod is bound to.
    pub node_name: String,
    /// Containers to trace, in pod spec order.
    pub containers: Vec<TargetContainer>,
}

impl Target {
    /// Returns the `namespace/pod` identity used in logs and errors.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.pod_name)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.pod_name)
    }
}

/// Where trace output is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputDestination {
    /// One artifact per container under this directory.
    Directory(PathBuf),
    /// A single stream on the operator's console.
    Console,
}

impl OutputDestination {
    /// Interprets an `--output` value; [`CONSOLE_SENTINEL`] selects the console.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value == CONSOLE_SENTINEL {
            Self::Console
        } else {
            Self::Directory(PathBuf::from(value))
        }
    }

    /// Returns whether this is the console destination.
    #[must_use]
    pub const fn is_console(&self) -> bool {
        matches!(self, Self::Console)
    }

    /// Returns the output directory, if any.
    #[must_use]
    pub fn directory(&self) -> Option<&Path> {
        match self {
            Self::Directory(dir) => Some(dir),
            Self::Console => None,
        }
    }
}

impl fmt::Display for OutputDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Directory(dir) => write!(f, "{}", dir.display()),
            Self::Console => write!(f, "console"),
        }
    }
}

/// Lifecycle state of a tracer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TracerState {
    /// Constructed, nothing submitted to the cluster yet.
    Created,
    /// Helper pod submitted, waiting for it to run.
    Launching,
    /// Helper pod running, output is being captured.
    Attached,
    /// Capture is ending or has ended.
    Stopping,
    /// Helper pod removed. Terminal.
    Cleaned,
}

impl fmt::Display for TracerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Launching => write!(f, "launching"),
            Self::Attached => write!(f, "attached"),
            Self::Stopping => write!(f, "stopping"),
            Self::Cleaned => write!(f, "cleaned"),
        }
    }
}

/// Tracer lifecycle phase an error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TracerPhase {
    /// Helper pod submission and placement.
    Start,
    /// Output streaming.
    Capture,
    /// Ending capture and finalizing artifacts.
    Stop,
}

impl fmt::Display for TracerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Capture => write!(f, "capture"),
            Self::Stop => write!(f, "stop"),
        }
    }
}

/// Verbosity, threaded explicitly to components that need it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LogLevel {
    /// Most verbose.
    Trace,
    /// Debugging detail.
    Debug,
    /// Normal progress.
    Info,
    /// Recoverable problems.
    Warn,
    /// Failures only.
    Error,
}

impl LogLevel {
    /// Every accepted level name, for help output.
    pub const NAMES: &'static [&'static str] =
        &["trace", "debug", "info", "warning", "error", "fatal", "panic"];

    /// Returns the directive understood by `tracing` filters.
    #[must_use]
    pub const fn as_filter(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = KstraceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" | "fatal" | "panic" => Ok(Self::Error),
            other => Err(KstraceError::validation(format!(
                "unknown log level {other:?}, expected one of [{}]",
                Self::NAMES.join(", ")
            ))),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_filter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_sentinel_selects_console() {
        assert_eq!(OutputDestination::parse("-"), OutputDestination::Console);
        assert_eq!(
            OutputDestination::parse("strace-collection"),
            OutputDestination::Directory(PathBuf::from("strace-collection"))
        );
    }

    #[test]
    fn target_key_is_namespace_slash_pod() {
        let t = Target {
            pod_name: "web-1".into(),
            namespace: "prod".into(),
            node_name: "node-a".into(),
            containers: vec![],
        };
        assert_eq!(t.key(), "prod/web-1");
        assert_eq!(t.to_string(), "prod/web-1");
    }

    #[test]
    fn log_levels_accept_logrus_names() {
        assert_eq!("warning".parse::<LogLevel>().ok(), Some(LogLevel::Warn));
        assert_eq!("PANIC".parse::<LogLevel>().ok(), Some(LogLevel::Error));
        assert_eq!("info".parse::<LogLevel>().ok(), Some(LogLevel::Info));
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn tracer_state_display() {
        assert_eq!(TracerState::Attached.to_string(), "attached");
        assert_eq!(TracerState::Cleaned.to_string(), "cleaned");
    }
}
