//! Run configuration for a tracing invocation.
//!
//! [`RunOptions`] holds the values exactly as the operator supplied them.
//! [`RunConfig`] is the parsed form that the orchestrator and every tracer
//! receive through their constructors.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::duration::parse_duration;
use crate::error::{KstraceError, Result};
use crate::types::{LogLevel, OutputDestination};

/// Unparsed run options, as supplied on the command line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOptions {
    /// Trace image reference for helper pods.
    pub trace_image: String,
    /// CRI socket path on the host.
    pub socket_path: String,
    /// Trace duration; `0` is unbounded.
    pub trace_timeout: String,
    /// Output directory, or `-` for the console.
    pub output: String,
    /// Bound on how long a helper pod may take to start running.
    pub request_timeout: String,
    /// Verbosity passed on to helper pods.
    pub log_level: String,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            trace_image: constants::DEFAULT_TRACE_IMAGE.to_string(),
            socket_path: constants::DEFAULT_SOCKET_PATH.to_string(),
            trace_timeout: constants::DEFAULT_TRACE_TIMEOUT.to_string(),
            output: constants::DEFAULT_OUTPUT_DIR.to_string(),
            request_timeout: constants::DEFAULT_REQUEST_TIMEOUT.to_string(),
            log_level: constants::DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl RunOptions {
    /// Parses the options into a [`RunConfig`].
    ///
    /// # Errors
    ///
    /// Returns a validation error if a duration or the log level does not
    /// parse, or if the image or socket path is empty.
    pub fn parse(&self) -> Result<RunConfig> {
        if self.trace_image.trim().is_empty() {
            return Err(KstraceError::validation("trace image must not be empty"));
        }
        let socket_path = socket_host_path(&self.socket_path)?;
        let pod_start_timeout = parse_duration(&self.request_timeout)?;
        if pod_start_timeout.is_zero() {
            return Err(KstraceError::validation("request timeout must be greater than zero"));
        }

        Ok(RunConfig {
            trace_image: self.trace_image.clone(),
            socket_path,
            trace_duration: parse_duration(&self.trace_timeout)?,
            output: OutputDestination::parse(&self.output),
            pod_start_timeout,
            log_level: self.log_level.parse()?,
        })
    }
}

/// Normalizes the CRI socket flag to a host path, accepting an endpoint
/// written as `unix:///run/...`.
fn socket_host_path(raw: &str) -> Result<PathBuf> {
    let raw = raw.trim();
    let path = raw.strip_prefix(constants::UNIX_SCHEME).unwrap_or(raw);
    if path.is_empty() {
        return Err(KstraceError::validation("socket path must not be empty"));
    }
    if !path.starts_with('/') {
        return Err(KstraceError::validation(format!(
            "socket path {raw:?} must be an absolute host path"
        )));
    }
    Ok(PathBuf::from(path))
}

/// Parsed configuration shared by the orchestrator and its tracers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Trace image reference for helper pods.
    pub trace_image: String,
    /// CRI socket path on the host, mounted at the same path in helpers.
    pub socket_path: PathBuf,
    /// Capture bound; zero means capture until stopped.
    pub trace_duration: Duration,
    /// Where trace output is written.
    pub output: OutputDestination,
    /// Bound on how long a helper pod may take to reach `Running`.
    pub pod_start_timeout: Duration,
    /// Verbosity passed on to helper pods.
    pub log_level: LogLevel,
}

impl RunConfig {
    /// Returns the capture bound, or `None` when tracing is unbounded.
    #[must_use]
    pub const fn trace_bound(&self) -> Option<Duration> {
        if self.trace_duration.is_zero() {
            None
        } else {
            Some(self.trace_duration)
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            trace_image: constants::DEFAULT_TRACE_IMAGE.to_string(),
            socket_path: PathBuf::from(constants::DEFAULT_SOCKET_PATH),
            trace_duration: Duration::ZERO,
            output: OutputDestination::Directory(PathBuf::from(constants::DEFAULT_OUTPUT_DIR)),
            pod_start_timeout: Duration::from_secs(30),
            log_level: LogLevel::Info,
        }
    }
}
