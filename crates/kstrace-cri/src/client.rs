//! Client for the node-local container runtime socket.
//!
//! Talks to the CRI endpoint through `crictl` and reads the host process id
//! of a container from its `inspect` document.

use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use kstrace_common::constants::UNIX_SCHEME;
use kstrace_common::error::{KstraceError, Result};
use serde::Deserialize;

/// State reported by the runtime for a running container.
const CONTAINER_RUNNING: &str = "CONTAINER_RUNNING";

/// Resolves container identifiers through a CRI socket.
#[derive(Debug, Clone)]
pub struct RuntimeClient {
    socket_path: PathBuf,
    crictl: PathBuf,
}

#[derive(Debug, Deserialize)]
struct InspectOutput {
    status: Option<InspectStatus>,
    info: Option<InspectInfo>,
}

#[derive(Debug, Deserialize)]
struct InspectStatus {
    state: Option<String>,
    pid: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct InspectInfo {
    pid: Option<i64>,
}

impl RuntimeClient {
    /// Creates a client that runs the given `crictl` binary.
    #[must_use]
    pub fn with_binary(socket_path: impl Into<PathBuf>, crictl: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            crictl: crictl.into(),
        }
    }

    /// Returns the `unix://` endpoint URI for the socket.
    #[must_use]
    pub fn endpoint(&self) -> String {
        endpoint_uri(&self.socket_path)
    }

    /// Checks that the socket path exists and is a socket.
    ///
    /// # Errors
    ///
    /// Returns an attach error naming the path otherwise.
    pub fn check_socket(&self, container_id: &str) -> Result<()> {
        let meta = std::fs::metadata(&self.socket_path).map_err(|e| KstraceError::Attach {
            container_id: container_id.to_string(),
            message: format!("runtime socket {} unreachable: {e}", self.socket_path.display()),
        })?;
        if !meta.file_type().is_socket() {
            return Err(KstraceError::Attach {
                container_id: container_id.to_string(),
                message: format!("{} is not a socket", self.socket_path.display()),
            });
        }
        Ok(())
    }

    /// Returns the raw `inspect` JSON for a container.
    ///
    /// # Errors
    ///
    /// Returns an error if `crictl` cannot be spawned or exits non-zero.
    pub fn inspect(&self, container_id: &str) -> Result<String> {
        tracing::debug!(container_id, endpoint = %self.endpoint(), "inspecting container");

        let output = Command::new(&self.crictl)
            .args(["--runtime-endpoint", &self.endpoint(), "inspect", "-o", "json"])
            .arg(container_id)
            .output()
            .map_err(|e| KstraceError::Io {
                path: self.crictl.clone(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(KstraceError::Attach {
                container_id: container_id.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Resolves a container identifier to its host process id.
    ///
    /// # Errors
    ///
    /// Returns an attach error if the socket is unusable, the container is
    /// unknown or not running, or no process id is reported.
    pub fn resolve_pid(&self, container_id: &str) -> Result<u32> {
        self.check_socket(container_id)?;
        let document = self.inspect(container_id)?;
        let pid = parse_inspect_pid(container_id, &document)?;
        tracing::info!(container_id, pid, "resolved container process");
        Ok(pid)
    }
}

/// Builds the endpoint URI `crictl` expects for a socket path.
#[must_use]
pub fn endpoint_uri(socket_path: &Path) -> String {
    format!("{UNIX_SCHEME}{}", socket_path.display())
}

/// Extracts the host pid from a `crictl inspect -o json` document.
///
/// # Errors
///
/// Returns an attach error if the document is malformed, the container is
/// not running, or the pid is missing or not positive.
pub fn parse_inspect_pid(container_id: &str, document: &str) -> Result<u32> {
    let attach_err = |message: String| KstraceError::Attach {
        container_id: container_id.to_string(),
        message,
    };

    let parsed: InspectOutput = serde_json::from_str(document)
        .map_err(|e| attach_err(format!("unreadable inspect output: {e}")))?;

    if let Some(state) = parsed.status.as_ref().and_then(|s| s.state.as_deref()) {
        if state != CONTAINER_RUNNING {
            return Err(attach_err(format!("container is not running (state {state})")));
        }
    }

    let pid = parsed
        .info
        .and_then(|i| i.pid)
        .or_else(|| parsed.status.and_then(|s| s.pid))
        .ok_or_else(|| attach_err("runtime reported no process id".into()))?;

    u32::try_from(pid)
        .ok()
        .filter(|p| *p > 0)
        .ok_or_else(|| attach_err(format!("runtime reported invalid process id {pid}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_uri_adds_scheme() {
        assert_eq!(
            endpoint_uri(Path::new("/run/crio/crio.sock")),
            "unix:///run/crio/crio.sock"
        );
    }

    #[test]
    fn pid_is_read_from_info() {
        let doc = r#"{"status":{"id":"abc","state":"CONTAINER_RUNNING"},"info":{"pid":4242,"sandboxID":"s"}}"#;
        assert_eq!(parse_inspect_pid("abc", doc).unwrap(), 4242);
    }

    #[test]
    fn pid_falls_back_to_status() {
        let doc = r#"{"status":{"state":"CONTAINER_RUNNING","pid":17}}"#;
        assert_eq!(parse_inspect_pid("abc", doc).unwrap(), 17);
    }

    #[test]
    fn exited_container_is_rejected() {
        let doc = r#"{"status":{"state":"CONTAINER_EXITED"},"info":{"pid":0}}"#;
        let err = parse_inspect_pid("abc", doc).unwrap_err();
        assert!(err.to_string().contains("CONTAINER_EXITED"));
    }

    #[test]
    fn zero_pid_is_rejected() {
        let doc = r#"{"info":{"pid":0}}"#;
        assert!(parse_inspect_pid("abc", doc).is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_inspect_pid("abc", "not json").is_err());
    }

    #[test]
    fn regular_file_is_not_a_socket() {
        let file = tempfile::NamedTempFile::new().expect("tempfile");
        let client = RuntimeClient::with_binary(file.path(), "/bin/false");
        let err = client.check_socket("abc").unwrap_err();
        assert!(err.to_string().contains("not a socket"));
    }

    #[test]
    fn missing_socket_is_unreachable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let client = RuntimeClient::with_binary(dir.path().join("crio.sock"), "/bin/false");
        let err = client.check_socket("abc").unwrap_err();
        assert!(err.to_string().contains("unreachable"));
    }

    #[test]
    fn resolve_pid_through_crictl() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let socket = dir.path().join("crio.sock");
        let _listener = std::os::unix::net::UnixListener::bind(&socket).expect("bind");

        let crictl = dir.path().join("crictl");
        std::fs::write(
            &crictl,
            "#!/bin/sh\necho '{\"status\":{\"state\":\"CONTAINER_RUNNING\"},\"info\":{\"pid\":31337}}'\n",
        )
        .expect("write script");
        std::fs::set_permissions(&crictl, std::fs::Permissions::from_mode(0o755)).expect("chmod");

        let client = RuntimeClient::with_binary(&socket, &crictl);
        assert_eq!(client.resolve_pid("abc").expect("resolve"), 31337);
    }

    #[test]
    fn failing_crictl_reports_stderr() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let crictl = dir.path().join("crictl");
        std::fs::write(&crictl, "#!/bin/sh\necho 'container \"abc\" not found' >&2\nexit 1\n")
            .expect("write script");
        std::fs::set_permissions(&crictl, std::fs::Permissions::from_mode(0o755)).expect("chmod");

        let client = RuntimeClient::with_binary(dir.path().join("crio.sock"), &crictl);
        let err = client.inspect("abc").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
