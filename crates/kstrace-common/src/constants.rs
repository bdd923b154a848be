//! System-wide constants and default values.

/// Application name used in labels, namespace names and CLI output.
pub const APP_NAME: &str = "kstrace";

/// Default trace image: ships `crictl`, `strace` and the helper entrypoint.
pub const DEFAULT_TRACE_IMAGE: &str = "quay.io/mwasher/crictl:0.0.2";

/// Endpoint scheme `crictl` expects in front of a socket path.
pub const UNIX_SCHEME: &str = "unix://";

/// Default location of the CRI socket on the host.
pub const DEFAULT_SOCKET_PATH: &str = "/run/crio/crio.sock";

/// Default trace duration. `0` keeps tracing until explicitly stopped.
pub const DEFAULT_TRACE_TIMEOUT: &str = "0";

/// Default directory that receives one trace artifact per container.
pub const DEFAULT_OUTPUT_DIR: &str = "strace-collection";

/// Output sentinel selecting the operator's console instead of a directory.
pub const CONSOLE_SENTINEL: &str = "-";

/// Default bound on how long a helper pod may take to reach `Running`.
pub const DEFAULT_REQUEST_TIMEOUT: &str = "30s";

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default log level of the helper entrypoint.
pub const HELPER_LOG_LEVEL: &str = "warn";

/// Prefix for the per-run namespace.
pub const NAMESPACE_PREFIX: &str = "kstrace-";

/// Prefix for helper pod names.
pub const HELPER_POD_PREFIX: &str = "kstrace-";

/// Prefix for helper container names, followed by the traced container name.
pub const HELPER_CONTAINER_PREFIX: &str = "trace-";

/// File extension of trace artifacts written to the output directory.
pub const ARTIFACT_EXTENSION: &str = "strace";

/// Maximum length of a DNS-1123 label (namespace names, label values).
pub const MAX_LABEL_LENGTH: usize = 63;

/// Label marking every object this tool creates.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Label carrying the traced pod's name on a helper pod.
pub const TARGET_POD_LABEL: &str = "kstrace.io/target-pod";

/// Label carrying the traced pod's namespace on a helper pod.
pub const TARGET_NAMESPACE_LABEL: &str = "kstrace.io/target-namespace";

/// Annotation recording when the helper pod was submitted.
pub const STARTED_AT_ANNOTATION: &str = "kstrace.io/started-at";

/// Node field matched by the helper pod's node affinity.
pub const NODE_NAME_FIELD: &str = "metadata.name";

/// Name of the volume that carries the runtime socket into the helper.
pub const SOCKET_VOLUME_NAME: &str = "runtime-socket";

/// Runtime binary used by the helper to inspect containers.
pub const CRICTL_BIN: &str = "crictl";

/// Tracer binary used by the helper to attach to the target process.
pub const STRACE_BIN: &str = "strace";
