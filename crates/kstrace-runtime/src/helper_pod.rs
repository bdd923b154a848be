//! Helper pod construction.
//!
//! A helper pod is pinned to the target's node, sees the host PID namespace,
//! mounts the runtime socket from the host and runs one privileged helper
//! container per traced container.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Affinity, Capabilities, Container, HostPathVolumeSource, NodeAffinity, NodeSelector,
    NodeSelectorRequirement, NodeSelectorTerm, Pod, PodSpec, SecurityContext, Toleration, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kstrace_common::config::RunConfig;
use kstrace_common::constants::{
    APP_NAME, HELPER_CONTAINER_PREFIX, HELPER_POD_PREFIX, MANAGED_BY_LABEL, MAX_LABEL_LENGTH,
    NODE_NAME_FIELD, SOCKET_VOLUME_NAME, STARTED_AT_ANNOTATION, TARGET_NAMESPACE_LABEL,
    TARGET_POD_LABEL,
};
use kstrace_common::types::{LogLevel, Target, TargetContainer};

/// Capabilities needed to trace another process on the host.
const TRACE_CAPABILITIES: &[&str] = &["SYS_PTRACE", "SYS_ADMIN"];

/// Grace period for the tracer to detach after the pod is deleted.
const TERMINATION_GRACE_SECONDS: i64 = 5;

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

fn fnv1a(input: &str) -> u32 {
    input
        .bytes()
        .fold(FNV_OFFSET, |hash, b| (hash ^ u32::from(b)).wrapping_mul(FNV_PRIME))
}

/// Truncates to a valid label value: at most 63 characters, ending in an
/// alphanumeric character.
#[must_use]
pub fn label_value(value: &str) -> String {
    let truncated: String = value.chars().take(MAX_LABEL_LENGTH).collect();
    truncated
        .trim_end_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}

/// Derives the helper pod name for a target.
///
/// The name is `kstrace-<pod>-<hash>`, where the hash covers the target's
/// namespace and pod name, so it is stable across runs and distinct for
/// same-named pods in different namespaces.
#[must_use]
pub fn helper_pod_name(target: &Target) -> String {
    let hash = fnv1a(&target.key());
    let budget = MAX_LABEL_LENGTH - HELPER_POD_PREFIX.len() - 1 - 8;
    let stem = label_value(&target.pod_name.chars().take(budget).collect::<String>());
    format!("{HELPER_POD_PREFIX}{stem}-{hash:08x}")
}

/// Derives the helper container name for a traced container.
#[must_use]
pub fn helper_container_name(container: &str) -> String {
    label_value(&format!("{HELPER_CONTAINER_PREFIX}{container}"))
}

/// Builds the helper pod specification for `target`.
#[must_use]
pub fn build_helper_pod(target: &Target, name: &str, namespace: &str, config: &RunConfig) -> Pod {
    let labels = BTreeMap::from([
        (MANAGED_BY_LABEL.to_string(), APP_NAME.to_string()),
        (TARGET_POD_LABEL.to_string(), label_value(&target.pod_name)),
        (TARGET_NAMESPACE_LABEL.to_string(), label_value(&target.namespace)),
    ]);
    let annotations = BTreeMap::from([(
        STARTED_AT_ANNOTATION.to_string(),
        chrono::Utc::now().to_rfc3339(),
    )]);
    let socket = config.socket_path.to_string_lossy().into_owned();

    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            annotations: Some(annotations),
            ..ObjectMeta::default()
        },
        spec: Some(PodSpec {
            affinity: Some(node_pinning(&target.node_name)),
            tolerations: Some(vec![Toleration {
                operator: Some("Exists".into()),
                ..Toleration::default()
            }]),
            host_pid: Some(true),
            restart_policy: Some("Never".into()),
            termination_grace_period_seconds: Some(TERMINATION_GRACE_SECONDS),
            containers: target
                .containers
                .iter()
                .map(|c| helper_container(c, &socket, config))
                .collect(),
            volumes: Some(vec![Volume {
                name: SOCKET_VOLUME_NAME.into(),
                host_path: Some(HostPathVolumeSource {
                    path: socket,
                    type_: Some("Socket".into()),
                }),
                ..Volume::default()
            }]),
            ..PodSpec::default()
        }),
        ..Pod::default()
    }
}

/// Required node affinity on the node's name; the pod never lands elsewhere.
fn node_pinning(node: &str) -> Affinity {
    Affinity {
        node_affinity: Some(NodeAffinity {
            required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                node_selector_terms: vec![NodeSelectorTerm {
                    match_fields: Some(vec![NodeSelectorRequirement {
                        key: NODE_NAME_FIELD.into(),
                        operator: "In".into(),
                        values: Some(vec![node.to_string()]),
                    }]),
                    ..NodeSelectorTerm::default()
                }],
            }),
            ..NodeAffinity::default()
        }),
        ..Affinity::default()
    }
}

/// Helper diagnostics share the container log with the trace, so they stay
/// at `warn` unless the operator asked for debugging detail.
fn helper_log_level(level: LogLevel) -> LogLevel {
    if level <= LogLevel::Debug {
        level
    } else {
        level.max(LogLevel::Warn)
    }
}

fn helper_container(container: &TargetContainer, socket: &str, config: &RunConfig) -> Container {
    Container {
        name: helper_container_name(&container.name),
        image: Some(config.trace_image.clone()),
        args: Some(vec![
            "--socket-path".into(),
            socket.to_string(),
            "--container-id".into(),
            container.container_id.clone(),
            "--log-level".into(),
            helper_log_level(config.log_level).to_string(),
        ]),
        security_context: Some(SecurityContext {
            privileged: Some(true),
            capabilities: Some(Capabilities {
                add: Some(TRACE_CAPABILITIES.iter().map(ToString::to_string).collect()),
                ..Capabilities::default()
            }),
            ..SecurityContext::default()
        }),
        volume_mounts: Some(vec![VolumeMount {
            name: SOCKET_VOLUME_NAME.into(),
            mount_path: socket.to_string(),
            ..VolumeMount::default()
        }]),
        ..Container::default()
    }
}
