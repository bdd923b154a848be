//! Resolution of command-line object references into targets.
//!
//! Arguments are `kind/name` or a bare `name`, which means a pod. Only pods
//! can be traced; any other kind resolves to [`ResolvedObject::Unsupported`]
//! so new kinds can be added as variants.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use kstrace_common::error::{KstraceError, Result};
use kstrace_common::types::{Target, TargetContainer};

use crate::backend::ClusterBackend;

/// Kind assumed when an argument carries none.
const DEFAULT_KIND: &str = "pod";

/// A resolved object reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedObject {
    /// A pod that can be traced.
    Pod(Target),
    /// An object of a kind that cannot be traced.
    Unsupported {
        /// Kind as given by the operator.
        kind: String,
        /// Object name.
        name: String,
    },
}

/// Splits `kind/name` into its parts; a bare name is a pod.
///
/// # Errors
///
/// Returns a validation error for an empty kind or name.
pub fn parse_object_ref(arg: &str) -> Result<(String, String)> {
    let (kind, name) = match arg.split_once('/') {
        Some((kind, name)) => (kind.trim(), name.trim()),
        None => (DEFAULT_KIND, arg.trim()),
    };
    if kind.is_empty() || name.is_empty() || name.contains('/') {
        return Err(KstraceError::validation(format!("invalid object reference {arg:?}")));
    }
    Ok((kind.to_string(), name.to_string()))
}

fn is_pod_kind(kind: &str) -> bool {
    matches!(kind.to_ascii_lowercase().as_str(), "pod" | "pods" | "po")
}

/// Strips the `runtime://` scheme from a container id reported in pod status.
#[must_use]
pub fn strip_runtime_prefix(id: &str) -> &str {
    id.find("://").map_or(id, |i| &id[i + 3..])
}

/// Builds a [`Target`] from a pod object.
///
/// # Errors
///
/// Returns a validation error if the pod is not bound to a node or a
/// container has no runtime id yet.
pub fn target_from_pod(pod: &Pod) -> Result<Target> {
    let pod_name = pod.metadata.name.clone().unwrap_or_default();
    let namespace = pod.metadata.namespace.clone().unwrap_or_default();
    let key = format!("{namespace}/{pod_name}");
    let spec = pod
        .spec
        .as_ref()
        .ok_or_else(|| KstraceError::validation(format!("pod {key} has no spec")))?;
    let node_name = spec
        .node_name
        .clone()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| KstraceError::validation(format!("pod {key} is not scheduled to a node")))?;

    let statuses = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_deref())
        .unwrap_or_default();
    let containers = spec
        .containers
        .iter()
        .map(|c| {
            let container_id = statuses
                .iter()
                .find(|s| s.name == c.name)
                .and_then(|s| s.container_id.as_deref())
                .map(strip_runtime_prefix)
                .filter(|id| !id.is_empty())
                .ok_or_else(|| {
                    KstraceError::validation(format!(
                        "container {} of pod {key} has not started",
                        c.name
                    ))
                })?;
            Ok(TargetContainer {
                name: c.name.clone(),
                container_id: container_id.to_string(),
                image: c.image.clone().unwrap_or_default(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Target {
        pod_name,
        namespace,
        node_name,
        containers,
    })
}

/// Resolves object references in one namespace.
pub struct TargetResolver {
    backend: Arc<dyn ClusterBackend>,
    namespace: String,
}

impl TargetResolver {
    /// Creates a resolver looking up objects in `namespace`.
    #[must_use]
    pub fn new(backend: Arc<dyn ClusterBackend>, namespace: impl Into<String>) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
        }
    }

    /// Resolves a single reference.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed reference or an unusable
    /// pod, and a not-found error if the pod does not exist.
    pub async fn resolve_one(&self, arg: &str) -> Result<ResolvedObject> {
        let (kind, name) = parse_object_ref(arg)?;
        if !is_pod_kind(&kind) {
            return Ok(ResolvedObject::Unsupported { kind, name });
        }
        let pod = self
            .backend
            .get_pod(&self.namespace, &name)
            .await?
            .ok_or_else(|| KstraceError::NotFound {
                kind: "pod",
                id: format!("{}/{name}", self.namespace),
            })?;
        let target = target_from_pod(&pod)?;
        tracing::debug!(pod = %target, node = %target.node_name, containers = target.containers.len(), "target resolved");
        Ok(ResolvedObject::Pod(target))
    }

    /// Resolves every reference into a de-duplicated target list, keeping
    /// first-seen order.
    ///
    /// # Errors
    ///
    /// Fails on the first reference that cannot be resolved, and on any
    /// reference of an unsupported kind.
    pub async fn resolve(&self, args: &[String]) -> Result<Vec<Target>> {
        let mut targets: Vec<Target> = Vec::with_capacity(args.len());
        for arg in args {
            match self.resolve_one(arg).await? {
                ResolvedObject::Pod(target) => {
                    if targets.iter().any(|t| t.key() == target.key()) {
                        tracing::debug!(pod = %target, "duplicate target ignored");
                    } else {
                        targets.push(target);
                    }
                }
                ResolvedObject::Unsupported { kind, name } => {
                    return Err(KstraceError::validation(format!(
                        "{kind:?} not supported by kstrace (object {name:?})"
                    )));
                }
            }
        }
        Ok(targets)
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::{Container, ContainerStatus, PodSpec, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use super::*;
    use crate::backend::memory::InMemoryBackend;

    fn pod(name: &str, node: Option<&str>, containers: &[(&str, Option<&str>)]) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some("prod".into()),
                ..ObjectMeta::default()
            },
            spec: Some(PodSpec {
                node_name: node.map(Into::into),
                containers: containers
                    .iter()
                    .map(|(n, _)| Container {
                        name: (*n).into(),
                        image: Some("nginx:1.27".into()),
                        ..Container::default()
                    })
                    .collect(),
                ..PodSpec::default()
            }),
            status: Some(PodStatus {
                container_statuses: Some(
                    containers
                        .iter()
                        .map(|(n, id)| ContainerStatus {
                            name: (*n).into(),
                            container_id: id.map(Into::into),
                            ..ContainerStatus::default()
                        })
                        .collect(),
                ),
                ..PodStatus::default()
            }),
        }
    }

    fn resolver(pods: Vec<Pod>) -> TargetResolver {
        let backend = pods
            .into_iter()
            .fold(InMemoryBackend::builder(), |b, p| b.pod(p))
            .build();
        TargetResolver::new(Arc::new(backend), "prod")
    }

    #[test]
    fn object_refs_default_to_pods() {
        assert_eq!(parse_object_ref("web-1").unwrap(), ("pod".into(), "web-1".into()));
        assert_eq!(
            parse_object_ref("deployment/web").unwrap(),
            ("deployment".into(), "web".into())
        );
        assert!(parse_object_ref("pod/").is_err());
        assert!(parse_object_ref("a/b/c").is_err());
    }

    #[test]
    fn runtime_prefix_is_stripped() {
        assert_eq!(strip_runtime_prefix("cri-o://9a8b7c"), "9a8b7c");
        assert_eq!(strip_runtime_prefix("containerd://abc123"), "abc123");
        assert_eq!(strip_runtime_prefix("plain-id"), "plain-id");
    }

    #[test]
    fn target_keeps_spec_order_and_ids() {
        let p = pod(
            "web-1",
            Some("worker-3"),
            &[("app", Some("containerd://aaa")), ("sidecar", Some("containerd://bbb"))],
        );
        let t = target_from_pod(&p).unwrap();
        assert_eq!(t.node_name, "worker-3");
        let ids: Vec<_> = t.containers.iter().map(|c| c.container_id.as_str()).collect();
        assert_eq!(ids, vec!["aaa", "bbb"]);
    }

    #[test]
    fn unbound_pod_is_rejected() {
        let p = pod("web-1", None, &[("app", Some("containerd://aaa"))]);
        let err = target_from_pod(&p).unwrap_err();
        assert!(err.to_string().contains("not scheduled"));
    }

    #[test]
    fn container_without_id_is_rejected() {
        let p = pod("web-1", Some("worker-3"), &[("app", None)]);
        assert!(target_from_pod(&p).is_err());
    }

    #[tokio::test]
    async fn duplicates_are_removed_in_order() {
        let r = resolver(vec![
            pod("web-1", Some("n1"), &[("app", Some("cri-o://1"))]),
            pod("web-2", Some("n2"), &[("app", Some("cri-o://2"))]),
        ]);
        let args = ["web-2", "pod/web-1", "pods/web-2"].map(String::from);
        let targets = r.resolve(&args).await.unwrap();
        let names: Vec<_> = targets.iter().map(|t| t.pod_name.as_str()).collect();
        assert_eq!(names, vec!["web-2", "web-1"]);
    }

    #[tokio::test]
    async fn unsupported_kind_is_a_variant_and_a_validation_error() {
        let r = resolver(vec![]);
        assert_eq!(
            r.resolve_one("deployment/web").await.unwrap(),
            ResolvedObject::Unsupported {
                kind: "deployment".into(),
                name: "web".into(),
            }
        );
        let err = r.resolve(&["deployment/web".to_string()]).await.unwrap_err();
        assert!(matches!(err, KstraceError::Validation { .. }));
        assert!(err.to_string().contains("\"deployment\" not supported by kstrace"));
    }

    #[tokio::test]
    async fn missing_pod_is_not_found() {
        let r = resolver(vec![]);
        let err = r.resolve(&["ghost".to_string()]).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
