//! Kubernetes API backend.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kstrace_common::error::{KstraceError, Result};
use kube::api::{Api, DeleteParams, LogParams, PostParams};
use kube::runtime::wait::await_condition;
use kube::Client;

use super::{ClusterBackend, ContainerExit, LogStream};

/// Waiting reasons that mean the image will not be pulled without operator action.
const IMAGE_PULL_REASONS: &[&str] = &[
    "ErrImagePull",
    "ImagePullBackOff",
    "InvalidImageName",
    "ErrImageNeverPull",
];

/// Waiting reasons that mean the container runtime refused the container.
const CREATE_FAILURE_REASONS: &[&str] = &[
    "CreateContainerConfigError",
    "CreateContainerError",
    "RunContainerError",
];

/// How far a pod has come on its way to `Running`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodProgress {
    /// Still being scheduled or started.
    Pending,
    /// Running.
    Running,
    /// The scheduler cannot place the pod.
    Unschedulable(String),
    /// The image cannot be pulled.
    ImagePull(String),
    /// The pod or one of its containers ended or cannot be created.
    Terminated(String),
}

/// Backend that talks to the API server through a [`kube::Client`].
#[derive(Clone)]
pub struct KubeBackend {
    client: Client,
}

impl KubeBackend {
    /// Wraps an existing client.
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterBackend for KubeBackend {
    async fn create_namespace(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<()> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels.clone()),
                ..ObjectMeta::default()
            },
            ..Namespace::default()
        };
        let _ = namespaces
            .create(&PostParams::default(), &namespace)
            .await
            .map_err(|e| api_error("create namespace", "namespace", name, e))?;
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let _ = namespaces
            .delete(name, &DeleteParams::background())
            .await
            .map_err(|e| api_error("delete namespace", "namespace", name, e))?;
        Ok(())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        self.pods(namespace)
            .get_opt(name)
            .await
            .map_err(|e| api_error("get pod", "pod", name, e))
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<()> {
        let name = pod.metadata.name.clone().unwrap_or_default();
        match self.pods(namespace).create(&PostParams::default(), pod).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if matches!(resp.code, 400 | 403 | 422) => {
                Err(KstraceError::Admission {
                    pod: name,
                    message: resp.message,
                })
            }
            Err(e) => Err(api_error("create pod", "pod", &name, e)),
        }
    }

    async fn wait_for_pod_running(&self, namespace: &str, name: &str, timeout: Duration) -> Result<()> {
        let settled = |pod: Option<&Pod>| pod.is_some_and(|p| classify_pod(p) != PodProgress::Pending);
        let waited = tokio::time::timeout(timeout, await_condition(self.pods(namespace), name, settled)).await;

        let pod = match waited {
            Err(_) => {
                return Err(KstraceError::Timeout {
                    operation: format!("waiting for helper pod {name} to run"),
                    after: timeout,
                });
            }
            Ok(Err(e)) => {
                return Err(KstraceError::Cluster {
                    operation: "watch pod",
                    message: e.to_string(),
                });
            }
            Ok(Ok(None)) => {
                return Err(KstraceError::NotFound {
                    kind: "pod",
                    id: format!("{namespace}/{name}"),
                });
            }
            Ok(Ok(Some(pod))) => pod,
        };

        match classify_pod(&pod) {
            PodProgress::Running => Ok(()),
            PodProgress::Unschedulable(reason) => Err(KstraceError::Scheduling {
                pod: name.to_string(),
                reason,
            }),
            PodProgress::ImagePull(reason) => Err(KstraceError::ImagePull {
                pod: name.to_string(),
                reason,
            }),
            PodProgress::Terminated(reason) => Err(KstraceError::HelperTerminated {
                pod: name.to_string(),
                container: String::from("*"),
                exit_code: first_exit_code(&pod).unwrap_or(-1),
                reason,
            }),
            PodProgress::Pending => Err(KstraceError::Timeout {
                operation: format!("waiting for helper pod {name} to run"),
                after: timeout,
            }),
        }
    }

    async fn stream_container_logs(&self, namespace: &str, pod: &str, container: &str) -> Result<LogStream> {
        let params = LogParams {
            container: Some(container.to_string()),
            follow: true,
            ..LogParams::default()
        };
        let reader = self
            .pods(namespace)
            .log_stream(pod, &params)
            .await
            .map_err(|e| api_error("stream logs", "pod", pod, e))?;
        Ok(Box::pin(reader))
    }

    async fn container_exit(&self, namespace: &str, pod: &str, container: &str) -> Result<Option<ContainerExit>> {
        let Some(found) = self.get_pod(namespace, pod).await? else {
            return Err(KstraceError::NotFound {
                kind: "pod",
                id: format!("{namespace}/{pod}"),
            });
        };
        Ok(container_exit_of(&found, container))
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let _ = self
            .pods(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| api_error("delete pod", "pod", name, e))?;
        Ok(())
    }
}

/// Maps a client error, turning 404 into `NotFound` and 403 into `PermissionDenied`.
fn api_error(operation: &'static str, kind: &'static str, name: &str, err: kube::Error) -> KstraceError {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => KstraceError::NotFound {
            kind,
            id: name.to_string(),
        },
        kube::Error::Api(resp) if resp.code == 403 => KstraceError::PermissionDenied {
            message: format!("{operation} {name}: {}", resp.message),
        },
        other => KstraceError::Cluster {
            operation,
            message: other.to_string(),
        },
    }
}

/// Classifies a pod's status on its way to `Running`.
pub fn classify_pod(pod: &Pod) -> PodProgress {
    let Some(status) = pod.status.as_ref() else {
        return PodProgress::Pending;
    };

    match status.phase.as_deref() {
        Some("Running") => return PodProgress::Running,
        Some("Failed" | "Succeeded") => {
            let reason = status
                .message
                .clone()
                .or_else(|| status.reason.clone())
                .or_else(|| first_termination_reason(pod))
                .unwrap_or_else(|| String::from("pod exited before tracing began"));
            return PodProgress::Terminated(reason);
        }
        _ => {}
    }

    let unschedulable = status.conditions.iter().flatten().find(|c| {
        c.type_ == "PodScheduled" && c.status == "False" && c.reason.as_deref() == Some("Unschedulable")
    });
    if let Some(condition) = unschedulable {
        return PodProgress::Unschedulable(
            condition
                .message
                .clone()
                .unwrap_or_else(|| String::from("Unschedulable")),
        );
    }

    for waiting in status
        .container_statuses
        .iter()
        .flatten()
        .filter_map(|cs| cs.state.as_ref()?.waiting.as_ref())
    {
        let reason = waiting.reason.as_deref().unwrap_or_default();
        let message = waiting.message.clone().unwrap_or_else(|| reason.to_string());
        if IMAGE_PULL_REASONS.contains(&reason) {
            return PodProgress::ImagePull(message);
        }
        if CREATE_FAILURE_REASONS.contains(&reason) {
            return PodProgress::Terminated(message);
        }
    }

    PodProgress::Pending
}

/// Returns the termination of the named container, if it has terminated.
pub fn container_exit_of(pod: &Pod, container: &str) -> Option<ContainerExit> {
    let status = pod
        .status
        .as_ref()?
        .container_statuses
        .as_ref()?
        .iter()
        .find(|cs| cs.name == container)?;
    let terminated = status.state.as_ref()?.terminated.as_ref()?;
    Some(ContainerExit {
        exit_code: terminated.exit_code,
        reason: terminated
            .message
            .clone()
            .or_else(|| terminated.reason.clone())
            .unwrap_or_default(),
    })
}

fn first_termination_reason(pod: &Pod) -> Option<String> {
    pod.status
        .as_ref()?
        .container_statuses
        .iter()
        .flatten()
        .find_map(|cs| {
            let t = cs.state.as_ref()?.terminated.as_ref()?;
            t.message.clone().or_else(|| t.reason.clone())
        })
}

fn first_exit_code(pod: &Pod) -> Option<i32> {
    pod.status
        .as_ref()?
        .container_statuses
        .iter()
        .flatten()
        .find_map(|cs| Some(cs.state.as_ref()?.terminated.as_ref()?.exit_code))
}
