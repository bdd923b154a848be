//! Cluster backend abstraction.
//!
//! Everything the tracer engine does to the cluster goes through
//! [`ClusterBackend`]. [`kubernetes::KubeBackend`] talks to a real API server;
//! [`memory::InMemoryBackend`] keeps objects in memory and records every
//! mutation so lifecycle guarantees can be checked without a cluster.

pub mod kubernetes;
pub mod memory;

use std::collections::BTreeMap;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kstrace_common::error::Result;

/// Byte stream of one container's log.
pub type LogStream = Pin<Box<dyn futures::AsyncRead + Send>>;

/// How a container terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerExit {
    /// Exit code reported by the kubelet.
    pub exit_code: i32,
    /// Reason or message reported by the kubelet.
    pub reason: String,
}

/// Cluster operations used by the tracer engine.
///
/// Delete operations return [`KstraceError::NotFound`] when the object is
/// already gone; callers decide whether that is success.
///
/// [`KstraceError::NotFound`]: kstrace_common::error::KstraceError::NotFound
#[async_trait]
pub trait ClusterBackend: Send + Sync {
    /// Creates a namespace with the given labels.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is taken, access is denied, or the
    /// cluster is unreachable.
    async fn create_namespace(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<()>;

    /// Deletes a namespace and everything left inside it.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace does not exist or cannot be deleted.
    async fn delete_namespace(&self, name: &str) -> Result<()>;

    /// Fetches a pod, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the cluster cannot be queried.
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>>;

    /// Submits a pod.
    ///
    /// # Errors
    ///
    /// Returns an error if admission rejects the pod or the request fails.
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<()>;

    /// Waits until a pod is running or has definitely failed to start.
    ///
    /// # Errors
    ///
    /// Returns a scheduling, image pull or termination error describing the
    /// failure, or a timeout error once `timeout` elapses.
    async fn wait_for_pod_running(&self, namespace: &str, name: &str, timeout: Duration) -> Result<()>;

    /// Opens a following log stream for one container of a pod.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be opened.
    async fn stream_container_logs(&self, namespace: &str, pod: &str, container: &str) -> Result<LogStream>;

    /// Returns how a container terminated, or `None` while it still runs.
    ///
    /// # Errors
    ///
    /// Returns an error if the pod cannot be fetched.
    async fn container_exit(&self, namespace: &str, pod: &str, container: &str) -> Result<Option<ContainerExit>>;

    /// Deletes a pod.
    ///
    /// # Errors
    ///
    /// Returns an error if the pod does not exist or cannot be deleted.
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;
}
