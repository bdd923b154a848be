//! In-memory cluster backend.
//!
//! Keeps namespaces and pods in a map and records every mutation as a
//! [`BackendEvent`]. Failure modes are injected per traced pod, keyed by the
//! target pod name carried in the helper pod's labels.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, stream};
use k8s_openapi::api::core::v1::Pod;
use kstrace_common::constants::{HELPER_CONTAINER_PREFIX, TARGET_POD_LABEL};
use kstrace_common::error::{KstraceError, Result};

use super::{ClusterBackend, ContainerExit, LogStream};

/// A cluster mutation observed by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    /// A namespace was created.
    NamespaceCreated(String),
    /// A namespace was deleted.
    NamespaceDeleted(String),
    /// A pod was created.
    PodCreated {
        /// Namespace of the pod.
        namespace: String,
        /// Pod name.
        name: String,
    },
    /// A pod was deleted.
    PodDeleted {
        /// Namespace of the pod.
        namespace: String,
        /// Pod name.
        name: String,
    },
}

/// Log output a helper container produces.
#[derive(Debug, Clone, Default)]
pub struct LogScript {
    /// Chunks emitted in order.
    pub chunks: Vec<Vec<u8>>,
    /// Whether the stream stays open after the last chunk.
    pub endless: bool,
    /// Termination reported once a finite stream has ended.
    pub exit: Option<ContainerExit>,
}

impl LogScript {
    /// A stream that emits `chunks` and then stays open until stopped.
    #[must_use]
    pub fn endless<I, C>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Vec<u8>>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            endless: true,
            exit: None,
        }
    }

    /// A stream that emits `chunks` and ends with the container exiting `exit_code`.
    #[must_use]
    pub fn finite<I, C>(chunks: I, exit_code: i32, reason: &str) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Vec<u8>>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            endless: false,
            exit: Some(ContainerExit {
                exit_code,
                reason: reason.to_string(),
            }),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    namespaces: HashSet<String>,
    pods: HashMap<(String, String), Pod>,
    events: Vec<BackendEvent>,
    exit_reads: HashMap<(String, String), usize>,
}

#[derive(Debug, Default)]
struct Faults {
    unschedulable: HashSet<String>,
    rejected: HashSet<String>,
    undeletable: HashSet<String>,
    namespace_create_fails: bool,
    namespace_delete_fails: bool,
    start_delay: Option<Duration>,
    exit_lag: HashMap<String, usize>,
    logs: HashMap<(String, String), LogScript>,
}

/// Backend that keeps cluster objects in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<Mutex<State>>,
    faults: Arc<Faults>,
}

/// Builder for an [`InMemoryBackend`] with injected faults.
#[derive(Debug, Default)]
pub struct InMemoryBackendBuilder {
    pods: Vec<Pod>,
    faults: Faults,
}

impl InMemoryBackendBuilder {
    /// Seeds an existing pod, e.g. a target to resolve.
    #[must_use]
    pub fn pod(mut self, pod: Pod) -> Self {
        self.pods.push(pod);
        self
    }

    /// Helper pods tracing `target_pod` never get scheduled.
    #[must_use]
    pub fn unschedulable(mut self, target_pod: &str) -> Self {
        let _ = self.faults.unschedulable.insert(target_pod.to_string());
        self
    }

    /// Helper pods tracing `target_pod` are rejected by admission.
    #[must_use]
    pub fn rejected(mut self, target_pod: &str) -> Self {
        let _ = self.faults.rejected.insert(target_pod.to_string());
        self
    }

    /// Deleting helper pods tracing `target_pod` fails.
    #[must_use]
    pub fn undeletable(mut self, target_pod: &str) -> Self {
        let _ = self.faults.undeletable.insert(target_pod.to_string());
        self
    }

    /// Namespace creation fails.
    #[must_use]
    pub const fn failing_namespace_create(mut self) -> Self {
        self.faults.namespace_create_fails = true;
        self
    }

    /// Namespace deletion fails.
    #[must_use]
    pub const fn failing_namespace_delete(mut self) -> Self {
        self.faults.namespace_delete_fails = true;
        self
    }

    /// Helper pods take `delay` to reach `Running`.
    #[must_use]
    pub const fn start_delay(mut self, delay: Duration) -> Self {
        self.faults.start_delay = Some(delay);
        self
    }

    /// Helper containers tracing `target_pod` report "still running" for
    /// the first `reads` status queries after their log ends.
    #[must_use]
    pub fn exit_reported_after(mut self, target_pod: &str, reads: usize) -> Self {
        let _ = self.faults.exit_lag.insert(target_pod.to_string(), reads);
        self
    }

    /// Log output for `container` of `target_pod`.
    #[must_use]
    pub fn logs(mut self, target_pod: &str, container: &str, script: LogScript) -> Self {
        let _ = self
            .faults
            .logs
            .insert((target_pod.to_string(), container.to_string()), script);
        self
    }

    /// Builds the backend.
    #[must_use]
    pub fn build(self) -> InMemoryBackend {
        let mut state = State::default();
        for pod in self.pods {
            let namespace = pod.metadata.namespace.clone().unwrap_or_default();
            let name = pod.metadata.name.clone().unwrap_or_default();
            let _ = state.namespaces.insert(namespace.clone());
            let _ = state.pods.insert((namespace, name), pod);
        }
        InMemoryBackend {
            state: Arc::new(Mutex::new(state)),
            faults: Arc::new(self.faults),
        }
    }
}

impl InMemoryBackend {
    /// Returns a builder for injecting faults and seed objects.
    #[must_use]
    pub fn builder() -> InMemoryBackendBuilder {
        InMemoryBackendBuilder::default()
    }

    /// Returns every recorded mutation in order.
    #[must_use]
    pub fn events(&self) -> Vec<BackendEvent> {
        self.lock().events.clone()
    }

    /// Returns the names of pods currently in `namespace`.
    #[must_use]
    pub fn pods_in(&self, namespace: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .lock()
            .pods
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Returns whether `namespace` exists.
    #[must_use]
    pub fn namespace_exists(&self, namespace: &str) -> bool {
        self.lock().namespaces.contains(namespace)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn target_of(&self, namespace: &str, pod: &str) -> Option<String> {
        self.lock()
            .pods
            .get(&(namespace.to_string(), pod.to_string()))
            .and_then(|p| p.metadata.labels.as_ref()?.get(TARGET_POD_LABEL).cloned())
    }

    fn script_for(&self, namespace: &str, pod: &str, container: &str) -> LogScript {
        let target = self.target_of(namespace, pod).unwrap_or_default();
        let traced = container
            .strip_prefix(HELPER_CONTAINER_PREFIX)
            .unwrap_or(container)
            .to_string();
        self.faults
            .logs
            .get(&(target, traced))
            .cloned()
            .unwrap_or_else(|| LogScript::endless(Vec::<Vec<u8>>::new()))
    }
}

#[async_trait]
impl ClusterBackend for InMemoryBackend {
    async fn create_namespace(&self, name: &str, _labels: &BTreeMap<String, String>) -> Result<()> {
        if self.faults.namespace_create_fails {
            return Err(KstraceError::PermissionDenied {
                message: format!("cannot create namespace {name}"),
            });
        }
        let mut state = self.lock();
        if !state.namespaces.insert(name.to_string()) {
            return Err(KstraceError::Cluster {
                operation: "create namespace",
                message: format!("namespace {name} already exists"),
            });
        }
        state.events.push(BackendEvent::NamespaceCreated(name.to_string()));
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        if self.faults.namespace_delete_fails {
            return Err(KstraceError::Cluster {
                operation: "delete namespace",
                message: format!("namespace {name} is stuck terminating"),
            });
        }
        let mut state = self.lock();
        if !state.namespaces.remove(name) {
            return Err(KstraceError::NotFound {
                kind: "namespace",
                id: name.to_string(),
            });
        }
        state.pods.retain(|(ns, _), _| ns != name);
        state.events.push(BackendEvent::NamespaceDeleted(name.to_string()));
        Ok(())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        Ok(self
            .lock()
            .pods
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<()> {
        let name = pod.metadata.name.clone().unwrap_or_default();
        let target = pod
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(TARGET_POD_LABEL).cloned())
            .unwrap_or_default();
        if self.faults.rejected.contains(&target) {
            return Err(KstraceError::Admission {
                pod: name,
                message: "violates PodSecurity \"restricted:latest\": privileged".into(),
            });
        }

        let mut state = self.lock();
        if !state.namespaces.contains(namespace) {
            return Err(KstraceError::NotFound {
                kind: "namespace",
                id: namespace.to_string(),
            });
        }
        let key = (namespace.to_string(), name.clone());
        if state.pods.contains_key(&key) {
            return Err(KstraceError::Cluster {
                operation: "create pod",
                message: format!("pod {name} already exists"),
            });
        }
        let _ = state.pods.insert(key, pod.clone());
        state.events.push(BackendEvent::PodCreated {
            namespace: namespace.to_string(),
            name,
        });
        Ok(())
    }

    async fn wait_for_pod_running(&self, namespace: &str, name: &str, timeout: Duration) -> Result<()> {
        if let Some(delay) = self.faults.start_delay {
            if delay > timeout {
                tokio::time::sleep(timeout).await;
                return Err(KstraceError::Timeout {
                    operation: format!("waiting for helper pod {name} to run"),
                    after: timeout,
                });
            }
            tokio::time::sleep(delay).await;
        }
        let Some(target) = self.target_of(namespace, name) else {
            return Err(KstraceError::NotFound {
                kind: "pod",
                id: format!("{namespace}/{name}"),
            });
        };
        if self.faults.unschedulable.contains(&target) {
            return Err(KstraceError::Scheduling {
                pod: name.to_string(),
                reason: "0/3 nodes are available: 3 node(s) didn't match Pod's node affinity".into(),
            });
        }
        Ok(())
    }

    async fn stream_container_logs(&self, namespace: &str, pod: &str, container: &str) -> Result<LogStream> {
        if self.target_of(namespace, pod).is_none() {
            return Err(KstraceError::NotFound {
                kind: "pod",
                id: format!("{namespace}/{pod}"),
            });
        }
        let script = self.script_for(namespace, pod, container);
        let chunks = stream::iter(script.chunks.into_iter().map(Ok::<_, io::Error>));
        if script.endless {
            Ok(Box::pin(chunks.chain(stream::pending()).into_async_read()))
        } else {
            Ok(Box::pin(chunks.into_async_read()))
        }
    }

    async fn container_exit(&self, namespace: &str, pod: &str, container: &str) -> Result<Option<ContainerExit>> {
        let Some(target) = self.target_of(namespace, pod) else {
            return Err(KstraceError::NotFound {
                kind: "pod",
                id: format!("{namespace}/{pod}"),
            });
        };
        let script = self.script_for(namespace, pod, container);
        if let Some(&lag) = self.faults.exit_lag.get(&target) {
            let mut state = self.lock();
            let reads = state
                .exit_reads
                .entry((pod.to_string(), container.to_string()))
                .or_default();
            *reads += 1;
            if *reads <= lag {
                return Ok(None);
            }
        }
        Ok(script.exit)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        if let Some(target) = self.target_of(namespace, name) {
            if self.faults.undeletable.contains(&target) {
                return Err(KstraceError::Cluster {
                    operation: "delete pod",
                    message: format!("pod {name} has a finalizer"),
                });
            }
        }
        let mut state = self.lock();
        if state
            .pods
            .remove(&(namespace.to_string(), name.to_string()))
            .is_none()
        {
            return Err(KstraceError::NotFound {
                kind: "pod",
                id: name.to_string(),
            });
        }
        state.events.push(BackendEvent::PodDeleted {
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
        Ok(())
    }
}
