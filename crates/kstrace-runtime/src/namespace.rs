//! The disposable namespace that holds a run's helper pods.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use kstrace_common::constants::{APP_NAME, MANAGED_BY_LABEL, NAMESPACE_PREFIX};
use kstrace_common::error::Result;

use crate::backend::ClusterBackend;

/// Length of the random suffix in generated namespace names.
const SUFFIX_LEN: usize = 10;

/// A namespace owned by one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunNamespace {
    name: String,
}

impl RunNamespace {
    /// Returns the namespace name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for RunNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Generates a fresh `kstrace-<random>` namespace name.
#[must_use]
pub fn generate_namespace_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{NAMESPACE_PREFIX}{}", &id[..SUFFIX_LEN])
}

/// Creates and removes run namespaces.
pub struct NamespaceManager {
    backend: Arc<dyn ClusterBackend>,
}

impl NamespaceManager {
    /// Creates a manager over `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn ClusterBackend>) -> Self {
        Self { backend }
    }

    /// Creates a namespace with a fresh name.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the namespace cannot be created; nothing
    /// has been created in that case.
    pub async fn create_namespace(&self) -> Result<RunNamespace> {
        let name = generate_namespace_name();
        let labels = BTreeMap::from([(MANAGED_BY_LABEL.to_string(), APP_NAME.to_string())]);
        self.backend.create_namespace(&name, &labels).await?;
        tracing::info!(namespace = %name, "run namespace created");
        Ok(RunNamespace { name })
    }

    /// Deletes the namespace and anything left inside it.
    ///
    /// A namespace that is already gone counts as cleaned up.
    ///
    /// # Errors
    ///
    /// Returns the backend error if deletion fails.
    pub async fn cleanup_namespace(&self, namespace: &RunNamespace) -> Result<()> {
        match self.backend.delete_namespace(namespace.name()).await {
            Ok(()) => {
                tracing::info!(namespace = %namespace, "run namespace deleted");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                tracing::debug!(namespace = %namespace, "run namespace already gone");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(namespace = %namespace, error = %e, "failed to delete run namespace");
                Err(e)
            }
        }
    }
}
