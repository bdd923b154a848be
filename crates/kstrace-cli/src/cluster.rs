//! Cluster connection discovery.

use std::path::Path;

use anyhow::Context;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

/// An API client plus the namespace the selected context defaults to.
pub struct Connection {
    /// Client for the selected cluster.
    pub client: Client,
    /// Namespace of the selected context, `default` if it names none.
    pub default_namespace: String,
}

/// Connects using an explicit kubeconfig and context when given, otherwise
/// the standard discovery order (`KUBECONFIG`, `~/.kube/config`, in-cluster).
///
/// # Errors
///
/// Returns an error if no usable configuration is found.
pub async fn connect(kubeconfig: Option<&Path>, context: Option<&str>) -> anyhow::Result<Connection> {
    let options = KubeConfigOptions {
        context: context.map(str::to_string),
        ..KubeConfigOptions::default()
    };
    let config = match kubeconfig {
        Some(path) => {
            let file = Kubeconfig::read_from(path)
                .with_context(|| format!("failed to read kubeconfig {}", path.display()))?;
            Config::from_custom_kubeconfig(file, &options).await?
        }
        None if context.is_some() => Config::from_kubeconfig(&options).await?,
        None => Config::infer().await.context("no cluster configuration found")?,
    };
    tracing::debug!(cluster = %config.cluster_url, namespace = %config.default_namespace, "cluster configuration loaded");

    let default_namespace = config.default_namespace.clone();
    let client = Client::try_from(config).context("failed to build cluster client")?;
    Ok(Connection {
        client,
        default_namespace,
    })
}
