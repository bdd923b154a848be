//! Run orchestration: fan-out, failure aggregation and ordered teardown.
//!
//! A run validates its inputs before touching the cluster, creates the run
//! namespace, starts every tracer concurrently and waits for capture to end.
//! Teardown then drains a [`TeardownList`] in reverse registration order, so
//! the last tracer started is the first stopped and the namespace goes last.
//! Every step runs even when an earlier one failed.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use kstrace_common::config::RunConfig;
use kstrace_common::error::{KstraceError, Result, TracerFailure};
use kstrace_common::types::{OutputDestination, Target, TracerPhase};
use tokio_util::sync::CancellationToken;

use crate::backend::ClusterBackend;
use crate::helper_pod::helper_pod_name;
use crate::namespace::NamespaceManager;
use crate::output::{ArtifactSummary, OutputFactory};
use crate::teardown::{TeardownList, TeardownStep};
use crate::tracer::Tracer;

/// Outcome of a run in which no tracer failed.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Name of the run namespace, already deleted.
    pub namespace: String,
    /// Every artifact written, in target order.
    pub artifacts: Vec<ArtifactSummary>,
    /// Whether the run was cut short by cancellation.
    pub cancelled: bool,
}

/// Checks targets against the output destination.
///
/// # Errors
///
/// Returns a validation error if there are no targets, if the console is
/// chosen for more than one target or container, if a target has no
/// containers, or if two targets would share a helper pod.
pub fn validate_targets(targets: &[Target], output: &OutputDestination) -> Result<()> {
    let Some(first) = targets.first() else {
        return Err(KstraceError::validation("a target pod must be defined"));
    };
    if output.is_console() {
        if targets.len() > 1 {
            return Err(KstraceError::validation(
                "cannot have multiple target pods but output to standard out",
            ));
        }
        if first.containers.len() > 1 {
            return Err(KstraceError::validation(format!(
                "there are multiple containers defined for pod {:?}. unable to output to standard out for pods with multiple containers",
                first.pod_name
            )));
        }
    }

    let mut helpers: HashMap<String, String> = HashMap::with_capacity(targets.len());
    for target in targets {
        if target.containers.is_empty() {
            return Err(KstraceError::validation(format!(
                "pod {target} has no containers to trace"
            )));
        }
        let helper = helper_pod_name(target);
        if let Some(other) = helpers.insert(helper.clone(), target.key()) {
            return Err(KstraceError::validation(format!(
                "targets {other} and {target} map to the same helper pod {helper}"
            )));
        }
    }
    Ok(())
}

/// Supervises every tracer of one run.
pub struct Orchestrator {
    backend: Arc<dyn ClusterBackend>,
    config: Arc<RunConfig>,
    cancel: CancellationToken,
    outputs: OutputFactory,
}

impl Orchestrator {
    /// Validates `targets` against a parsed configuration.
    ///
    /// Nothing touches the cluster, so a failure here leaves nothing to
    /// clean up.
    ///
    /// # Errors
    ///
    /// Returns a validation error for unusable targets.
    pub fn validate(targets: &[Target], config: &RunConfig) -> Result<()> {
        validate_targets(targets, &config.output)
    }

    /// Creates an orchestrator writing to the configured destination.
    /// Cancelling `cancel` tears the run down early.
    #[must_use]
    pub fn new(backend: Arc<dyn ClusterBackend>, config: RunConfig, cancel: CancellationToken) -> Self {
        let outputs = OutputFactory::new(config.output.clone());
        Self {
            backend,
            config: Arc::new(config),
            cancel,
            outputs,
        }
    }

    /// Replaces the output factory.
    #[must_use]
    pub fn with_outputs(mut self, outputs: OutputFactory) -> Self {
        self.outputs = outputs;
        self
    }

    /// Traces every target and tears everything down.
    ///
    /// # Errors
    ///
    /// Returns a validation error before any cluster mutation, the namespace
    /// creation error if the run cannot begin, or [`KstraceError::RunFailed`]
    /// naming every tracer that failed. Cleanup failures are logged only.
    pub async fn run(&self, targets: &[Target]) -> Result<RunReport> {
        validate_targets(targets, self.outputs.destination())?;
        self.outputs.prepare().await?;

        let namespaces = NamespaceManager::new(Arc::clone(&self.backend));
        let namespace = namespaces.create_namespace().await?;
        let mut teardown = TeardownList::new();
        teardown.push(TeardownStep::DeleteNamespace);

        let mut tracers: Vec<Tracer> = targets
            .iter()
            .map(|target| {
                Tracer::new(
                    target.clone(),
                    namespace.name(),
                    Arc::clone(&self.config),
                    Arc::clone(&self.backend),
                    self.outputs.clone(),
                    &self.cancel,
                )
            })
            .collect();
        for i in 0..tracers.len() {
            teardown.push(TeardownStep::CleanupTracer(i));
            teardown.push(TeardownStep::StopTracer(i));
        }

        let mut failures = Vec::new();
        let mut cancelled = false;
        let started = join_all(tracers.iter_mut().map(|tracer| tracer.start())).await;
        for (tracer, result) in tracers.iter().zip(started) {
            match result {
                Ok(()) => {}
                Err(KstraceError::Cancelled) => cancelled = true,
                Err(e) => {
                    tracing::error!(pod = %tracer.target(), error = %e, "tracer failed to start");
                    failures.push(TracerFailure::new(tracer.target().key(), TracerPhase::Start, e));
                }
            }
        }

        if failures.is_empty() && !cancelled {
            tracing::info!(namespace = %namespace, tracers = tracers.len(), "all tracers attached");
            let waited = join_all(tracers.iter_mut().map(|tracer| async move {
                let result = tracer.wait().await;
                if let Err(e) = &result {
                    tracing::error!(pod = %tracer.target(), error = %e, "capture failed");
                }
                result
            }))
            .await;
            for (tracer, result) in tracers.iter().zip(waited) {
                if let Err(e) = result {
                    failures.push(TracerFailure::new(tracer.target().key(), TracerPhase::Capture, e));
                }
            }
        }
        cancelled |= self.cancel.is_cancelled();

        tracing::debug!(steps = teardown.len(), "tearing down run");
        for step in teardown.drain() {
            match step {
                TeardownStep::StopTracer(i) => {
                    let Some(tracer) = tracers.get_mut(i) else { continue };
                    if let Err(e) = tracer.stop().await {
                        failures.push(TracerFailure::new(tracer.target().key(), TracerPhase::Stop, e));
                    }
                }
                TeardownStep::CleanupTracer(i) => {
                    let Some(tracer) = tracers.get_mut(i) else { continue };
                    if let Err(e) = tracer.cleanup().await {
                        tracing::warn!(pod = %tracer.target(), error = %e, "helper pod left behind");
                    }
                }
                TeardownStep::DeleteNamespace => {
                    if let Err(e) = namespaces.cleanup_namespace(&namespace).await {
                        tracing::warn!(namespace = %namespace, error = %e, "run namespace left behind");
                    }
                }
            }
        }

        if !failures.is_empty() {
            return Err(KstraceError::RunFailed { failures });
        }
        if cancelled {
            tracing::info!(namespace = %namespace, "run cancelled, resources cleaned up");
        }
        Ok(RunReport {
            namespace: namespace.name().to_string(),
            artifacts: tracers
                .iter()
                .flat_map(|t| t.artifacts().iter().cloned())
                .collect(),
            cancelled,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use kstrace_common::config::RunOptions;
    use kstrace_common::types::TargetContainer;

    use super::*;

    fn target(pod: &str, namespace: &str, containers: &[&str]) -> Target {
        Target {
            pod_name: pod.into(),
            namespace: namespace.into(),
            node_name: "worker-1".into(),
            containers: containers
                .iter()
                .map(|c| TargetContainer {
                    name: (*c).into(),
                    container_id: format!("{pod}-{c}"),
                    image: "nginx".into(),
                })
                .collect(),
        }
    }

    fn dir() -> OutputDestination {
        OutputDestination::Directory(PathBuf::from("strace-collection"))
    }

    #[test]
    fn no_targets_is_rejected() {
        let err = validate_targets(&[], &dir()).unwrap_err();
        assert_eq!(err.to_string(), "invalid invocation: a target pod must be defined");
    }

    #[test]
    fn console_requires_single_target() {
        let targets = [target("web-1", "prod", &["app"]), target("web-2", "prod", &["app"])];
        assert!(validate_targets(&targets, &dir()).is_ok());
        let err = validate_targets(&targets, &OutputDestination::Console).unwrap_err();
        assert!(err.to_string().contains("multiple target pods"));
    }

    #[test]
    fn console_requires_single_container() {
        let targets = [target("web-1", "prod", &["app", "sidecar"])];
        let err = validate_targets(&targets, &OutputDestination::Console).unwrap_err();
        assert!(err.to_string().contains("multiple containers defined for pod \"web-1\""));
        assert!(validate_targets(&[target("web-1", "prod", &["app"])], &OutputDestination::Console).is_ok());
    }

    #[test]
    fn duplicate_targets_collide() {
        let targets = [target("web-1", "prod", &["app"]), target("web-1", "prod", &["app"])];
        let err = validate_targets(&targets, &dir()).unwrap_err();
        assert!(err.to_string().contains("same helper pod"));
    }

    #[test]
    fn containerless_target_is_rejected() {
        let err = validate_targets(&[target("web-1", "prod", &[])], &dir()).unwrap_err();
        assert!(err.to_string().contains("no containers"));
    }

    #[test]
    fn validate_checks_targets_against_config() {
        let one = [target("web-1", "prod", &["app"])];
        let two = [target("web-1", "prod", &["app"]), target("web-2", "prod", &["app"])];
        assert!(Orchestrator::validate(&two, &RunConfig::default()).is_ok());

        let console = RunOptions {
            output: "-".into(),
            ..RunOptions::default()
        }
        .parse()
        .unwrap();
        assert!(Orchestrator::validate(&one, &console).is_ok());
        assert!(Orchestrator::validate(&two, &console).is_err());
    }
}
