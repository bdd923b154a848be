//! `kstrace`: resolve targets, trace them, report.

use std::sync::Arc;

use anyhow::Context;
use kstrace_runtime::backend::ClusterBackend;
use kstrace_runtime::backend::kubernetes::KubeBackend;
use kstrace_runtime::orchestrator::Orchestrator;
use kstrace_runtime::resolve::TargetResolver;
use tokio_util::sync::CancellationToken;

use crate::args::Cli;
use crate::cluster;
use crate::output;

/// Executes a tracing run.
///
/// # Errors
///
/// Returns an error if the flags are invalid, the cluster cannot be reached,
/// a target cannot be resolved, or any tracer fails.
pub async fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = cli.run_options().parse()?;

    let connection = cluster::connect(cli.kubeconfig.as_deref(), cli.context.as_deref()).await?;
    let namespace = cli
        .namespace
        .clone()
        .unwrap_or(connection.default_namespace);
    let backend: Arc<dyn ClusterBackend> = Arc::new(KubeBackend::new(connection.client));

    let targets = TargetResolver::new(Arc::clone(&backend), namespace.as_str())
        .resolve(&cli.targets)
        .await
        .with_context(|| format!("failed to resolve targets in namespace {namespace}"))?;
    Orchestrator::validate(&targets, &config)?;
    tracing::info!(
        targets = targets.len(),
        output = %config.output,
        image = %config.trace_image,
        duration = ?config.trace_bound(),
        "starting trace run"
    );

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn(interrupt_on_ctrl_c(cancel.clone()));
    let outcome = Orchestrator::new(backend, config, cancel).run(&targets).await;
    interrupt.abort();

    let report = outcome?;
    output::print_summary(&report);
    Ok(())
}

/// Cancels `cancel` on the first Ctrl-C, which takes the normal teardown path.
async fn interrupt_on_ctrl_c(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::warn!("interrupt received, stopping tracers");
        cancel.cancel();
    }
}
