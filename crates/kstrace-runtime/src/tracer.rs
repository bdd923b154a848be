//! Per-target tracer state machine.
//!
//! A [`Tracer`] owns exactly one helper pod. It moves through
//! `Created -> Launching -> Attached -> Stopping -> Cleaned`; every path,
//! successful or not, ends in `Cleaned` once [`Tracer::cleanup`] runs.

use std::sync::Arc;
use std::time::Duration;

use futures::AsyncReadExt;
use kstrace_common::config::RunConfig;
use kstrace_common::error::{KstraceError, Result};
use kstrace_common::types::{Target, TracerState};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::{ClusterBackend, ContainerExit, LogStream};
use crate::helper_pod::{build_helper_pod, helper_container_name, helper_pod_name};
use crate::output::{ArtifactSummary, ArtifactWriter, OutputFactory};

/// Read buffer size for helper log streams.
const CHUNK_SIZE: usize = 8 * 1024;

/// First and longest pause between exit status queries once a log ends.
const EXIT_POLL_INITIAL: Duration = Duration::from_millis(100);
const EXIT_POLL_MAX: Duration = Duration::from_secs(1);

type CaptureHandle = JoinHandle<Result<Vec<ArtifactSummary>>>;

/// Traces every container of one target through a helper pod.
pub struct Tracer {
    target: Target,
    namespace: String,
    pod_name: String,
    config: Arc<RunConfig>,
    backend: Arc<dyn ClusterBackend>,
    outputs: OutputFactory,
    state: Arc<watch::Sender<TracerState>>,
    stop: CancellationToken,
    capture: Option<CaptureHandle>,
    artifacts: Vec<ArtifactSummary>,
    submitted: bool,
}

impl Tracer {
    /// Creates a tracer for `target` whose helper pod will live in `namespace`.
    ///
    /// Cancelling `cancel` stops the tracer wherever it is.
    #[must_use]
    pub fn new(
        target: Target,
        namespace: &str,
        config: Arc<RunConfig>,
        backend: Arc<dyn ClusterBackend>,
        outputs: OutputFactory,
        cancel: &CancellationToken,
    ) -> Self {
        let pod_name = helper_pod_name(&target);
        let (state, _) = watch::channel(TracerState::Created);
        Self {
            target,
            namespace: namespace.to_string(),
            pod_name,
            config,
            backend,
            outputs,
            state: Arc::new(state),
            stop: cancel.child_token(),
            capture: None,
            artifacts: Vec::new(),
            submitted: false,
        }
    }

    /// Returns the traced target.
    #[must_use]
    pub const fn target(&self) -> &Target {
        &self.target
    }

    /// Returns the helper pod name.
    #[must_use]
    pub fn pod_name(&self) -> &str {
        &self.pod_name
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TracerState {
        *self.state.borrow()
    }

    /// Returns a receiver that observes every state transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TracerState> {
        self.state.subscribe()
    }

    /// Returns the artifacts finalized so far.
    #[must_use]
    pub fn artifacts(&self) -> &[ArtifactSummary] {
        &self.artifacts
    }

    fn set_state(&self, next: TracerState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            tracing::debug!(pod = %self.target, from = %prev, to = %next, "tracer state changed");
        }
    }

    /// Submits the helper pod and waits until it is running, then begins
    /// capturing output.
    ///
    /// Returns as soon as capture has begun; it does not wait for output.
    ///
    /// # Errors
    ///
    /// Returns a placement error (scheduling, image pull, admission), a
    /// timeout if the pod does not run within the configured bound,
    /// [`KstraceError::Cancelled`] if the run is aborted meanwhile, or an
    /// output error if an artifact cannot be opened.
    pub async fn start(&mut self) -> Result<()> {
        if self.state() != TracerState::Created {
            return Err(KstraceError::Internal {
                message: format!("tracer for {} was already started", self.target),
            });
        }
        self.set_state(TracerState::Launching);

        let pod = build_helper_pod(&self.target, &self.pod_name, &self.namespace, &self.config);
        self.submitted = true;
        self.backend.create_pod(&self.namespace, &pod).await?;
        tracing::info!(pod = %self.target, helper = %self.pod_name, node = %self.target.node_name, "helper pod submitted");

        tokio::select! {
            () = self.stop.cancelled() => return Err(KstraceError::Cancelled),
            placed = self.backend.wait_for_pod_running(
                &self.namespace,
                &self.pod_name,
                self.config.pod_start_timeout,
            ) => placed?,
        }

        let mut channels = Vec::with_capacity(self.target.containers.len());
        for container in &self.target.containers {
            let helper = helper_container_name(&container.name);
            let stream = self
                .backend
                .stream_container_logs(&self.namespace, &self.pod_name, &helper)
                .await?;
            let writer = self.outputs.open(&self.target, &container.name).await?;
            channels.push(Channel {
                helper,
                stream,
                writer,
            });
        }

        self.set_state(TracerState::Attached);
        tracing::info!(pod = %self.target, helper = %self.pod_name, containers = channels.len(), "tracer attached");

        // The duration is measured from here, once capture has begun.
        if let Some(bound) = self.config.trace_bound() {
            let _ = tokio::spawn(expire_after(
                bound,
                self.stop.clone(),
                Arc::clone(&self.state),
                self.target.key(),
            ));
        }

        let ctx = CaptureContext {
            backend: Arc::clone(&self.backend),
            namespace: self.namespace.clone(),
            pod_name: self.pod_name.clone(),
            exit_timeout: self.config.pod_start_timeout,
        };
        self.capture = Some(tokio::spawn(capture(ctx, channels, self.stop.child_token())));
        Ok(())
    }

    /// Waits for capture to end on its own: the trace duration elapsed, the
    /// run was cancelled, or every helper container exited.
    ///
    /// # Errors
    ///
    /// Returns the capture error, such as a helper container terminating
    /// with a failure or an artifact write failing.
    pub async fn wait(&mut self) -> Result<()> {
        match self.capture.take() {
            Some(handle) => self.collect(handle).await,
            None => Ok(()),
        }
    }

    /// Ends capture and finalizes the artifacts.
    ///
    /// A no-op on a tracer that never started or has already stopped.
    ///
    /// # Errors
    ///
    /// Returns the capture error if capture had failed before it was stopped.
    pub async fn stop(&mut self) -> Result<()> {
        if self.state() == TracerState::Created {
            return Ok(());
        }
        let Some(handle) = self.capture.take() else {
            self.stop.cancel();
            return Ok(());
        };
        if self.state() == TracerState::Attached {
            self.set_state(TracerState::Stopping);
        }
        tracing::info!(pod = %self.target, helper = %self.pod_name, "stopping tracer");
        self.stop.cancel();
        self.collect(handle).await
    }

    async fn collect(&mut self, handle: CaptureHandle) -> Result<()> {
        let outcome = handle.await.map_err(|e| KstraceError::Internal {
            message: format!("capture task for {} failed: {e}", self.target),
        });
        self.stop.cancel();
        if self.state() == TracerState::Attached {
            self.set_state(TracerState::Stopping);
        }
        self.artifacts = outcome??;
        Ok(())
    }

    /// Removes the helper pod, stopping capture first if it still runs.
    ///
    /// Safe to call in any state, including after a failed or cancelled
    /// start. A pod that is already gone counts as removed. The tracer is
    /// `Cleaned` afterwards even when deletion fails.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the helper pod could not be deleted.
    pub async fn cleanup(&mut self) -> Result<()> {
        if self.state() == TracerState::Cleaned {
            return Ok(());
        }
        if self.capture.is_some() {
            if let Err(e) = self.stop().await {
                tracing::warn!(pod = %self.target, error = %e, "capture failed while stopping for cleanup");
            }
        }
        self.stop.cancel();

        let result = if self.submitted {
            match self.backend.delete_pod(&self.namespace, &self.pod_name).await {
                Ok(()) => {
                    tracing::info!(pod = %self.target, helper = %self.pod_name, "helper pod deleted");
                    Ok(())
                }
                Err(e) if e.is_not_found() => {
                    tracing::debug!(pod = %self.target, helper = %self.pod_name, "helper pod already gone");
                    Ok(())
                }
                Err(e) => {
                    tracing::warn!(pod = %self.target, helper = %self.pod_name, error = %e, "failed to delete helper pod");
                    Err(e)
                }
            }
        } else {
            Ok(())
        };
        self.set_state(TracerState::Cleaned);
        result
    }
}

/// Moves the tracer to `Stopping` once `bound` elapses, unless it was stopped
/// first.
async fn expire_after(
    bound: Duration,
    stop: CancellationToken,
    state: Arc<watch::Sender<TracerState>>,
    key: String,
) {
    tokio::select! {
        biased;
        () = stop.cancelled() => {}
        () = tokio::time::sleep(bound) => {
            tracing::info!(pod = %key, after = ?bound, "trace duration elapsed");
            let _ = state.send_if_modified(|s| {
                let attached = *s == TracerState::Attached;
                if attached {
                    *s = TracerState::Stopping;
                }
                attached
            });
            stop.cancel();
        }
    }
}

struct CaptureContext {
    backend: Arc<dyn ClusterBackend>,
    namespace: String,
    pod_name: String,
    exit_timeout: Duration,
}

/// One helper container's log stream and the artifact it feeds.
struct Channel {
    helper: String,
    stream: LogStream,
    writer: ArtifactWriter,
}

/// Pumps every channel until it ends or `halt` fires. The first failing
/// channel halts its siblings, so every artifact is still finalized.
async fn capture(
    ctx: CaptureContext,
    channels: Vec<Channel>,
    halt: CancellationToken,
) -> Result<Vec<ArtifactSummary>> {
    let results =
        futures::future::join_all(channels.into_iter().map(|c| copy_channel(&ctx, c, &halt))).await;
    results.into_iter().collect()
}

async fn copy_channel(
    ctx: &CaptureContext,
    mut channel: Channel,
    halt: &CancellationToken,
) -> Result<ArtifactSummary> {
    let pumped = pump(ctx, &mut channel, halt).await;
    if pumped.is_err() {
        halt.cancel();
    }
    let finished = channel.writer.finish().await;
    pumped?;
    finished
}

async fn pump(ctx: &CaptureContext, channel: &mut Channel, halt: &CancellationToken) -> Result<()> {
    let mut buf = vec![0_u8; CHUNK_SIZE];
    loop {
        let read = tokio::select! {
            biased;
            () = halt.cancelled() => return Ok(()),
            read = channel.stream.read(&mut buf) => read,
        };
        let n = read.map_err(|e| KstraceError::Cluster {
            operation: "stream container logs",
            message: format!("{}/{}: {e}", ctx.pod_name, channel.helper),
        })?;
        if n == 0 {
            break;
        }
        channel.writer.write(&buf[..n]).await?;
    }

    // The stream ended without being asked to: find out why.
    let exit = tokio::select! {
        biased;
        () = halt.cancelled() => return Ok(()),
        exit = await_container_exit(ctx, &channel.helper) => exit?,
    };
    if exit.exit_code != 0 {
        return Err(KstraceError::HelperTerminated {
            pod: ctx.pod_name.clone(),
            container: channel.helper.clone(),
            exit_code: exit.exit_code,
            reason: exit.reason,
        });
    }
    tracing::info!(helper = %ctx.pod_name, container = %channel.helper, "helper container finished");
    Ok(())
}

/// Waits for the kubelet to publish how `container` terminated.
///
/// A followed log closes as soon as the container dies, while its status
/// becomes visible on the pod a little later.
async fn await_container_exit(ctx: &CaptureContext, container: &str) -> Result<ContainerExit> {
    tokio::time::timeout(ctx.exit_timeout, poll_container_exit(ctx, container))
        .await
        .map_err(|_| KstraceError::Timeout {
            operation: format!(
                "waiting for helper container {container} in {} to report its exit after its log closed",
                ctx.pod_name
            ),
            after: ctx.exit_timeout,
        })?
}

async fn poll_container_exit(ctx: &CaptureContext, container: &str) -> Result<ContainerExit> {
    let mut delay = EXIT_POLL_INITIAL;
    loop {
        if let Some(exit) = ctx
            .backend
            .container_exit(&ctx.namespace, &ctx.pod_name, container)
            .await?
        {
            return Ok(exit);
        }
        tracing::debug!(helper = %ctx.pod_name, container, retry_in = ?delay, "log closed, exit status not yet reported");
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(EXIT_POLL_MAX);
    }
}
