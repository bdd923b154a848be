//! Trace output destinations.
//!
//! In directory mode every traced container gets its own artifact named
//! `<namespace>_<pod>_<container>.strace`. Kubernetes names never contain
//! `_`, so the name is unambiguous and stable across runs. In console mode a
//! single shared writer receives every byte.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use kstrace_common::constants::ARTIFACT_EXTENSION;
use kstrace_common::error::{KstraceError, Result};
use kstrace_common::types::{OutputDestination, Target};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

type ConsoleHandle = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// Returns the artifact file name for one traced container.
#[must_use]
pub fn artifact_file_name(namespace: &str, pod: &str, container: &str) -> String {
    format!("{namespace}_{pod}_{container}.{ARTIFACT_EXTENSION}")
}

/// Returns the artifact path for one traced container under `dir`.
#[must_use]
pub fn artifact_path(dir: &Path, namespace: &str, pod: &str, container: &str) -> PathBuf {
    dir.join(artifact_file_name(namespace, pod, container))
}

/// What a finished artifact contains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSummary {
    /// `namespace/pod/container` of the traced container.
    pub label: String,
    /// File written, or `None` for the console.
    pub path: Option<PathBuf>,
    /// Bytes written.
    pub bytes: u64,
}

/// Opens artifact writers for one run.
#[derive(Clone)]
pub struct OutputFactory {
    destination: OutputDestination,
    console: Option<ConsoleHandle>,
}

impl OutputFactory {
    /// Creates a factory for `destination`. Console mode writes to stdout.
    #[must_use]
    pub fn new(destination: OutputDestination) -> Self {
        let console = destination
            .is_console()
            .then(|| Arc::new(Mutex::new(Box::new(tokio::io::stdout()) as Box<dyn AsyncWrite + Send + Unpin>)));
        Self {
            destination,
            console,
        }
    }

    /// Creates a console-mode factory writing to `writer`.
    #[must_use]
    pub fn with_console(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            destination: OutputDestination::Console,
            console: Some(Arc::new(Mutex::new(Box::new(writer)))),
        }
    }

    /// Returns the destination this factory writes to.
    #[must_use]
    pub const fn destination(&self) -> &OutputDestination {
        &self.destination
    }

    /// Creates the output directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be created.
    pub async fn prepare(&self) -> Result<()> {
        if let Some(dir) = self.destination.directory() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| KstraceError::Io {
                    path: dir.to_path_buf(),
                    source: e,
                })?;
        }
        Ok(())
    }

    /// Opens the artifact for one container of `target`, truncating any
    /// artifact left by an earlier run.
    ///
    /// # Errors
    ///
    /// Returns an output error if the artifact cannot be created.
    pub async fn open(&self, target: &Target, container: &str) -> Result<ArtifactWriter> {
        let label = format!("{}/{}/{container}", target.namespace, target.pod_name);
        let sink = match (&self.destination, &self.console) {
            (OutputDestination::Directory(dir), _) => {
                self.prepare().await?;
                let path = artifact_path(dir, &target.namespace, &target.pod_name, container);
                let file = tokio::fs::File::create(&path)
                    .await
                    .map_err(|e| KstraceError::Output {
                        artifact: path.display().to_string(),
                        source: e,
                    })?;
                tracing::debug!(artifact = %path.display(), "artifact opened");
                Sink::File { path, file }
            }
            (OutputDestination::Console, Some(console)) => Sink::Console(Arc::clone(console)),
            (OutputDestination::Console, None) => {
                return Err(KstraceError::Internal {
                    message: "console destination without a console writer".into(),
                });
            }
        };
        Ok(ArtifactWriter {
            label,
            sink,
            bytes: 0,
        })
    }
}

enum Sink {
    File { path: PathBuf, file: tokio::fs::File },
    Console(ConsoleHandle),
}

/// Writer for one container's trace output.
pub struct ArtifactWriter {
    label: String,
    sink: Sink,
    bytes: u64,
}

impl ArtifactWriter {
    /// Appends a chunk, preserving arrival order.
    ///
    /// # Errors
    ///
    /// Returns an output error if the write fails.
    pub async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        match &mut self.sink {
            Sink::File { path, file } => file.write_all(chunk).await.map_err(|e| KstraceError::Output {
                artifact: path.display().to_string(),
                source: e,
            })?,
            Sink::Console(console) => {
                let mut out = console.lock().await;
                out.write_all(chunk).await.map_err(|e| KstraceError::Output {
                    artifact: String::from("console"),
                    source: e,
                })?;
                out.flush().await.map_err(|e| KstraceError::Output {
                    artifact: String::from("console"),
                    source: e,
                })?;
            }
        }
        self.bytes += chunk.len() as u64;
        Ok(())
    }

    /// Flushes the artifact and returns what it contains.
    ///
    /// # Errors
    ///
    /// Returns an output error if the flush fails.
    pub async fn finish(&mut self) -> Result<ArtifactSummary> {
        let path = match &mut self.sink {
            Sink::File { path, file } => {
                file.flush().await.map_err(|e| KstraceError::Output {
                    artifact: path.display().to_string(),
                    source: e,
                })?;
                Some(path.clone())
            }
            Sink::Console(console) => {
                console.lock().await.flush().await.map_err(|e| KstraceError::Output {
                    artifact: String::from("console"),
                    source: e,
                })?;
                None
            }
        };
        tracing::debug!(artifact = %self.label, bytes = self.bytes, "artifact finalized");
        Ok(ArtifactSummary {
            label: self.label.clone(),
            path,
            bytes: self.bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use kstrace_common::types::TargetContainer;

    use super::*;

    /// Console stand-in whose contents can be inspected.
    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

    impl AsyncWrite for SharedBuffer {
        fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn target(pod: &str, namespace: &str, containers: &[&str]) -> Target {
        Target {
            pod_name: pod.into(),
            namespace: namespace.into(),
            node_name: "node-a".into(),
            containers: containers
                .iter()
                .map(|c| TargetContainer {
                    name: (*c).into(),
                    container_id: format!("id-{c}"),
                    image: "nginx".into(),
                })
                .collect(),
        }
    }

    #[test]
    fn artifact_name_encodes_identity() {
        assert_eq!(artifact_file_name("prod", "web-1", "app"), "prod_web-1_app.strace");
        assert_ne!(
            artifact_file_name("prod", "web-1", "app"),
            artifact_file_name("prod", "web-1", "sidecar")
        );
        assert_eq!(
            artifact_file_name("prod", "web-1", "app"),
            artifact_file_name("prod", "web-1", "app")
        );
    }

    #[tokio::test]
    async fn directory_artifacts_are_separate_per_container() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out_dir = dir.path().join("strace-collection");
        let factory = OutputFactory::new(OutputDestination::Directory(out_dir.clone()));
        let t = target("web-1", "prod", &["app", "sidecar"]);

        let mut app = factory.open(&t, "app").await.expect("open app");
        let mut sidecar = factory.open(&t, "sidecar").await.expect("open sidecar");
        app.write(b"openat(AT_FDCWD, ...)\n").await.expect("write");
        sidecar.write(b"epoll_wait(...)\n").await.expect("write");
        let summary = app.finish().await.expect("finish");
        let _ = sidecar.finish().await.expect("finish");

        assert_eq!(summary.bytes, 22);
        assert_eq!(summary.label, "prod/web-1/app");
        let app_text = std::fs::read_to_string(out_dir.join("prod_web-1_app.strace")).expect("read");
        let sidecar_text = std::fs::read_to_string(out_dir.join("prod_web-1_sidecar.strace")).expect("read");
        assert_eq!(app_text, "openat(AT_FDCWD, ...)\n");
        assert_eq!(sidecar_text, "epoll_wait(...)\n");
    }

    #[tokio::test]
    async fn console_receives_bytes_in_order() {
        let buffer = SharedBuffer::default();
        let factory = OutputFactory::with_console(buffer.clone());
        let t = target("web-1", "prod", &["app"]);

        let mut writer = factory.open(&t, "app").await.expect("open");
        writer.write(b"first\n").await.expect("write");
        writer.write(b"second\n").await.expect("write");
        let summary = writer.finish().await.expect("finish");

        assert!(summary.path.is_none());
        assert_eq!(&*buffer.0.lock().unwrap(), b"first\nsecond\n");
    }

    #[tokio::test]
    async fn reopening_truncates_previous_artifact() {
        let dir = tempfile::tempdir().expect("tempdir");
        let factory = OutputFactory::new(OutputDestination::Directory(dir.path().to_path_buf()));
        let t = target("web-1", "prod", &["app"]);

        let mut first = factory.open(&t, "app").await.expect("open");
        first.write(b"old run\n").await.expect("write");
        let _ = first.finish().await.expect("finish");

        let mut second = factory.open(&t, "app").await.expect("open");
        second.write(b"new\n").await.expect("write");
        let _ = second.finish().await.expect("finish");

        let text = std::fs::read_to_string(dir.path().join("prod_web-1_app.strace")).expect("read");
        assert_eq!(text, "new\n");
    }
}
