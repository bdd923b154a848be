//! # kstrace-cri
//!
//! Everything that runs inside a helper pod: the runtime socket client that
//! maps a container id to its host process, and the entrypoint that attaches
//! `strace` to that process and streams the trace to the container log.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod attach;
pub mod client;
pub mod entrypoint;
