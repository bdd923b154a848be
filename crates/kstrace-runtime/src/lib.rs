//! Tracer lifecycle and orchestration for kstrace.
//!
//! A run creates one disposable namespace, starts one [`tracer::Tracer`] per
//! resolved target, streams every helper container's log into the output
//! destination, and tears everything down in reverse order of creation.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod backend;
pub mod helper_pod;
pub mod namespace;
pub mod orchestrator;
pub mod output;
pub mod resolve;
pub mod teardown;
pub mod tracer;
