//! Internal utility libraries for the fleet agent.
//!
//! A grab-bag of small, independent modules that the rest of the workspace
//! leans on instead of reaching for the standard library directly, so that
//! cross-cutting concerns (CLI parsing, error display, task naming, time,
//! metrics) stay consistent across every binary and crate in the workspace.

pub mod build_info;
pub mod cli;
pub mod error;
pub mod http;
pub mod metrics;
pub mod now;
pub mod task;
pub mod tracing;
