//! Structured logging setup, with a runtime-reloadable stderr filter.
//!
//! A binary calls [`configure`] once at boot and keeps the returned
//! [`TracingHandle`] around so an operator can change the log level without
//! restarting the process, via the `/api/stderr/config` HTTP route.

use std::str::FromStr;

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload};

/// What to configure the global subscriber with.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// The filter directive used when `RUST_LOG` is unset, e.g. `"info"`.
    pub default_filter: String,
    /// Emit newline-delimited JSON instead of the default human-readable
    /// ANSI format.
    pub json: bool,
}

/// A handle onto the live stderr filter, cheap to clone and safe to share
/// with the internal HTTP server for the `/api/stderr/config` route.
#[derive(Clone)]
pub struct TracingHandle {
    stderr_filter: reload::Handle<EnvFilter, tracing_subscriber::Registry>,
}

impl TracingHandle {
    /// Replaces the live stderr filter with `directives` (the same syntax
    /// `RUST_LOG` accepts), taking effect on the next log line emitted by
    /// any thread.
    pub fn reload_stderr_log_filter(&self, directives: &str) -> Result<(), anyhow::Error> {
        let filter = EnvFilter::from_str(directives)?;
        self.stderr_filter.reload(filter)?;
        Ok(())
    }
}

/// Installs the global `tracing` subscriber and returns a handle for
/// reloading its filter at runtime. Must be called at most once per
/// process.
pub fn configure(config: TracingConfig) -> Result<TracingHandle, anyhow::Error> {
    let initial = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.default_filter));
    let (filter, stderr_filter) = reload::Layer::new(initial);

    let fmt_layer = if config.json {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    };

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();

    Ok(TracingHandle { stderr_filter })
}
