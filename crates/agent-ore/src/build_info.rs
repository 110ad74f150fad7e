//! Version metadata baked in at compile time.

/// The crate version and (when available) git SHA of the running binary,
/// the Rust analog of a `build_info!()` macro: a single constant every
/// binary logs at boot and serves from its `Version()` RPC.
#[derive(Debug, Clone, Copy)]
pub struct BuildInfo {
    pub version: &'static str,
    pub sha: &'static str,
}

/// The version of `agent-ore` itself; binaries define their own
/// `BuildInfo` constant from their own `CARGO_PKG_VERSION`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const BUILD_INFO: BuildInfo = BuildInfo {
    version: VERSION,
    sha: match option_env!("VCS_REF") {
        Some(sha) => sha,
        None => "unknown",
    },
};
