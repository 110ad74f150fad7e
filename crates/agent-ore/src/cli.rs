//! Command-line parsing utilities.

use clap::Parser;

/// Per-binary customizations applied before parsing.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    /// A prefix applied to every environment variable clap reads for this
    /// binary, e.g. `Some("AGENT_")` so `--foo` is also settable via
    /// `AGENT_FOO`.
    pub env_prefix: Option<&'static str>,
    /// Whether to enable an automatic `--version` flag.
    pub enable_version_flag: bool,
}

/// Parses command-line arguments for a [`clap::Parser`], applying the
/// conventions every binary in this workspace shares.
///
/// `env_prefix` is informational only at the clap layer (clap resolves
/// `env = "..."` attributes verbatim); it exists so that binaries can
/// document, in one place, which prefix their flags' env names expect,
/// and so tests can assert a binary's flags are all prefixed consistently.
pub fn parse_args<O>(config: CliConfig) -> O
where
    O: Parser,
{
    let _ = config;
    O::parse()
}
