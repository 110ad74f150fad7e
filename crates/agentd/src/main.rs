//! The fleet agent binary (§2 control flow): parses configuration once,
//! brings up the ambient stack (tracing, internal HTTP server), derives
//! the cluster identity, and then runs two independent lifetimes for as
//! long as the process lives:
//!
//! - the local ingress-resolver server and the metrics intake listener,
//!   which run unconditionally;
//! - the leader-elected reporter loop, which only runs while this replica
//!   holds the cluster lease (or unconditionally, in the documented
//!   degraded mode, if the lease itself is unreachable).

use std::net::SocketAddr;
use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use once_cell::sync::Lazy;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use agent_core::{AggregatedMetrics, CurrentSnapshot};
use agent_k8s::{LeaseLock, LeaseOutcome};
use agent_ore::build_info::BuildInfo;
use agent_ore::cli::{self, CliConfig};
use agent_ore::error::ErrorExt;
use agent_ore::metrics::MetricsRegistry;
use agent_ore::tracing::TracingConfig;
use agent_reporter::{Reporter, ReporterConfig};

const BUILD_INFO: BuildInfo = agent_ore::build_info::BUILD_INFO;

static VERSION: Lazy<String> = Lazy::new(|| format!("{} ({})", BUILD_INFO.version, BUILD_INFO.sha));

/// The fleet agent: watches cluster state relevant to an API gateway and
/// reports sanitized snapshots, diagnostics, and metrics to the Director.
#[derive(Debug, Parser)]
#[clap(name = "agentd", version = VERSION.as_str())]
struct Args {
    /// The `tracing`/`RUST_LOG`-style filter used when `RUST_LOG` itself is
    /// unset.
    #[clap(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit newline-delimited JSON log lines instead of the default
    /// human-readable format.
    #[clap(long, env = "LOG_JSON")]
    log_json: bool,

    /// The address of the internal HTTP server (`/api/livez`, `/metrics`,
    /// `/api/stderr/config`) — not part of the upstream contract, carried
    /// regardless per the ambient-stack rule.
    #[clap(long, env = "INTERNAL_HTTP_LISTEN_ADDR", default_value = "0.0.0.0:9090")]
    internal_http_listen_addr: SocketAddr,

    /// The gateway's snapshot endpoint.
    #[clap(
        long,
        env = "AES_SNAPSHOT_URL",
        default_value = "http://ambassador-admin:8005/snapshot-external"
    )]
    aes_snapshot_url: String,

    /// The gateway's diagnostics endpoint.
    #[clap(
        long,
        env = "AES_DIAGNOSTICS_URL",
        default_value = "http://ambassador-admin:8005/ambassador/v0/diag/?json=true"
    )]
    aes_diagnostics_url: String,

    /// Whether to report gateway diagnostics to the Director in addition
    /// to snapshots.
    #[clap(long, env = "AES_REPORT_DIAGNOSTICS_TO_CLOUD")]
    aes_report_diagnostics_to_cloud: bool,

    /// The bootstrap token, lowest-precedence in the token resolver (§4.3).
    #[clap(long, env = "CLOUD_CONNECT_TOKEN", default_value = "")]
    cloud_connect_token: String,

    /// Overrides the computed cluster id outright.
    #[clap(long, env = "AMBASSADOR_CLUSTER_ID")]
    ambassador_cluster_id: Option<String>,

    /// A second override spelling for the computed cluster id, checked if
    /// `AMBASSADOR_CLUSTER_ID` is unset.
    #[clap(long, env = "AMBASSADOR_SCOUT_ID")]
    ambassador_scout_id: Option<String>,

    /// The gateway-identity seed the cluster id is derived from (§4.15).
    #[clap(long, env = "AMBASSADOR_ID", default_value = "default")]
    ambassador_id: String,

    /// The namespace the agent's own config (token secret/configmap) lives
    /// in, and the namespace its coordination lease is created in.
    #[clap(long, env = "AGENT_NAMESPACE", default_value = "ambassador")]
    agent_namespace: String,

    /// The exact name of the token-carrying secret or configmap, if the
    /// operator doesn't want to rely on the `*agent-cloud-token` naming
    /// convention.
    #[clap(long, env = "AGENT_CONFIG_RESOURCE_NAME")]
    agent_config_resource_name: Option<String>,

    /// Whitespace-separated namespaces to watch; empty means cluster-wide.
    #[clap(long, env = "NAMESPACES_TO_WATCH", default_value = "", value_parser = parse_namespaces)]
    namespaces_to_watch: Vec<String>,

    /// The requested reporting cadence; raised to the 30s floor (I2).
    #[clap(long, env = "AGENT_REPORTING_PERIOD", default_value = "30")]
    agent_reporting_period_secs: u64,

    /// The Director's `host:port[+secure]` endpoint.
    #[clap(long, env = "RPC_CONNECTION_ADDRESS", default_value = "cloud.datawire.io:443+secure")]
    rpc_connection_address: String,

    /// An extra header name attached to every outbound Director RPC.
    #[clap(long, env = "RPC_INTERCEPT_HEADER_KEY")]
    rpc_intercept_header_key: Option<String>,

    /// The extra header's value; ignored if the key is unset.
    #[clap(long, env = "RPC_INTERCEPT_HEADER_VALUE")]
    rpc_intercept_header_value: Option<String>,

    /// The local ingress-resolver server's bind host.
    #[clap(long, env = "SERVER_HOST", default_value = "0.0.0.0")]
    server_host: String,

    /// The local ingress-resolver server's bind port.
    #[clap(long, env = "SERVER_PORT", default_value = "8081")]
    server_port: u16,

    /// The envoy-style metrics intake listener's bind address (§6: `:8080`).
    #[clap(long, env = "METRICS_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    metrics_listen_addr: SocketAddr,
}

fn parse_namespaces(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

impl Args {
    fn cluster_id_override(&self) -> Option<&str> {
        self.ambassador_cluster_id
            .as_deref()
            .or(self.ambassador_scout_id.as_deref())
    }

    fn rpc_intercept_header(&self) -> Option<(String, String)> {
        let key = self.rpc_intercept_header_key.clone()?;
        let value = self.rpc_intercept_header_value.clone().unwrap_or_default();
        Some((key, value))
    }

    fn min_report_period_secs(&self) -> u64 {
        self.agent_reporting_period_secs
            .max(agent_core::directive::MIN_REPORT_PERIOD_FLOOR.as_secs())
    }
}

#[tokio::main]
async fn main() {
    let args: Args = cli::parse_args(CliConfig {
        env_prefix: None,
        enable_version_flag: true,
    });
    if let Err(err) = run(args).await {
        eprintln!("agentd: fatal: {}", err.display_with_causes());
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), anyhow::Error> {
    agent_ore::tracing::configure(TracingConfig {
        default_filter: args.log_level.clone(),
        json: args.log_json,
    })
    .context("configuring tracing")?;

    info!(version = %VERSION.as_str(), "starting agentd");

    let metrics_registry = MetricsRegistry::new();

    agent_ore::task::spawn(|| "internal-http-server", {
        let addr = args.internal_http_listen_addr;
        let metrics_registry = metrics_registry.clone();
        async move {
            if let Err(err) = agent_ore::http::serve(addr, metrics_registry, None).await {
                warn!(error = %err, "internal http server exited");
            }
        }
    });

    let client = kube::Client::try_default()
        .await
        .context("loading in-cluster kubernetes config")?;

    let cluster_domain = agent_k8s::cluster_domain::resolve(agent_k8s::cluster_domain::DEFAULT_CLUSTER_DOMAIN).await;
    let synthesized_cluster_id =
        agent_k8s::cluster_id::resolve(client.clone(), args.cluster_id_override(), &args.ambassador_id).await;
    info!(cluster_id = %synthesized_cluster_id, cluster_domain = %cluster_domain, "derived cluster identity");

    let current_snapshot = Arc::new(CurrentSnapshot::new());
    let aggregated_metrics = Arc::new(AggregatedMetrics::new());

    agent_ore::task::spawn(|| "ingress-resolver-server", {
        let addr: SocketAddr = format!("{}:{}", args.server_host, args.server_port)
            .parse()
            .context("parsing SERVER_HOST/SERVER_PORT")
            .expect("invalid ingress-resolver bind address");
        let snapshot = Arc::clone(&current_snapshot);
        let cluster_domain = cluster_domain.clone();
        async move {
            if let Err(err) = agent_service::serve(addr, snapshot, cluster_domain, BUILD_INFO).await {
                warn!(error = %err, "ingress-resolver server exited");
            }
        }
    });

    agent_ore::task::spawn(|| "metrics-intake-server", {
        let addr = args.metrics_listen_addr;
        let aggregated = Arc::clone(&aggregated_metrics);
        async move {
            if let Err(err) = agent_reporter::metrics_ingest::serve(addr, aggregated).await {
                warn!(error = %err, "metrics intake server exited");
            }
        }
    });

    let cancel = CancellationToken::new();
    agent_ore::task::spawn(|| "signal-watcher", {
        let cancel = cancel.clone();
        async move {
            wait_for_shutdown_signal().await;
            info!("received shutdown signal, cancelling");
            cancel.cancel();
        }
    });

    let reporter_config = ReporterConfig {
        agent_namespace: args.agent_namespace.clone(),
        namespaces_to_watch: args.namespaces_to_watch.clone(),
        config_resource_name: args.agent_config_resource_name.clone(),
        ambassador_id: args.ambassador_id.clone(),
        synthesized_cluster_id,
        gateway_snapshot_url: args.aes_snapshot_url.clone(),
        gateway_diagnostics_url: args.aes_diagnostics_url.clone(),
        report_diagnostics_to_cloud: args.aes_report_diagnostics_to_cloud,
        rpc_connection_address: args.rpc_connection_address.clone(),
        rpc_intercept_header: args.rpc_intercept_header(),
        bootstrap_token_env: args.cloud_connect_token.clone(),
        initial_min_report_period_secs: args.min_report_period_secs(),
    };

    run_with_leader_election(client, &args.agent_namespace, reporter_config, &current_snapshot, &aggregated_metrics, &metrics_registry, cancel)
        .await;

    info!("agentd shut down cleanly");
    Ok(())
}

/// Builds the identity this replica runs for under the lease: the pod's
/// hostname when running in-cluster, with the process id appended so
/// several replicas on one node (as in local development) never collide.
fn lease_identity() -> String {
    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "agentd".to_string());
    format!("{hostname}-{}", process::id())
}

/// Probes the lease; if it's reachable, runs the elect/renew/release loop
/// for the life of the process, starting and stopping the reporter loop as
/// leadership is won and lost (I1). If the probe comes back `Forbidden`,
/// leader election is skipped entirely and the reporter runs unconditionally
/// — the documented degraded mode (§4.11, §7 Permission-Error).
async fn run_with_leader_election(
    client: kube::Client,
    agent_namespace: &str,
    reporter_config: ReporterConfig,
    current_snapshot: &Arc<CurrentSnapshot>,
    aggregated_metrics: &Arc<AggregatedMetrics>,
    metrics_registry: &MetricsRegistry,
    cancel: CancellationToken,
) {
    let lease = LeaseLock::new(client.clone(), agent_namespace, lease_identity());

    match lease.probe().await {
        LeaseOutcome::Forbidden => {
            warn!("lease get forbidden, running reporter without leader election (degraded mode)");
            run_reporter_once(client, reporter_config, current_snapshot, aggregated_metrics, metrics_registry, cancel).await;
        }
        LeaseOutcome::Elected => {
            lease
                .run(cancel, move |leading_cancel| {
                    let client = client.clone();
                    let current_snapshot = Arc::clone(current_snapshot);
                    let aggregated_metrics = Arc::clone(aggregated_metrics);
                    let metrics_registry = metrics_registry.clone();
                    let config = clone_reporter_config(&reporter_config);
                    async move {
                        run_reporter_once(client, config, &current_snapshot, &aggregated_metrics, &metrics_registry, leading_cancel).await;
                    }
                })
                .await;
        }
    }
}

async fn run_reporter_once(
    client: kube::Client,
    config: ReporterConfig,
    current_snapshot: &Arc<CurrentSnapshot>,
    aggregated_metrics: &Arc<AggregatedMetrics>,
    metrics_registry: &MetricsRegistry,
    cancel: CancellationToken,
) {
    let reporter = match Reporter::new(client, config, Arc::clone(current_snapshot), Arc::clone(aggregated_metrics), metrics_registry).await {
        Ok(reporter) => reporter,
        Err(err) => {
            warn!(error = %err, "failed to construct reporter, stepping down");
            return;
        }
    };
    reporter.start(cancel.clone()).await;
    reporter.run(cancel).await;
}

/// [`ReporterConfig`] deliberately doesn't derive `Clone` (most of its
/// fields are only ever needed once, at construction), but the lease loop's
/// `on_started_leading` closure is `FnMut` and may run more than once across
/// the process lifetime, so this builds a fresh copy per leadership term.
fn clone_reporter_config(config: &ReporterConfig) -> ReporterConfig {
    ReporterConfig {
        agent_namespace: config.agent_namespace.clone(),
        namespaces_to_watch: config.namespaces_to_watch.clone(),
        config_resource_name: config.config_resource_name.clone(),
        ambassador_id: config.ambassador_id.clone(),
        synthesized_cluster_id: config.synthesized_cluster_id.clone(),
        gateway_snapshot_url: config.gateway_snapshot_url.clone(),
        gateway_diagnostics_url: config.gateway_diagnostics_url.clone(),
        report_diagnostics_to_cloud: config.report_diagnostics_to_cloud,
        rpc_connection_address: config.rpc_connection_address.clone(),
        rpc_intercept_header: config.rpc_intercept_header.clone(),
        bootstrap_token_env: config.bootstrap_token_env.clone(),
        initial_min_report_period_secs: config.initial_min_report_period_secs,
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespaces_are_split_on_whitespace() {
        assert_eq!(parse_namespaces("ns-a ns-b  ns-c"), vec!["ns-a", "ns-b", "ns-c"]);
    }

    #[test]
    fn empty_namespace_string_yields_cluster_wide_scope() {
        assert!(parse_namespaces("").is_empty());
    }

    #[test]
    fn cluster_id_override_prefers_ambassador_cluster_id() {
        let args = Args::parse_from([
            "agentd",
            "--ambassador-cluster-id",
            "from-cluster-id",
            "--ambassador-scout-id",
            "from-scout-id",
        ]);
        assert_eq!(args.cluster_id_override(), Some("from-cluster-id"));
    }

    #[test]
    fn cluster_id_override_falls_back_to_scout_id() {
        let args = Args::parse_from(["agentd", "--ambassador-scout-id", "from-scout-id"]);
        assert_eq!(args.cluster_id_override(), Some("from-scout-id"));
    }

    #[test]
    fn reporting_period_is_floored() {
        let args = Args::parse_from(["agentd", "--agent-reporting-period-secs", "5"]);
        assert_eq!(args.min_report_period_secs(), 30);
    }
}
