//! The reporter loop (§4.10): the central state machine tying every other
//! collaborator together. Runs only while this replica holds the leader
//! lease; the ingress resolver keeps answering queries off the last
//! snapshot it left behind regardless.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agent_core::{AggregatedMetrics, CurrentSnapshot};
use agent_k8s::resources::argo::ArgoLoop;
use agent_k8s::resources::config::ConfigWatchers;
use agent_k8s::resources::core::CoreWatchers;
use agent_k8s::resources::fallback::FallbackWatchers;
use agent_k8s::resources::gateway_presence::{GatewayPresence, PresenceEdge};
use agent_k8s::resources::NamespaceScope;
use kube::Client;
use prometheus::{HistogramVec, IntCounterVec, Opts};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::assembler::{assemble_diagnostics, assemble_snapshot, AssemblyInputs};
use crate::comm::{parse_rpc_address, Comm, DirectiveStream};
use crate::directive::{handle_directive, ReportingState};

const STREAM_SNAPSHOT: &str = "snapshot";
const STREAM_DIAGNOSTICS: &str = "diagnostics";
const STREAM_METRICS: &str = "metrics";

/// Operator-configured settings the reporter loop needs, gathered once at
/// bootstrap from the parsed CLI args (§6 env vars).
pub struct ReporterConfig {
    pub agent_namespace: String,
    pub namespaces_to_watch: Vec<String>,
    pub config_resource_name: Option<String>,
    pub ambassador_id: String,
    pub synthesized_cluster_id: String,
    pub gateway_snapshot_url: String,
    pub gateway_diagnostics_url: String,
    pub report_diagnostics_to_cloud: bool,
    pub rpc_connection_address: String,
    pub rpc_intercept_header: Option<(String, String)>,
    pub bootstrap_token_env: String,
    /// `AGENT_REPORTING_PERIOD`, already floored by the caller; seeds
    /// [`ReportingState`] so the operator-configured cadence takes effect
    /// before any directive ever arrives.
    pub initial_min_report_period_secs: u64,
}

/// The three streams the reporter multiplexes over one [`Comm`], each with
/// its own in-flight/quiet-window bit (§4.10).
#[derive(Default)]
struct StreamState {
    in_flight: AtomicBool,
}

impl StreamState {
    /// Claims the stream for a send, returning `false` if one is already
    /// outstanding (including its quiet window). Only ever called once
    /// assembly has already produced something worth sending — a failed
    /// assembly never claims the stream at all.
    fn try_begin(&self) -> bool {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Whether a send (and its quiet window) is already outstanding. Used to
    /// decide whether it's even worth attempting assembly this tick.
    fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn finish(&self) {
        self.in_flight.store(false, Ordering::SeqCst);
    }
}

/// Counts and latencies for the agent's own report sends, exposed at
/// `/metrics` (§1 ambient stack, §4.10 added note).
struct ReporterMetrics {
    sends_total: IntCounterVec,
    send_latency: HistogramVec,
}

impl ReporterMetrics {
    fn register(registry: &agent_ore::metrics::MetricsRegistry) -> Self {
        let sends_total = IntCounterVec::new(
            Opts::new("agent_report_sends_total", "Total report sends attempted, by stream and outcome."),
            &["stream", "outcome"],
        )
        .expect("valid metric opts");
        let send_latency = HistogramVec::new(
            prometheus::HistogramOpts::new("agent_report_send_latency_seconds", "Report send latency in seconds."),
            &["stream"],
        )
        .expect("valid metric opts");
        registry.register(sends_total.clone());
        registry.register(send_latency.clone());
        ReporterMetrics { sends_total, send_latency }
    }

    fn observe(&self, stream: &str, outcome: &str, elapsed: Duration) {
        self.sends_total.with_label_values(&[stream, outcome]).inc();
        self.send_latency.with_label_values(&[stream]).observe(elapsed.as_secs_f64());
    }
}

struct FallbackSlot {
    group: FallbackWatchers,
    cancel: CancellationToken,
}

/// Owns every watcher, the remote channel, and the shared state the local
/// ingress resolver reads from. Constructed once at leader acquisition;
/// dropped (tearing every watcher down) when leadership is lost.
pub struct Reporter {
    client: Client,
    scope: NamespaceScope,
    config: ReporterConfig,
    http: reqwest::Client,

    core: CoreWatchers,
    fallback: AsyncMutex<Option<FallbackSlot>>,
    gateway_presence: GatewayPresence,
    config_watchers: ConfigWatchers,
    argo: ArgoLoop,

    current_snapshot: Arc<CurrentSnapshot>,
    aggregated_metrics: Arc<AggregatedMetrics>,
    reporting_state: Arc<ReportingState>,

    comm: AsyncMutex<Option<Comm>>,
    current_token: AsyncMutex<String>,
    rpc_addr: String,
    rpc_secure: bool,
    extra_headers: Vec<(String, String)>,

    snapshot_state: StreamState,
    diagnostics_state: StreamState,
    metrics_state: StreamState,

    metrics: ReporterMetrics,
}

impl Reporter {
    /// Builds every watcher group and shared piece of state, but starts
    /// nothing yet — call [`Reporter::start`] once construction succeeds.
    pub async fn new(
        client: Client,
        config: ReporterConfig,
        current_snapshot: Arc<CurrentSnapshot>,
        aggregated_metrics: Arc<AggregatedMetrics>,
        metrics_registry: &agent_ore::metrics::MetricsRegistry,
    ) -> anyhow::Result<Arc<Self>> {
        let scope = NamespaceScope::from_configured(&config.namespaces_to_watch);
        let core = CoreWatchers::new(client.clone(), &scope)?;
        let gateway_presence = GatewayPresence::new(client.clone(), &config.agent_namespace, &config.gateway_snapshot_url);
        let config_watchers = ConfigWatchers::new(
            client.clone(),
            &config.agent_namespace,
            config.config_resource_name.clone(),
            config.bootstrap_token_env.clone(),
        );
        let argo = ArgoLoop::new(client.clone());
        let (rpc_addr, rpc_secure) = parse_rpc_address(&config.rpc_connection_address);
        let extra_headers = config.rpc_intercept_header.clone().into_iter().collect();
        let metrics = ReporterMetrics::register(metrics_registry);
        let initial_min_report_period_secs = config.initial_min_report_period_secs;

        Ok(Arc::new(Reporter {
            client,
            scope,
            config,
            http: reqwest::Client::new(),
            core,
            fallback: AsyncMutex::new(None),
            gateway_presence,
            config_watchers,
            argo,
            current_snapshot,
            aggregated_metrics,
            reporting_state: Arc::new(ReportingState::with_initial_min_report_period(
                initial_min_report_period_secs,
            )),
            comm: AsyncMutex::new(None),
            current_token: AsyncMutex::new(String::new()),
            rpc_addr,
            rpc_secure,
            extra_headers,
            snapshot_state: StreamState::default(),
            diagnostics_state: StreamState::default(),
            metrics_state: StreamState::default(),
            metrics,
        }))
    }

    /// Starts every watcher, including the argo discovery loop, and
    /// performs the initial gateway-presence bootstrap: if the gateway is
    /// absent from the start, no presence edge will ever fire for it, so
    /// the fallback group has to be started explicitly here instead of
    /// waiting on [`Reporter::on_gateway_presence_changed`].
    pub async fn start(self: &Arc<Self>, cancel: CancellationToken) {
        self.core.start(cancel.clone());
        self.gateway_presence.start(cancel.clone());
        self.config_watchers.start(cancel.clone());

        let this = Arc::clone(self);
        agent_ore::task::spawn(
            || "reporter-argo-discovery",
            {
                let cancel = cancel.clone();
                async move { this.argo.run(cancel).await }
            },
        );

        // Let the initial list calls land before judging presence.
        tokio::time::sleep(Duration::from_millis(250)).await;
        self.gateway_presence.refresh();
        if !self.gateway_presence.is_present() {
            self.start_fallback().await;
        }
    }

    async fn start_fallback(self: &Arc<Self>) {
        let mut guard = self.fallback.lock().await;
        if guard.is_some() {
            return;
        }
        match FallbackWatchers::new(self.client.clone(), &self.scope).await {
            Ok(group) => {
                let cancel = CancellationToken::new();
                group.start(cancel.clone());
                *guard = Some(FallbackSlot { group, cancel });
                info!("gateway absent, started fallback watchers");
            }
            Err(err) => warn!(error = %err, "failed to start fallback watchers"),
        }
    }

    async fn stop_fallback(&self) {
        let mut guard = self.fallback.lock().await;
        if let Some(slot) = guard.take() {
            slot.cancel.cancel();
            slot.group.cancel();
            info!("gateway present, stopped fallback watchers");
        }
    }

    /// Runs until `cancel` fires: the 1-second ticker plus immediate
    /// reactions to config changes, gateway-presence edges, and inbound
    /// directives (§4.10 inputs).
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        let config_notify = self.config_watchers.notify();
        let presence_notify = self.gateway_presence.notify();
        let mut directive_stream: Option<DirectiveStream> = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(new_stream) = self.tick().await {
                        directive_stream = Some(new_stream);
                    }
                }
                _ = config_notify.notified() => {
                    // Nothing to do immediately; resolve_token() is read
                    // fresh on the next tick's ensure_comm() call.
                }
                _ = presence_notify.notified() => {
                    match self.gateway_presence.refresh() {
                        PresenceEdge::BecameAbsent => self.start_fallback().await,
                        PresenceEdge::BecamePresent => self.stop_fallback().await,
                        PresenceEdge::Unchanged => {}
                    }
                }
                directive = recv_directive(&mut directive_stream) => {
                    match directive {
                        Some(directive) => {
                            let comm = self.comm.lock().await.clone();
                            if let Some(comm) = comm {
                                handle_directive(directive, &self.reporting_state, self.client.clone(), &comm).await;
                            }
                        }
                        None => directive_stream = None,
                    }
                }
                _ = cancel.cancelled() => {
                    self.shutdown().await;
                    return;
                }
            }
        }
    }

    async fn shutdown(&self) {
        self.core.cancel();
        self.gateway_presence.cancel();
        self.config_watchers.cancel();
        self.stop_fallback().await;
        *self.comm.lock().await = None;
    }

    /// Per-tick algorithm (§4.10): ensure the connection, then dispatch
    /// whichever of the three streams are due.
    async fn tick(self: &Arc<Self>) -> Option<DirectiveStream> {
        let new_directives = self.ensure_comm().await;

        let local_snapshot = self.local_kubernetes_snapshot().await;
        self.current_snapshot.set(local_snapshot.clone());

        let comm = self.comm.lock().await.clone();
        let Some(comm) = comm else {
            return new_directives;
        };

        if !self.reporting_state.is_reporting_stopped() && !self.snapshot_state.is_in_flight() {
            self.dispatch_snapshot(&comm, local_snapshot.clone()).await;
        }

        let gateway_present = self.gateway_presence.is_present();

        if gateway_present && self.config.report_diagnostics_to_cloud && !self.diagnostics_state.is_in_flight() {
            self.dispatch_diagnostics(&comm).await;
        }

        if gateway_present && !self.metrics_state.is_in_flight() {
            self.dispatch_metrics(&comm).await;
        }

        new_directives
    }

    /// Assembles a snapshot report and, only once assembly has actually
    /// produced one, claims the stream and hands the send (plus its quiet
    /// window) off to a detached task. A failed assembly never claims the
    /// stream, so it's retried on the very next tick rather than waiting out
    /// a full `MinReportPeriod` (§4.10 step 4).
    async fn dispatch_snapshot(self: &Arc<Self>, comm: &Comm, local: agent_core::KubernetesSnapshot) {
        let started = std::time::Instant::now();
        let gateway_present = self.gateway_presence.is_present();
        let inputs = AssemblyInputs {
            gateway_present,
            gateway_snapshot_url: &self.config.gateway_snapshot_url,
            ambassador_id: &self.config.ambassador_id,
            synthesized_cluster_id: &self.config.synthesized_cluster_id,
            core: Some(local.clone()),
            fallback: None,
            argo_rollouts: local.argo_rollouts.clone(),
            argo_applications: local.argo_applications.clone(),
            api_docs: Vec::new(),
        };
        let report = match assemble_snapshot(&self.http, inputs).await {
            Ok(report) => report,
            Err(err) => {
                warn!(error = %err, "failed to assemble snapshot");
                self.metrics.observe(STREAM_SNAPSHOT, "assembly_error", started.elapsed());
                return;
            }
        };

        if !self.snapshot_state.try_begin() {
            return;
        }
        let this = Arc::clone(self);
        let comm = comm.clone();
        agent_ore::task::spawn(|| "reporter-send-snapshot", async move {
            let outcome = match comm.send_snapshot(report) {
                Ok(()) => "ok",
                Err(err) => {
                    warn!(error = %err, "failed to send snapshot to director");
                    "send_error"
                }
            };
            this.metrics.observe(STREAM_SNAPSHOT, outcome, started.elapsed());
            tokio::time::sleep(this.reporting_state.min_report_period()).await;
            this.snapshot_state.finish();
        });
    }

    /// Same shape as [`Self::dispatch_snapshot`]: assemble first, only claim
    /// the stream and spawn the send once assembly actually succeeded.
    async fn dispatch_diagnostics(self: &Arc<Self>, comm: &Comm) {
        let started = std::time::Instant::now();
        let report = match assemble_diagnostics(&self.http, &self.config.gateway_diagnostics_url).await {
            Ok(report) => report,
            Err(err) => {
                warn!(error = %err, "failed to assemble diagnostics");
                self.metrics.observe(STREAM_DIAGNOSTICS, "assembly_error", started.elapsed());
                return;
            }
        };

        if !self.diagnostics_state.try_begin() {
            return;
        }
        let this = Arc::clone(self);
        let comm = comm.clone();
        agent_ore::task::spawn(|| "reporter-send-diagnostics", async move {
            let outcome = match comm.send_diagnostics(report) {
                Ok(()) => "ok",
                Err(err) => {
                    warn!(error = %err, "failed to send diagnostics to director");
                    "send_error"
                }
            };
            this.metrics.observe(STREAM_DIAGNOSTICS, outcome, started.elapsed());
            tokio::time::sleep(this.reporting_state.min_report_period()).await;
            this.diagnostics_state.finish();
        });
    }

    /// Same shape again: draining the aggregated metrics can't fail the way
    /// a fetch can, but an empty drain is equally not worth claiming the
    /// stream or waiting out a quiet window for.
    async fn dispatch_metrics(self: &Arc<Self>, comm: &Comm) {
        let started = std::time::Instant::now();
        let drained = self.aggregated_metrics.drain();
        if drained.is_empty() {
            self.metrics.observe(STREAM_METRICS, "empty", started.elapsed());
            return;
        }

        if !self.metrics_state.try_begin() {
            return;
        }
        let this = Arc::clone(self);
        let comm = comm.clone();
        agent_ore::task::spawn(|| "reporter-send-metrics", async move {
            let outcome = match comm.send_metrics(drained) {
                Ok(()) => "ok",
                Err(err) => {
                    warn!(error = %err, "failed to send metrics to director");
                    "send_error"
                }
            };
            this.metrics.observe(STREAM_METRICS, outcome, started.elapsed());
            tokio::time::sleep(this.reporting_state.min_report_period()).await;
            this.metrics_state.finish();
        });
    }

    /// Opens, reopens on a token change, or tears down the remote channel
    /// to match the token's current value (I4, §4.10's connection state
    /// table). Returns a new [`DirectiveStream`] whenever a (re)connect
    /// actually happened.
    async fn ensure_comm(&self) -> Option<DirectiveStream> {
        let token = self.config_watchers.resolve_token();
        let mut current = self.current_token.lock().await;
        let mut comm_guard = self.comm.lock().await;

        if token.is_empty() {
            if comm_guard.is_some() {
                *comm_guard = None;
                current.clear();
                info!("effective token is empty, closed connection to director");
            }
            return None;
        }

        if comm_guard.is_some() && *current == token {
            return None;
        }

        *comm_guard = None;
        match Comm::connect(&self.rpc_addr, self.rpc_secure, &token, &self.extra_headers).await {
            Ok((comm, directives)) => {
                *comm_guard = Some(comm);
                *current = token;
                info!(addr = %self.rpc_addr, "connected to director");
                Some(directives)
            }
            Err(err) => {
                warn!(error = %err, "failed to connect to director, retrying next tick");
                None
            }
        }
    }

    /// The watcher-derived view of the cluster this replica currently
    /// sees: core resources always, fallback resources merged in only
    /// while the gateway is absent, argo state from the discovery loop's
    /// cache.
    async fn local_kubernetes_snapshot(&self) -> agent_core::KubernetesSnapshot {
        let mut snapshot = self.core.snapshot();
        if let Some(slot) = self.fallback.lock().await.as_ref() {
            snapshot = snapshot.merge(slot.group.snapshot());
        }
        self.argo.refresh();
        snapshot.argo_rollouts = self.argo.rollouts_state();
        snapshot.argo_applications = self.argo.applications_state();
        snapshot
    }
}

async fn recv_directive(stream: &mut Option<DirectiveStream>) -> Option<agent_core::Directive> {
    match stream {
        Some(stream) => stream.recv().await,
        None => std::future::pending().await,
    }
}
