use std::{net::SocketAddr, sync::Arc};

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod analyzer;
pub mod config;
pub mod decision;
pub mod inbound;
pub mod orchestrator;
pub mod outbound;
pub mod routing;
pub mod security;
pub mod store;
pub mod transform;

pub use config::{Environment, GatewayConfig};

use crate::{
    analyzer::{Analyzer, LlmAnalyzer, MockAnalyzer},
    inbound::{smtp::SmtpServer, webhook::WebhookServer},
    orchestrator::Orchestrator,
    outbound::{ApiSender, DryRunSender, OutboundSender, SmtpSender},
    routing::{InMemoryShieldDirectory, ShieldRouter},
    security::SignatureValidator,
    store::{EphemeralStore, Reaper},
};

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("{}=trace,tower_http=debug,axum=trace,info", env!("CARGO_CRATE_NAME")).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

fn build_analyzer(config: &GatewayConfig) -> Arc<dyn Analyzer> {
    match (&config.analyzer_endpoint, &config.analyzer_api_key) {
        (Some(endpoint), Some(api_key)) => match LlmAnalyzer::new(endpoint.clone(), api_key.clone()) {
            Ok(analyzer) => Arc::new(analyzer),
            Err(e) => {
                tracing::warn!(error = %e, "failed to build LLM analyzer, falling back to the mock analyzer");
                Arc::new(MockAnalyzer::new())
            }
        },
        _ => {
            tracing::warn!("no analyzer endpoint configured, using the deterministic mock analyzer");
            Arc::new(MockAnalyzer::new())
        }
    }
}

fn build_sender(config: &GatewayConfig) -> Arc<dyn OutboundSender> {
    if config.dry_run {
        return Arc::new(DryRunSender);
    }

    let outbound = &config.outbound;
    if let (Some(endpoint), Some(api_key)) = (&outbound.api_endpoint, &outbound.api_key) {
        match ApiSender::new(endpoint.clone(), api_key.clone()) {
            Ok(sender) => return Arc::new(sender),
            Err(e) => tracing::error!(error = %e, "failed to build the outbound API sender"),
        }
    }

    if let (Some(host), Some(port), Some(username), Some(password)) = (
        &outbound.smtp_host,
        outbound.smtp_port,
        &outbound.smtp_username,
        &outbound.smtp_password,
    ) {
        return Arc::new(SmtpSender::new(host.clone(), port, username.clone(), password.clone()));
    }

    tracing::warn!("no outbound provider configured, falling back to dry-run delivery");
    Arc::new(DryRunSender)
}

/// Wires up the ephemeral store, its reaper, and the orchestrator from a
/// validated [`GatewayConfig`]. The shield directory is the in-memory
/// default described on [`routing::ShieldRouter`]; wiring a real
/// user-management backend is the integration point a deployment overrides.
pub fn build_gateway(
    config: Arc<GatewayConfig>,
    shutdown: CancellationToken,
) -> (Arc<Orchestrator<InMemoryShieldDirectory>>, Reaper) {
    let store = Arc::new(EphemeralStore::new(
        config.ephemeral_capacity,
        std::time::Duration::from_secs(config.reaper_hard_ceiling_grace_seconds),
    ));
    let router = Arc::new(ShieldRouter::new(InMemoryShieldDirectory::new(), config.service_domains.clone()));
    let analyzer = build_analyzer(&config);
    let sender = build_sender(&config);

    let reaper = Reaper::new(
        Arc::clone(&store),
        config.reaper_interval(),
        shutdown.clone(),
    );

    let orchestrator = Orchestrator::new(store, router, analyzer, sender, config, shutdown);

    (orchestrator, reaper)
}

pub fn build_signature_validator(config: &GatewayConfig) -> Arc<SignatureValidator> {
    Arc::new(SignatureValidator::new(
        &config.webhook_signing_secret,
        config.webhook_signature_max_age_seconds,
        config.webhook_max_body_bytes,
        config.webhook_replay_cache_size,
    ))
}

pub fn run_webhook_server(
    socket: SocketAddr,
    orchestrator: Arc<Orchestrator<InMemoryShieldDirectory>>,
    validator: Arc<SignatureValidator>,
    shutdown: CancellationToken,
) {
    WebhookServer::new(socket, orchestrator, validator, shutdown).spawn();
}

pub fn run_smtp_listener(
    socket: SocketAddr,
    server_name: String,
    orchestrator: Arc<Orchestrator<InMemoryShieldDirectory>>,
    shutdown: CancellationToken,
) {
    SmtpServer::new(socket, server_name, orchestrator, shutdown).spawn();
}

/// Waits for either a ctrl-c or SIGTERM, then cancels `token`. After
/// cancellation, callers are expected to wait up to
/// `shutdown_drain_seconds` for [`Orchestrator::in_flight`] to reach zero
/// before exiting the process.
pub async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = token.cancelled() => {},
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    token.cancel();
}

/// Polls [`Orchestrator::in_flight`] until it reaches zero or `drain`
/// elapses, giving in-progress messages a chance to finish delivery before
/// the process exits.
pub async fn drain(orchestrator: &Orchestrator<InMemoryShieldDirectory>, drain: std::time::Duration) {
    let deadline = tokio::time::Instant::now() + drain;
    while orchestrator.in_flight() > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }
    if orchestrator.in_flight() > 0 {
        tracing::warn!(in_flight = orchestrator.in_flight(), "shutdown drain deadline reached, abandoning remaining messages");
    }
}
