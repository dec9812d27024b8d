use std::{net::SocketAddr, sync::Arc};

use cellophane_gateway::{build_gateway, build_signature_validator, drain, init_tracing, run_webhook_server, shutdown_signal, GatewayConfig};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Arc::new(GatewayConfig::from_env()?);
    let shutdown = CancellationToken::new();

    let (orchestrator, reaper) = build_gateway(Arc::clone(&config), shutdown.clone());
    reaper.spawn();

    let validator = build_signature_validator(&config);
    let socket: SocketAddr = "0.0.0.0:8080".parse()?;
    run_webhook_server(socket, Arc::clone(&orchestrator), validator, shutdown.clone());

    info!("webhook-only gateway process started");
    shutdown_signal(shutdown.clone()).await;

    info!("draining in-flight messages");
    drain(&orchestrator, config.shutdown_drain()).await;

    Ok(())
}
