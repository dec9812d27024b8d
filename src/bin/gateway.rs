use std::{net::SocketAddr, sync::Arc};

use cellophane_gateway::{build_gateway, build_signature_validator, drain, init_tracing, run_smtp_listener, run_webhook_server, shutdown_signal, GatewayConfig};
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
    let webhook_socket: SocketAddr = "0.0.0.0:8080".parse()?;
    run_webhook_server(webhook_socket, Arc::clone(&orchestrator), validator, shutdown.clone());

    let smtp_socket: SocketAddr = "127.0.0.1:2525".parse()?;
    run_smtp_listener(smtp_socket, "gateway.localhost".to_owned(), Arc::clone(&orchestrator), shutdown.clone());

    info!("cellophane gateway started");
    shutdown_signal(shutdown.clone()).await;

    info!("draining in-flight messages");
    drain(&orchestrator, config.shutdown_drain()).await;

    Ok(())
}
