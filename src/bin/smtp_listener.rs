use std::{net::SocketAddr, sync::Arc};

use cellophane_gateway::{build_gateway, drain, init_tracing, run_smtp_listener, shutdown_signal, GatewayConfig};
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

    let socket: SocketAddr = "127.0.0.1:2525".parse()?;
    run_smtp_listener(socket, "gateway.localhost".to_owned(), Arc::clone(&orchestrator), shutdown.clone());

    info!("smtp-only gateway process started");
    shutdown_signal(shutdown.clone()).await;

    info!("draining in-flight messages");
    drain(&orchestrator, config.shutdown_drain()).await;

    Ok(())
}
