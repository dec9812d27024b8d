use std::{io, net::SocketAddr, sync::Arc};

use thiserror::Error;
use tokio::{net::TcpListener, select};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace};

use crate::{inbound::smtp::connection, orchestrator::Orchestrator, routing::ShieldDirectory};

#[derive(Debug, Error)]
pub enum SmtpServerError {
    #[error("failed to listen on address: {0}")]
    Listen(io::Error),
}

/// Inbound email provider whose transport is raw SMTP. Bound to localhost
/// behind a trusted relay (no AUTH, no TLS): see [`super::session::SmtpSession`]
/// for the rationale.
pub struct SmtpServer<D: ShieldDirectory> {
    listen_addr: SocketAddr,
    server_name: String,
    orchestrator: Arc<Orchestrator<D>>,
    shutdown: CancellationToken,
}

impl<D: ShieldDirectory + 'static> SmtpServer<D> {
    pub fn new(
        listen_addr: SocketAddr,
        server_name: String,
        orchestrator: Arc<Orchestrator<D>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            listen_addr,
            server_name,
            orchestrator,
            shutdown,
        }
    }

    pub async fn serve(self) -> Result<(), SmtpServerError> {
        let listener = TcpListener::bind(self.listen_addr).await.map_err(SmtpServerError::Listen)?;

        info!("smtp server on {}", self.listen_addr);

        loop {
            select! {
                _ = self.shutdown.cancelled() => {
                    info!("shutting down smtp server");
                    return Ok(());
                }
                result = listener.accept() => match result {
                    Ok((mut stream, peer_addr)) => {
                        trace!(source_ip = %peer_addr.ip(), source_port = peer_addr.port(), "new TCP connection");

                        let server_name = self.server_name.clone();
                        let orchestrator = Arc::clone(&self.orchestrator);

                        tokio::spawn(async move {
                            if let Err(e) = connection::handle(&mut stream, &server_name, peer_addr, orchestrator).await {
                                error!("failed to handle connection: {e}");
                            }
                        });
                    }
                    Err(e) => {
                        error!("failed to accept connection: {e}");
                    }
                },
            }
        }
    }

    pub fn spawn(self) {
        tokio::spawn(async {
            if let Err(e) = self.serve().await {
                error!("smtp server error: {:?}", e);
            }
        });
    }
}
