use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::{
    inbound::AcceptOutcome,
    orchestrator::{InboundMessage, Orchestrator},
    routing::ShieldDirectory,
    security::SignatureValidator,
};

#[derive(Debug, Error)]
pub enum WebhookServerError {
    #[error("failed to bind to address: {0}")]
    Bind(std::io::Error),
    #[error("server error: {0}")]
    Serve(std::io::Error),
}

struct WebhookState<D: ShieldDirectory> {
    orchestrator: Arc<Orchestrator<D>>,
    validator: Arc<SignatureValidator>,
}

impl<D: ShieldDirectory> Clone for WebhookState<D> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: Arc::clone(&self.orchestrator),
            validator: Arc::clone(&self.validator),
        }
    }
}

/// Inbound email provider whose transport is an HTTP webhook. Exposes
/// `POST /webhooks/inbound` (signed, see [`SignatureValidator`]) and
/// `GET /healthy` (no signature required, rate-limit exempt same as the
/// webhook route itself per the configuration table).
pub struct WebhookServer<D: ShieldDirectory + 'static> {
    router: Router,
    socket: SocketAddr,
    shutdown: CancellationToken,
    _marker: std::marker::PhantomData<D>,
}

impl<D: ShieldDirectory + 'static> WebhookServer<D> {
    pub fn new(
        socket: SocketAddr,
        orchestrator: Arc<Orchestrator<D>>,
        validator: Arc<SignatureValidator>,
        shutdown: CancellationToken,
    ) -> Self {
        let state = WebhookState { orchestrator, validator };

        let router = Router::new()
            .route("/healthy", get(healthy))
            .route("/webhooks/inbound", post(receive_inbound::<D>))
            .layer((TraceLayer::new_for_http(), TimeoutLayer::new(Duration::from_secs(30))))
            .with_state(state);

        Self {
            router,
            socket,
            shutdown,
            _marker: std::marker::PhantomData,
        }
    }

    pub async fn serve(self) -> Result<(), WebhookServerError> {
        let listener = TcpListener::bind(self.socket).await.map_err(WebhookServerError::Bind)?;

        info!("webhook server listening on {}", self.socket);

        axum::serve(listener, self.router.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(wait_for_shutdown(self.shutdown))
            .await
            .map_err(WebhookServerError::Serve)
    }

    pub fn spawn(self) {
        tokio::spawn(async {
            let token = self.shutdown.clone();
            if let Err(e) = self.serve().await {
                error!("webhook server error: {:?}", e);
                token.cancel();
            }
        });
    }
}

async fn wait_for_shutdown(token: CancellationToken) {
    token.cancelled().await;
}

#[derive(Debug, Serialize)]
struct HealthyResponse {
    healthy: bool,
}

async fn healthy() -> Json<HealthyResponse> {
    Json(HealthyResponse { healthy: true })
}

/// Inbound email provider's normalized payload. Mirrors the fields that
/// matter to the core, leaving provider-specific envelope metadata (return
/// path, SPF/DKIM verdicts, attachment blobs) for a future provider adapter
/// to translate before it ever reaches this handler.
#[derive(Debug, Deserialize)]
struct InboundWebhookPayload {
    to: String,
    from: String,
    subject: String,
    text_body: String,
    html_body: Option<String>,
    #[serde(default)]
    headers: HashMap<String, String>,
}

const SIGNATURE_HEADER: &str = "x-gateway-signature";

async fn receive_inbound<D: ShieldDirectory + 'static>(
    State(state): State<WebhookState<D>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature_header = match headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) {
        Some(value) => value,
        None => return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "missing signature" }))).into_response(),
    };

    let now = chrono::Utc::now().timestamp();
    if let Err(e) = state.validator.validate(&body, signature_header, now) {
        warn!(error = %e, "webhook signature rejected");
        let status = if matches!(e, crate::security::SignatureError::TooLarge) {
            StatusCode::PAYLOAD_TOO_LARGE
        } else {
            StatusCode::UNAUTHORIZED
        };
        return (status, Json(json!({ "error": e.to_string() }))).into_response();
    }

    let payload: InboundWebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "malformed webhook payload");
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": "malformed payload" }))).into_response();
        }
    };

    let message = InboundMessage {
        recipient: payload.to,
        from_address: payload.from,
        subject: payload.subject,
        text_body: payload.text_body,
        html_body: payload.html_body,
        headers: payload.headers,
    };

    match AcceptOutcome::from(state.orchestrator.accept(message).await) {
        AcceptOutcome::Accepted(message_id) => {
            (StatusCode::ACCEPTED, Json(json!({ "message_id": message_id }))).into_response()
        }
        AcceptOutcome::Duplicate => {
            (StatusCode::OK, Json(json!({ "status": "already accepted" }))).into_response()
        }
        AcceptOutcome::MalformedRecipient => {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": "malformed recipient address" }))).into_response()
        }
        AcceptOutcome::UnknownRecipient => {
            (StatusCode::NOT_FOUND, Json(json!({ "error": "unknown recipient" }))).into_response()
        }
        AcceptOutcome::Overloaded => (
            StatusCode::SERVICE_UNAVAILABLE,
            [("retry-after", "5")],
            Json(json!({ "error": "gateway at capacity" })),
        )
            .into_response(),
        AcceptOutcome::Transient => {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "temporary failure" }))).into_response()
        }
    }
}
