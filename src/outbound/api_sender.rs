use async_trait::async_trait;
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use tracing::warn;

use crate::{
    outbound::{OutboundSender, SendOutcome},
    transform::OutboundMessage,
};

/// HTTP-based transactional mail API provider. Maps 2xx -> Delivered,
/// 429/5xx -> Transient, other 4xx -> Permanent.
pub struct ApiSender {
    client: reqwest::Client,
    endpoint: String,
}

impl ApiSender {
    pub fn new(endpoint: String, api_key: String) -> Result<Self, reqwest::Error> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(AUTHORIZATION, format!("Bearer {api_key}").parse().unwrap());
        headers.insert(CONTENT_TYPE, "application/json".parse().unwrap());
        headers.insert(ACCEPT, "application/json".parse().unwrap());

        let client = reqwest::Client::builder().default_headers(headers).build()?;

        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl OutboundSender for ApiSender {
    async fn send(&self, message: &OutboundMessage) -> SendOutcome {
        let response = match self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({
                "to": message.to,
                "from": message.from,
                "subject": message.subject,
                "text_body": message.text_body,
                "html_body": message.html_body,
                "headers": message.headers,
                "idempotency_key": message.headers.get("Message-Id"),
            }))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "outbound API request failed");
                return SendOutcome::TransientFailure(e.to_string());
            }
        };

        let status = response.status();
        if status.is_success() {
            SendOutcome::Delivered
        } else if status.as_u16() == 429 || status.is_server_error() {
            SendOutcome::TransientFailure(format!("status {status}"))
        } else {
            SendOutcome::PermanentFailure(format!("status {status}"))
        }
    }
}
