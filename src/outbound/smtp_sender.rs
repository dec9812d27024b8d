use async_trait::async_trait;
use mail_builder::MessageBuilder;
use mail_send::SmtpClientBuilder;
use tracing::warn;

use crate::{
    outbound::{OutboundSender, SendOutcome},
    transform::OutboundMessage,
};

/// Outbound submission provider. Maps 2xx -> Delivered, 4xx -> Transient,
/// 5xx -> Permanent. TLS is required (`implicit_tls`/STARTTLS handled by
/// `mail-send` internally); the envelope `MAIL FROM` is the service's
/// sending identity, `RCPT TO` is the user's real delivery address.
pub struct SmtpSender {
    host: String,
    port: u16,
    username: String,
    password: String,
}

impl SmtpSender {
    pub fn new(host: String, port: u16, username: String, password: String) -> Self {
        Self {
            host,
            port,
            username,
            password,
        }
    }
}

#[async_trait]
impl OutboundSender for SmtpSender {
    async fn send(&self, message: &OutboundMessage) -> SendOutcome {
        let mut builder = MessageBuilder::new()
            .from(message.from.as_str())
            .to(vec![message.to.as_str()])
            .subject(message.subject.as_str())
            .text_body(message.text_body.as_str());

        if let Some(html) = &message.html_body {
            builder = builder.html_body(html.as_str());
        }
        for (name, value) in &message.headers {
            builder = builder.header(name.as_str(), mail_builder::headers::raw::Raw::new(value.clone()));
        }

        let client = SmtpClientBuilder::new(self.host.as_str(), self.port)
            .implicit_tls(false)
            .credentials((self.username.as_str(), self.password.as_str()))
            .connect()
            .await;

        let mut client = match client {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "failed to connect to outbound SMTP submission host");
                return SendOutcome::TransientFailure(e.to_string());
            }
        };

        match client.send(builder).await {
            Ok(()) => SendOutcome::Delivered,
            Err(mail_send::Error::UnexpectedReply(reply)) => {
                if reply.code() >= 500 {
                    SendOutcome::PermanentFailure(reply.to_string())
                } else {
                    SendOutcome::TransientFailure(reply.to_string())
                }
            }
            Err(e) => SendOutcome::TransientFailure(e.to_string()),
        }
    }
}
