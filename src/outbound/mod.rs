mod api_sender;
mod smtp_sender;

pub use api_sender::ApiSender;
pub use smtp_sender::SmtpSender;

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, warn};

use crate::transform::OutboundMessage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    TransientFailure(String),
    PermanentFailure(String),
}

/// Common contract for outbound delivery providers (API / SMTP). Each
/// attempt carries its own `send_timeout` ceiling; the retry budget
/// (`retry_with_backoff`) bounds the total time a single message may spend
/// being sent.
#[async_trait]
pub trait OutboundSender: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> SendOutcome;
}

/// Wraps any [`OutboundSender`] in dry-run mode: no network I/O, logs a
/// structured record, and always reports `Delivered`. This is the
/// mechanism that guarantees tests and non-production deployments never
/// consume real provider quota.
pub struct DryRunSender;

#[async_trait]
impl OutboundSender for DryRunSender {
    async fn send(&self, message: &OutboundMessage) -> SendOutcome {
        debug!(
            to = %message.to,
            from = %message.from,
            subject = %message.subject,
            "dry-run: simulated delivery, no network I/O performed"
        );
        SendOutcome::Delivered
    }
}

/// Retries a [`SendOutcome::TransientFailure`] with exponential backoff
/// (base 1s, factor 2, jitter +-20%) up to `max_attempts`. Permanent
/// failures are not retried. Each attempt runs under `send_timeout`; if the
/// sender call itself doesn't return in time it is treated as a transient
/// failure so the retry loop still applies.
pub async fn retry_with_backoff(
    sender: &dyn OutboundSender,
    message: &OutboundMessage,
    max_attempts: u32,
    send_timeout: Duration,
    cancelled: impl Fn() -> bool,
) -> SendOutcome {
    let mut attempt = 0;
    let mut delay = Duration::from_secs(1);

    loop {
        attempt += 1;

        if cancelled() {
            return SendOutcome::PermanentFailure("cancelled".to_owned());
        }

        let outcome = match tokio::time::timeout(send_timeout, sender.send(message)).await {
            Ok(outcome) => outcome,
            Err(_) => SendOutcome::TransientFailure("send attempt timed out".to_owned()),
        };

        match &outcome {
            SendOutcome::Delivered | SendOutcome::PermanentFailure(_) => return outcome,
            SendOutcome::TransientFailure(reason) => {
                if attempt >= max_attempts {
                    warn!(attempt, reason, "outbound send exhausted retry budget");
                    return outcome;
                }
                let jitter = rand::rng().random_range(-0.2..=0.2);
                let jittered = delay.mul_f64(1.0 + jitter);
                debug!(attempt, reason, delay_ms = jittered.as_millis() as u64, "retrying outbound send");
                tokio::time::sleep(jittered).await;
                delay *= 2;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakySender {
        fail_times: u32,
        attempts: AtomicU32,
    }

    #[async_trait]
    impl OutboundSender for FlakySender {
        async fn send(&self, _message: &OutboundMessage) -> SendOutcome {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                SendOutcome::TransientFailure("temporary".to_owned())
            } else {
                SendOutcome::Delivered
            }
        }
    }

    fn message() -> OutboundMessage {
        OutboundMessage {
            to: "bob@real.example".into(),
            from: "gateway@shield.tld".into(),
            subject: "s".into(),
            text_body: "b".into(),
            html_body: None,
            headers: Default::default(),
        }
    }

    #[tokio::test]
    async fn dry_run_never_fails() {
        let outcome = DryRunSender.send(&message()).await;
        assert_eq!(outcome, SendOutcome::Delivered);
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let sender = FlakySender {
            fail_times: 2,
            attempts: AtomicU32::new(0),
        };
        let outcome = retry_with_backoff(&sender, &message(), 3, Duration::from_secs(5), || false).await;
        assert_eq!(outcome, SendOutcome::Delivered);
    }

    #[tokio::test]
    async fn exhausts_budget_and_reports_failure() {
        let sender = FlakySender {
            fail_times: 10,
            attempts: AtomicU32::new(0),
        };
        let outcome = retry_with_backoff(&sender, &message(), 3, Duration::from_secs(5), || false).await;
        assert!(matches!(outcome, SendOutcome::TransientFailure(_)));
    }
}
