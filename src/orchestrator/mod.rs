use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use thiserror::Error;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    analyzer::Analyzer,
    config::GatewayConfig,
    decision::{decide, decide_analysis_unavailable, Action, DecisionPolicy},
    outbound::{retry_with_backoff, OutboundSender, SendOutcome},
    routing::{RoutingContext, RoutingError, ShieldDirectory, ShieldRouter},
    store::{EphemeralEmail, EphemeralStore, MessageState, StoreError},
    transform::{to_outbound_message, transform, TransformOutcome},
};

#[derive(Debug, Error)]
pub enum AcceptError {
    #[error(transparent)]
    Routing(#[from] RoutingError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Normalized inbound message, already stripped of provider-specific framing
/// (webhook JSON envelope or raw SMTP `DATA`) by whichever [`InboundProvider`]
/// received it. The orchestrator is the first stage that is provider-agnostic.
///
/// [`InboundProvider`]: crate::inbound::InboundProvider
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub recipient: String,
    pub from_address: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: Option<String>,
    pub headers: HashMap<String, String>,
}

impl InboundMessage {
    fn message_id(&self) -> String {
        self.headers
            .get("Message-Id")
            .cloned()
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    }
}

/// Coordinates the full accept -> store -> analyze -> decide -> transform ->
/// deliver -> evict pipeline (see the module-level state machine in
/// [`crate::store::MessageState`]). `accept` does only the synchronous part
/// (routing + admission) and returns as soon as the message is durably held
/// in the [`EphemeralStore`]; everything after that runs in a detached task
/// so a slow analyzer call never blocks the inbound provider.
pub struct Orchestrator<D: ShieldDirectory> {
    store: Arc<EphemeralStore>,
    router: Arc<ShieldRouter<D>>,
    analyzer: Arc<dyn Analyzer>,
    sender: Arc<dyn OutboundSender>,
    policy: DecisionPolicy,
    config: Arc<GatewayConfig>,
    cancellation: CancellationToken,
    in_flight: Arc<AtomicU64>,
}

impl<D: ShieldDirectory + 'static> Orchestrator<D> {
    pub fn new(
        store: Arc<EphemeralStore>,
        router: Arc<ShieldRouter<D>>,
        analyzer: Arc<dyn Analyzer>,
        sender: Arc<dyn OutboundSender>,
        config: Arc<GatewayConfig>,
        cancellation: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            router,
            analyzer,
            sender,
            policy: DecisionPolicy::default(),
            config,
            cancellation,
            in_flight: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Number of messages currently past admission and not yet `Completed`
    /// or `Failed`. Used by the shutdown drain loop.
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Exposed so inbound providers (the SMTP session) can validate a
    /// recipient address at `RCPT TO` time, ahead of and independent from
    /// the re-resolution `accept` performs when the message is admitted.
    pub fn router(&self) -> &Arc<ShieldRouter<D>> {
        &self.router
    }

    /// Resolves the recipient, admits the message into the ephemeral store
    /// and spawns the background pipeline. Returns the `message_id`
    /// immediately so the inbound provider can acknowledge the transport
    /// (webhook `200`, SMTP `250`) without waiting on analysis.
    pub async fn accept(self: &Arc<Self>, inbound: InboundMessage) -> Result<String, AcceptError> {
        let ctx = self.router.resolve(&inbound.recipient).await?;
        let message_id = inbound.message_id();

        let email = EphemeralEmail::new(
            message_id.clone(),
            format!("{}@{}", ctx.shield_prefix, self.config.service_domains[0]),
            inbound.from_address.clone(),
            inbound.subject.clone(),
            inbound.text_body.clone(),
            inbound.html_body.clone(),
            inbound.headers.clone(),
            chrono::Utc::now(),
            self.config.ephemeral_ttl(),
        );
        self.store.put(email)?;

        info!(message_id = %message_id, user_id = %ctx.user_id, "message admitted");

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let this = Arc::clone(self);
        let id_for_task = message_id.clone();
        tokio::spawn(async move {
            this.process(id_for_task, ctx).await;
            this.in_flight.fetch_sub(1, Ordering::SeqCst);
        });

        Ok(message_id)
    }

    /// Runs the analyze -> decide -> transform -> deliver -> evict stages for
    /// one admitted message. Checks [`CancellationToken`] state at each
    /// suspension point (before the analyzer call and before each send
    /// attempt) so a shutdown in progress abandons rather than half-finishes
    /// work past the drain deadline.
    pub(crate) async fn process(&self, message_id: String, ctx: RoutingContext) {
        if let Err(e) = self.store.claim(&message_id) {
            warn!(message_id = %message_id, error = %e, "could not claim message for processing");
            return;
        }

        let email = match self.store.get(&message_id) {
            Ok(email) => email,
            Err(e) => {
                warn!(message_id = %message_id, error = %e, "message vanished before processing");
                return;
            }
        };

        if self.cancellation.is_cancelled() {
            debug!(message_id = %message_id, "shutdown in progress, abandoning before analysis");
            let _ = self.store.evict(&message_id);
            return;
        }

        let decision = match timeout(
            self.config.analyzer_timeout(),
            self.analyzer.analyze(&email.text_body, &email.from_address),
        )
        .await
        {
            Ok(Ok(result)) => decide(result, &self.policy),
            Ok(Err(e)) => {
                warn!(message_id = %message_id, error = %e, "analyzer returned an error, failing open");
                decide_analysis_unavailable()
            }
            Err(_) => {
                warn!(message_id = %message_id, "analyzer call timed out, failing open");
                decide_analysis_unavailable()
            }
        };

        if matches!(decision.action, Action::BlockEntirely) {
            info!(
                message_id = %message_id,
                rationale = %decision.rationale,
                notify_on_block = self.config.notify_on_block,
                "message blocked entirely, body not logged"
            );
        } else {
            debug!(message_id = %message_id, action = ?decision.action, rationale = %decision.rationale, "decision made");
        }

        let outcome = transform(&email, &decision);

        let final_state = match outcome {
            TransformOutcome::Drop => MessageState::Completed,
            TransformOutcome::Deliver(data) => {
                if let Err(e) = self.store.update_state(&message_id, MessageState::Delivering) {
                    warn!(message_id = %message_id, error = %e, "could not transition to delivering");
                    return;
                }

                let from = format!("gateway@{}", self.config.outbound.sending_domain);
                let outbound_message = to_outbound_message(&email, *data, ctx.real_delivery_address.clone(), from);

                let send_outcome = retry_with_backoff(
                    self.sender.as_ref(),
                    &outbound_message,
                    self.config.outbound_retry_attempts,
                    self.config.outbound_send_timeout(),
                    || self.cancellation.is_cancelled(),
                )
                .await;

                match send_outcome {
                    SendOutcome::Delivered => MessageState::Completed,
                    SendOutcome::TransientFailure(reason) | SendOutcome::PermanentFailure(reason) => {
                        warn!(message_id = %message_id, reason, "delivery failed");
                        MessageState::Failed
                    }
                }
            }
        };

        if let Err(e) = self.store.update_state(&message_id, final_state) {
            warn!(message_id = %message_id, error = %e, "could not transition to final state");
        }
        if let Err(e) = self.store.evict(&message_id) {
            warn!(message_id = %message_id, error = %e, "could not evict completed message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analyzer::MockAnalyzer,
        outbound::DryRunSender,
        routing::{InMemoryShieldDirectory, ShieldAddress, User},
    };
    use std::time::Duration;

    fn directory() -> InMemoryShieldDirectory {
        InMemoryShieldDirectory::new().with_shield(
            ShieldAddress {
                prefix: "bob1234".to_owned(),
                domain: "shield.tld".to_owned(),
                user_id: "u1".to_owned(),
                active: true,
            },
            User {
                user_id: "u1".to_owned(),
                real_delivery_address: "bob@real.example".to_owned(),
                active: true,
            },
        )
    }

    fn inbound(body: &str) -> InboundMessage {
        InboundMessage {
            recipient: "bob1234@shield.tld".to_owned(),
            from_address: "alice@ex.com".to_owned(),
            subject: "Hello".to_owned(),
            text_body: body.to_owned(),
            html_body: None,
            headers: HashMap::new(),
        }
    }

    fn orchestrator(analyzer: MockAnalyzer) -> Arc<Orchestrator<InMemoryShieldDirectory>> {
        let store = Arc::new(EphemeralStore::new(10, Duration::from_secs(60)));
        let router = Arc::new(ShieldRouter::new(directory(), vec!["shield.tld".to_owned()]));
        Orchestrator::new(
            store,
            router,
            Arc::new(analyzer),
            Arc::new(DryRunSender),
            Arc::new(GatewayConfig::for_test()),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn accept_rejects_unknown_recipient() {
        let orchestrator = orchestrator(MockAnalyzer::new());
        let mut message = inbound("hi");
        message.recipient = "nobody@shield.tld".to_owned();
        assert!(matches!(
            orchestrator.accept(message).await,
            Err(AcceptError::Routing(RoutingError::UnknownShield))
        ));
    }

    #[tokio::test]
    async fn accept_admits_message_into_the_store() {
        let orchestrator = orchestrator(MockAnalyzer::new());
        let message_id = orchestrator.accept(inbound("Want to grab lunch?")).await.unwrap();
        assert!(orchestrator.store.get(&message_id).is_ok());
        assert_eq!(orchestrator.store.size(), 1);
    }

    #[tokio::test]
    async fn process_blocks_critical_without_delivering() {
        let orchestrator = orchestrator(MockAnalyzer::with_fixed_score(0.95));
        let store = Arc::clone(&orchestrator.store);
        let email = EphemeralEmail::new(
            "m1".to_owned(),
            "bob1234@shield.tld".to_owned(),
            "alice@ex.com".to_owned(),
            "s".to_owned(),
            "body".to_owned(),
            None,
            HashMap::new(),
            chrono::Utc::now(),
            Duration::from_secs(300),
        );
        store.put(email).unwrap();
        let ctx = orchestrator.router.resolve("bob1234@shield.tld").await.unwrap();
        orchestrator.process("m1".to_owned(), ctx).await;
        assert_eq!(store.get("m1"), Err(StoreError::NotFound));
    }

    #[tokio::test]
    async fn process_delivers_safe_message_and_evicts() {
        let orchestrator = orchestrator(MockAnalyzer::new());
        let store = Arc::clone(&orchestrator.store);
        let email = EphemeralEmail::new(
            "m2".to_owned(),
            "bob1234@shield.tld".to_owned(),
            "alice@ex.com".to_owned(),
            "s".to_owned(),
            "Want to grab lunch?".to_owned(),
            None,
            HashMap::new(),
            chrono::Utc::now(),
            Duration::from_secs(300),
        );
        store.put(email).unwrap();
        let ctx = orchestrator.router.resolve("bob1234@shield.tld").await.unwrap();
        orchestrator.process("m2".to_owned(), ctx).await;
        assert_eq!(store.get("m2"), Err(StoreError::NotFound));
    }
}
