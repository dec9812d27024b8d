pub mod smtp;
pub mod webhook;

use crate::orchestrator::AcceptError;

/// Maps an [`AcceptError`] to the transport-specific status code both
/// inbound providers use: webhook HTTP responses and SMTP reply codes are
/// derived from the same three buckets (malformed/unrouteable recipient,
/// store at capacity, other transient failure).
pub(crate) enum AcceptOutcome {
    Accepted(String),
    Duplicate,
    UnknownRecipient,
    MalformedRecipient,
    Overloaded,
    Transient,
}

impl From<Result<String, AcceptError>> for AcceptOutcome {
    fn from(result: Result<String, AcceptError>) -> Self {
        use crate::routing::RoutingError;
        use crate::store::StoreError;

        match result {
            Ok(message_id) => AcceptOutcome::Accepted(message_id),
            Err(AcceptError::Routing(RoutingError::MalformedAddress)) => AcceptOutcome::MalformedRecipient,
            Err(AcceptError::Routing(_)) => AcceptOutcome::UnknownRecipient,
            Err(AcceptError::Store(StoreError::RejectedCapacity)) => AcceptOutcome::Overloaded,
            Err(AcceptError::Store(StoreError::RejectedDuplicate)) => AcceptOutcome::Duplicate,
            Err(AcceptError::Store(_)) => AcceptOutcome::Transient,
        }
    }
}
