use std::{net::SocketAddr, sync::Arc};

use mail_parser::MessageParser;
use smtp_proto::{EhloResponse, Request, EXT_8BIT_MIME, EXT_ENHANCED_STATUS_CODES, EXT_SMTP_UTF8};
use tracing::{debug, trace, warn};

use crate::{
    inbound::AcceptOutcome,
    orchestrator::{InboundMessage, Orchestrator},
    routing::{RoutingError, ShieldDirectory},
};

pub enum SessionReply {
    ReplyAndContinue(u16, String),
    ReplyAndStop(u16, String),
    RawReply(Vec<u8>),
    IngestData(u16, String),
}

pub enum DataReply {
    ContinueIngest,
    ReplyAndContinue(u16, String),
}

/// Inbound SMTP session state machine. No AUTH and no TLS: the SMTP
/// listener is bound to localhost and assumes a trusted relay sits in front
/// of it, the same trust boundary the webhook signature validator enforces
/// over the network for the HTTP provider.
pub struct SmtpSession<D: ShieldDirectory> {
    peer_addr: SocketAddr,
    peer_name: Option<String>,
    orchestrator: Arc<Orchestrator<D>>,
    mail_from: Option<String>,
    recipient: Option<String>,
    raw_data: Vec<u8>,
}

impl<D: ShieldDirectory + 'static> SmtpSession<D> {
    const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

    const RESPONSE_OK: &'static str = "2.0.0 Ok";
    const RESPONSE_FROM_OK: &'static str = "2.1.0 Originator ok";
    const RESPONSE_TO_OK: &'static str = "2.1.5 Recipient ok";
    const RESPONSE_START_DATA: &'static str = "3.5.4 Start mail input; end with <CRLF>.<CRLF>";
    const RESPONSE_BYE: &'static str = "2.0.0 Goodbye";
    const RESPONSE_MESSAGE_ACCEPTED: &'static str = "2.6.0 Message queued for delivery";
    const RESPONSE_MESSAGE_REJECTED: &'static str = "5.6.0 Message rejected";
    const RESPONSE_BAD_SEQUENCE: &'static str = "5.5.1 Bad sequence of commands";
    const RESPONSE_MAIL_FIRST: &'static str = "5.5.1 Use MAIL first";
    const RESPONSE_HELLO_FIRST: &'static str = "5.5.1 Be nice and say EHLO first";
    const RESPONSE_NO_VALID_RECIPIENT: &'static str = "5.5.1 No valid recipient";
    const RESPONSE_INVALID_EMAIL: &'static str = "5.1.3 This email address is not valid";
    const RESPONSE_NESTED_MAIL: &'static str = "5.5.1 Error: nested MAIL command";
    const RESPONSE_UNKNOWN_RECIPIENT: &'static str = "5.1.1 Unknown recipient";
    const RESPONSE_MULTI_RECIPIENT: &'static str = "5.5.1 Only a single recipient is supported per message";
    const RESPONSE_COMMAND_NOT_IMPLEMENTED: &'static str = "5.5.1 Command not implemented";
    const RESPONSE_MUST_USE_ESMTP: &'static str = "5.5.1 Must use EHLO";
    const RESPONSE_NO_VRFY: &'static str = "5.5.1 VRFY command is disabled";
    const RESPONSE_OVERLOADED: &'static str = "4.3.1 Mail system full, try again later";
    const RESPONSE_TEMPORARY_FAILURE: &'static str = "4.3.0 Temporary failure, please try again";

    pub fn new(peer_addr: SocketAddr, orchestrator: Arc<Orchestrator<D>>) -> Self {
        Self {
            peer_addr,
            peer_name: None,
            orchestrator,
            mail_from: None,
            recipient: None,
            raw_data: Vec::new(),
        }
    }

    pub fn peer(&self) -> &SocketAddr {
        &self.peer_addr
    }

    pub async fn handle(&mut self, request: Result<Request<String>, smtp_proto::Error>) -> SessionReply {
        let request = match request {
            Ok(r) => r,
            Err(e) => {
                debug!("failed to parse request: {e}");
                return SessionReply::ReplyAndContinue(554, e.to_string());
            }
        };

        trace!("received request: {request:?} from {}", self.peer_addr);

        match request {
            Request::Ehlo { host } => {
                let mut response = EhloResponse::new(&host);
                response.capabilities = EXT_ENHANCED_STATUS_CODES | EXT_8BIT_MIME | EXT_SMTP_UTF8;

                let mut buf = Vec::with_capacity(64);
                response.write(&mut buf).ok();

                self.peer_name = Some(host);

                SessionReply::RawReply(buf)
            }
            Request::Helo { host: _ } | Request::Lhlo { host: _ } => {
                SessionReply::ReplyAndContinue(502, Self::RESPONSE_MUST_USE_ESMTP.into())
            }
            Request::Quit => SessionReply::ReplyAndStop(221, Self::RESPONSE_BYE.into()),
            _ignored_command if self.peer_name.is_none() => {
                SessionReply::ReplyAndContinue(503, Self::RESPONSE_HELLO_FIRST.into())
            }
            Request::Mail { from } => {
                debug!("received MAIL FROM: {}", from.address);

                if self.mail_from.is_some() {
                    return SessionReply::ReplyAndContinue(503, Self::RESPONSE_NESTED_MAIL.into());
                }

                self.mail_from = Some(from.address.clone());
                self.recipient = None;
                self.raw_data.clear();

                SessionReply::ReplyAndContinue(250, Self::RESPONSE_FROM_OK.into())
            }
            Request::Rcpt { to } => {
                debug!("received RCPT TO: {}", to.address);

                if self.mail_from.is_none() {
                    return SessionReply::ReplyAndContinue(503, Self::RESPONSE_MAIL_FIRST.into());
                }
                if self.recipient.is_some() {
                    return SessionReply::ReplyAndContinue(551, Self::RESPONSE_MULTI_RECIPIENT.into());
                }

                match self.orchestrator.router().resolve(&to.address).await {
                    Ok(_) => {
                        self.recipient = Some(to.address.clone());
                        SessionReply::ReplyAndContinue(250, Self::RESPONSE_TO_OK.into())
                    }
                    Err(RoutingError::MalformedAddress) => {
                        SessionReply::ReplyAndContinue(553, Self::RESPONSE_INVALID_EMAIL.into())
                    }
                    Err(_) => SessionReply::ReplyAndContinue(550, Self::RESPONSE_UNKNOWN_RECIPIENT.into()),
                }
            }
            Request::Data => {
                if self.mail_from.is_none() {
                    return SessionReply::ReplyAndContinue(503, Self::RESPONSE_BAD_SEQUENCE.into());
                }
                if self.recipient.is_none() {
                    return SessionReply::ReplyAndContinue(554, Self::RESPONSE_NO_VALID_RECIPIENT.into());
                }

                SessionReply::IngestData(354, Self::RESPONSE_START_DATA.into())
            }
            Request::Rset => {
                self.mail_from = None;
                self.recipient = None;
                self.raw_data.clear();
                SessionReply::ReplyAndContinue(250, Self::RESPONSE_OK.into())
            }
            Request::Noop { value: _ } => SessionReply::ReplyAndContinue(250, Self::RESPONSE_OK.into()),
            Request::Vrfy { value: _ } => SessionReply::ReplyAndContinue(502, Self::RESPONSE_NO_VRFY.into()),
            _ => SessionReply::ReplyAndContinue(502, Self::RESPONSE_COMMAND_NOT_IMPLEMENTED.into()),
        }
    }

    pub async fn handle_data(&mut self, chunk: &[u8]) -> DataReply {
        self.raw_data.extend_from_slice(chunk);

        if self.raw_data.len() > Self::MAX_BODY_SIZE {
            debug!("failed to read message: message too big");
            self.mail_from = None;
            self.recipient = None;
            self.raw_data.clear();
            return DataReply::ReplyAndContinue(554, Self::RESPONSE_MESSAGE_REJECTED.into());
        }

        const DATA_END: &[u8] = b"\r\n.\r\n";

        if !(self.raw_data.ends_with(DATA_END) || self.raw_data == DATA_END[2..]) {
            return DataReply::ContinueIngest;
        }

        let body_len = self.raw_data.len() - DATA_END.len();
        let raw_message = std::mem::take(&mut self.raw_data);
        let raw_message = &raw_message[..body_len];

        let from_address = self.mail_from.take().unwrap_or_default();
        let recipient = self.recipient.take().unwrap_or_default();

        let parsed = MessageParser::default().parse(raw_message);
        let (subject, text_body, html_body, headers) = match &parsed {
            Some(message) => {
                let subject = message.subject().unwrap_or_default().to_owned();
                let text_body = message.body_text(0).map(|b| b.to_string()).unwrap_or_default();
                let html_body = message.body_html(0).map(|b| b.to_string());
                let mut headers = std::collections::HashMap::new();
                if let Some(id) = message.message_id() {
                    headers.insert("Message-Id".to_owned(), format!("<{id}>"));
                }
                if let Some(in_reply_to) = message.in_reply_to().as_text() {
                    headers.insert("In-Reply-To".to_owned(), in_reply_to.to_owned());
                }
                if let Some(references) = message.references().as_text_list() {
                    headers.insert("References".to_owned(), references.join(" "));
                }
                (subject, text_body, html_body, headers)
            }
            None => {
                warn!("failed to parse DATA as a MIME message, forwarding with an empty body");
                (String::new(), String::new(), None, std::collections::HashMap::new())
            }
        };

        let message = InboundMessage {
            recipient,
            from_address,
            subject,
            text_body,
            html_body,
            headers,
        };

        match AcceptOutcome::from(self.orchestrator.accept(message).await) {
            AcceptOutcome::Accepted(message_id) => {
                debug!(message_id, "message accepted over SMTP");
                DataReply::ReplyAndContinue(250, Self::RESPONSE_MESSAGE_ACCEPTED.into())
            }
            AcceptOutcome::Duplicate => {
                debug!("duplicate message id, already accepted");
                DataReply::ReplyAndContinue(250, Self::RESPONSE_MESSAGE_ACCEPTED.into())
            }
            AcceptOutcome::MalformedRecipient => {
                DataReply::ReplyAndContinue(553, Self::RESPONSE_INVALID_EMAIL.into())
            }
            AcceptOutcome::UnknownRecipient => {
                DataReply::ReplyAndContinue(550, Self::RESPONSE_UNKNOWN_RECIPIENT.into())
            }
            AcceptOutcome::Overloaded => DataReply::ReplyAndContinue(452, Self::RESPONSE_OVERLOADED.into()),
            AcceptOutcome::Transient => {
                DataReply::ReplyAndContinue(451, Self::RESPONSE_TEMPORARY_FAILURE.into())
            }
        }
    }
}
