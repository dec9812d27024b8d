use std::collections::HashMap;

use crate::{
    decision::{Action, ProtectionDecision},
    store::EphemeralEmail,
};

/// The transformed message handed to the outbound sender. `headers`
/// preserves the inbound threading headers (`Message-Id`, `In-Reply-To`,
/// `References`) so the recipient's client keeps the original thread
/// grouping.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: Option<String>,
    pub headers: HashMap<String, String>,
}

/// `transform(ephemeral_email, decision) -> OutboundMessage | Drop`. Pure:
/// no I/O, deterministic for identical inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformOutcome {
    Deliver(Box<OutboundMessageData>),
    Drop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessageData {
    pub subject: String,
    pub text_body: String,
    pub html_body: Option<String>,
    pub protected_by: Option<String>,
}

const THREADING_HEADERS: [&str; 3] = ["Message-Id", "In-Reply-To", "References"];
const PROTECTED_BY_HEADER: &str = "X-Protected-By";
const PROTECTED_BY_NOTICE: &str = "cellophane-gateway; scanned for harmful communication patterns";

fn threading_headers(email: &EphemeralEmail) -> HashMap<String, String> {
    THREADING_HEADERS
        .iter()
        .filter_map(|name| email.header(name).map(|v| (name.to_string(), v.to_string())))
        .collect()
}

fn context_note(decision: &ProtectionDecision) -> String {
    let names: Vec<String> = decision
        .transformation_hint
        .horsemen_detected
        .iter()
        .map(|h| h.horseman.to_string())
        .collect();
    if names.is_empty() {
        "This message was flagged by automated analysis as potentially containing harmful communication patterns.\n\n".to_owned()
    } else {
        format!(
            "This message was flagged for patterns associated with: {}.\n\n",
            names.join(", ")
        )
    }
}

/// Replaces each `indicator` span in `text` with `[redacted: <horseman>]`,
/// leftmost match first, case-sensitive substring. Tolerates a hallucinated
/// indicator that does not appear verbatim by simply leaving it unmatched —
/// the caller degrades the action to `ForwardWithContext` when nothing in
/// the whole decision actually matched.
fn redact(text: &str, decision: &ProtectionDecision) -> (String, bool) {
    let mut result = text.to_owned();
    let mut any_matched = false;

    for detection in &decision.transformation_hint.horsemen_detected {
        for indicator in &detection.indicators {
            if indicator.is_empty() {
                continue;
            }
            if let Some(pos) = result.find(indicator.as_str()) {
                let replacement = format!("[redacted: {}]", detection.horseman);
                result.replace_range(pos..pos + indicator.len(), &replacement);
                any_matched = true;
            }
        }
    }

    (result, any_matched)
}

fn summarize(email: &EphemeralEmail) -> String {
    let first_sentence = email
        .text_body
        .split(['.', '\n'])
        .next()
        .unwrap_or("")
        .trim();
    if first_sentence.is_empty() {
        format!(
            "A message from {} has been summarized; the original contained patterns flagged as highly concerning and has not been forwarded verbatim.",
            email.from_address
        )
    } else {
        format!(
            "A message from {} has been summarized for your safety. Topic: \"{}\"",
            email.from_address, first_sentence
        )
    }
}

pub fn transform(email: &EphemeralEmail, decision: &ProtectionDecision) -> TransformOutcome {
    match decision.action {
        Action::ForwardClean => TransformOutcome::Deliver(Box::new(OutboundMessageData {
            subject: email.subject.clone(),
            text_body: email.text_body.clone(),
            html_body: email.html_body.clone(),
            protected_by: Some(PROTECTED_BY_NOTICE.to_owned()),
        })),
        Action::ForwardWithContext => {
            let note = context_note(decision);
            TransformOutcome::Deliver(Box::new(OutboundMessageData {
                subject: email.subject.clone(),
                text_body: format!("{note}{}", email.text_body),
                html_body: email.html_body.clone(),
                protected_by: Some(PROTECTED_BY_NOTICE.to_owned()),
            }))
        }
        Action::RedactHarmful => {
            let (redacted_text, matched) = redact(&email.text_body, decision);
            if !matched {
                // Analyzer hallucinated indicators that don't appear
                // verbatim; degrade to ForwardWithContext rather than
                // deliver an unredacted body under a redaction decision.
                let note = context_note(decision);
                return TransformOutcome::Deliver(Box::new(OutboundMessageData {
                    subject: email.subject.clone(),
                    text_body: format!("{note}{}", email.text_body),
                    html_body: email.html_body.clone(),
                    protected_by: Some(PROTECTED_BY_NOTICE.to_owned()),
                }));
            }
            let redacted_html = email.html_body.as_ref().map(|html| redact(html, decision).0);
            TransformOutcome::Deliver(Box::new(OutboundMessageData {
                subject: email.subject.clone(),
                text_body: redacted_text,
                html_body: redacted_html,
                protected_by: None,
            }))
        }
        Action::SummarizeOnly => TransformOutcome::Deliver(Box::new(OutboundMessageData {
            subject: email.subject.clone(),
            text_body: summarize(email),
            html_body: None,
            protected_by: None,
        })),
        Action::BlockEntirely => TransformOutcome::Drop,
    }
}

/// Produces the [`OutboundMessage`] the sender actually receives by
/// attaching routing (`to`/`from`) and threading headers to the transform
/// output. Kept separate from `transform` so `transform` itself stays a
/// pure function over `(email, decision)` with no routing dependency.
pub fn to_outbound_message(
    email: &EphemeralEmail,
    data: OutboundMessageData,
    to: String,
    from: String,
) -> OutboundMessage {
    let mut headers = threading_headers(email);
    if let Some(notice) = data.protected_by {
        headers.insert(PROTECTED_BY_HEADER.to_owned(), notice);
    }

    OutboundMessage {
        to,
        from,
        subject: data.subject,
        text_body: data.text_body,
        html_body: data.html_body,
        headers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{AnalysisResult, Horseman, HorsemenDetection, Severity, ThreatLevel};

    fn email(body: &str) -> EphemeralEmail {
        let mut headers = HashMap::new();
        headers.insert("Message-Id".to_owned(), "<abc@ex.com>".to_owned());
        EphemeralEmail::new(
            "m1".to_owned(),
            "bob1234@shield.tld".to_owned(),
            "alice@ex.com".to_owned(),
            "Subject".to_owned(),
            body.to_owned(),
            None,
            headers,
            chrono::Utc::now(),
            std::time::Duration::from_secs(300),
        )
    }

    fn decision_with(action: Action, indicators: Vec<(&str, &str)>) -> ProtectionDecision {
        ProtectionDecision {
            action,
            rationale: "test".to_owned(),
            transformation_hint: AnalysisResult {
                toxicity_score: 0.6,
                threat_level: ThreatLevel::Medium,
                horsemen_detected: indicators
                    .into_iter()
                    .map(|(h, indicator)| HorsemenDetection {
                        horseman: match h {
                            "contempt" => Horseman::Contempt,
                            "criticism" => Horseman::Criticism,
                            "defensiveness" => Horseman::Defensiveness,
                            _ => Horseman::Stonewalling,
                        },
                        confidence: 0.9,
                        severity: Severity::High,
                        indicators: vec![indicator.to_owned()],
                    })
                    .collect(),
                reasoning: "x".to_owned(),
                processing_time_ms: 1,
            },
        }
    }

    #[test]
    fn forward_clean_is_byte_identical() {
        let email = email("Want to grab lunch at noon?");
        let decision = decision_with(Action::ForwardClean, vec![]);
        let outcome = transform(&email, &decision);
        match outcome {
            TransformOutcome::Deliver(data) => assert_eq!(data.text_body, email.text_body),
            TransformOutcome::Drop => panic!("expected delivery"),
        }
    }

    #[test]
    fn redact_replaces_indicator_leftmost() {
        let email = email("Fine, whatever. You're pathetic as usual and the report is wrong.");
        let decision = decision_with(Action::RedactHarmful, vec![("contempt", "pathetic as usual")]);
        let outcome = transform(&email, &decision);
        match outcome {
            TransformOutcome::Deliver(data) => {
                assert!(data.text_body.contains("[redacted: contempt]"));
                assert!(!data.text_body.contains("pathetic as usual"));
                assert!(data.text_body.contains("the report is wrong"));
            }
            TransformOutcome::Drop => panic!("expected delivery"),
        }
    }

    #[test]
    fn redact_degrades_when_indicator_not_found() {
        let email = email("A perfectly normal message with no match.");
        let decision = decision_with(Action::RedactHarmful, vec![("contempt", "not present anywhere")]);
        let outcome = transform(&email, &decision);
        match outcome {
            TransformOutcome::Deliver(data) => assert!(data.text_body.contains(&email.text_body)),
            TransformOutcome::Drop => panic!("expected delivery"),
        }
    }

    #[test]
    fn summarize_omits_original_quotes() {
        let email = email("You are a terrible awful no-good person and everyone agrees.");
        let decision = decision_with(Action::SummarizeOnly, vec![]);
        let outcome = transform(&email, &decision);
        match outcome {
            TransformOutcome::Deliver(data) => {
                assert!(!data.text_body.contains("terrible awful no-good person"))
            }
            TransformOutcome::Drop => panic!("expected delivery"),
        }
    }

    #[test]
    fn block_entirely_drops() {
        let email = email("Direct threat content.");
        let decision = decision_with(Action::BlockEntirely, vec![]);
        assert_eq!(transform(&email, &decision), TransformOutcome::Drop);
    }

    #[test]
    fn threading_headers_preserved() {
        let email = email("hello");
        let decision = decision_with(Action::ForwardWithContext, vec![]);
        let outcome = transform(&email, &decision);
        if let TransformOutcome::Deliver(data) = outcome {
            let outbound = to_outbound_message(&email, *data, "bob@real.example".into(), "gateway@shield.tld".into());
            assert_eq!(outbound.headers.get("Message-Id").unwrap(), "<abc@ex.com>");
        } else {
            panic!("expected delivery")
        }
    }

    #[test]
    fn forward_clean_carries_protected_by_header() {
        let email = email("hello");
        let decision = decision_with(Action::ForwardClean, vec![]);
        let outcome = transform(&email, &decision);
        if let TransformOutcome::Deliver(data) = outcome {
            let outbound = to_outbound_message(&email, *data, "bob@real.example".into(), "gateway@shield.tld".into());
            assert!(outbound.headers.contains_key(PROTECTED_BY_HEADER));
        } else {
            panic!("expected delivery")
        }
    }

    #[test]
    fn redact_harmful_carries_no_protected_by_header() {
        let email = email("Fine, whatever. You're pathetic as usual.");
        let decision = decision_with(Action::RedactHarmful, vec![("contempt", "pathetic as usual")]);
        let outcome = transform(&email, &decision);
        if let TransformOutcome::Deliver(data) = outcome {
            let outbound = to_outbound_message(&email, *data, "bob@real.example".into(), "gateway@shield.tld".into());
            assert!(!outbound.headers.contains_key(PROTECTED_BY_HEADER));
        } else {
            panic!("expected delivery")
        }
    }

    #[test]
    fn transform_is_deterministic() {
        let email = email("repeatable body");
        let decision = decision_with(Action::ForwardClean, vec![]);
        let a = transform(&email, &decision);
        let b = transform(&email, &decision);
        assert_eq!(a, b);
    }
}
