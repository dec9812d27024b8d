use std::sync::Mutex;

use aws_lc_rs::hmac;
use lru::LruCache;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature header is malformed")]
    Malformed,
    #[error("signature timestamp is too old or in the future")]
    Expired,
    #[error("signature does not match")]
    Mismatch,
    #[error("signature has already been used (replay)")]
    Replayed,
    #[error("payload exceeds the maximum allowed size")]
    TooLarge,
}

/// HMAC check + replay cache for webhook payloads. The header carries
/// `t=<unix-timestamp>,s=<hex-hmac-sha256>`; the signed message is
/// `raw_body || t` so a replayed old body can't be re-signed with a fresh
/// timestamp without knowing the secret.
pub struct SignatureValidator {
    key: hmac::Key,
    max_age_seconds: i64,
    max_body_bytes: u64,
    replay_cache: Mutex<LruCache<String, ()>>,
}

impl SignatureValidator {
    pub fn new(secret: &str, max_age_seconds: i64, max_body_bytes: u64, replay_cache_size: usize) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes()),
            max_age_seconds,
            max_body_bytes,
            replay_cache: Mutex::new(LruCache::new(
                std::num::NonZeroUsize::new(replay_cache_size.max(1)).unwrap(),
            )),
        }
    }

    pub fn validate(&self, raw_body: &[u8], header: &str, now_unix: i64) -> Result<(), SignatureError> {
        if raw_body.len() as u64 > self.max_body_bytes {
            return Err(SignatureError::TooLarge);
        }

        let (timestamp, signature_hex) = parse_header(header)?;

        if (now_unix - timestamp).abs() >= self.max_age_seconds {
            return Err(SignatureError::Expired);
        }

        let mut message = Vec::with_capacity(raw_body.len() + 16);
        message.extend_from_slice(raw_body);
        message.extend_from_slice(timestamp.to_string().as_bytes());

        let signature_bytes = hex_decode(signature_hex).ok_or(SignatureError::Malformed)?;

        hmac::verify(&self.key, &message, &signature_bytes).map_err(|_| {
            warn!("webhook signature mismatch");
            SignatureError::Mismatch
        })?;

        let mut cache = self.replay_cache.lock().unwrap();
        if cache.contains(signature_hex) {
            return Err(SignatureError::Replayed);
        }
        cache.put(signature_hex.to_owned(), ());

        Ok(())
    }
}

fn parse_header(header: &str) -> Result<(i64, &str), SignatureError> {
    let mut timestamp = None;
    let mut signature = None;

    for part in header.split(',') {
        let mut kv = part.splitn(2, '=');
        match (kv.next(), kv.next()) {
            (Some("t"), Some(v)) => timestamp = v.parse::<i64>().ok(),
            (Some("s"), Some(v)) => signature = Some(v),
            _ => {}
        }
    }

    match (timestamp, signature) {
        (Some(t), Some(s)) => Ok((t, s)),
        _ => Err(SignatureError::Malformed),
    }
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8], t: i64) -> String {
        let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
        let mut message = body.to_vec();
        message.extend_from_slice(t.to_string().as_bytes());
        let tag = hmac::sign(&key, &message);
        tag.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn accepts_valid_signature() {
        let secret = "a".repeat(32);
        let validator = SignatureValidator::new(&secret, 300, 5 * 1024 * 1024, 100);
        let body = b"raw payload";
        let t = 1_700_000_000i64;
        let sig = sign(&secret, body, t);
        let header = format!("t={t},s={sig}");
        assert!(validator.validate(body, &header, t).is_ok());
    }

    #[test]
    fn rejects_expired_timestamp() {
        let secret = "a".repeat(32);
        let validator = SignatureValidator::new(&secret, 300, 5 * 1024 * 1024, 100);
        let body = b"raw payload";
        let t = 1_700_000_000i64;
        let sig = sign(&secret, body, t);
        let header = format!("t={t},s={sig}");
        assert!(validator.validate(body, &header, t + 301).is_err());
    }

    #[test]
    fn rejects_timestamp_exactly_at_max_age() {
        let secret = "a".repeat(32);
        let validator = SignatureValidator::new(&secret, 300, 5 * 1024 * 1024, 100);
        let body = b"raw payload";
        let t = 1_700_000_000i64;
        let sig = sign(&secret, body, t);
        let header = format!("t={t},s={sig}");
        assert_eq!(validator.validate(body, &header, t + 300), Err(SignatureError::Expired));
        assert!(validator.validate(body, &header, t + 299).is_ok());
    }

    #[test]
    fn rejects_tampered_body() {
        let secret = "a".repeat(32);
        let validator = SignatureValidator::new(&secret, 300, 5 * 1024 * 1024, 100);
        let t = 1_700_000_000i64;
        let sig = sign(&secret, b"original", t);
        let header = format!("t={t},s={sig}");
        assert_eq!(
            validator.validate(b"tampered", &header, t),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn rejects_replay() {
        let secret = "a".repeat(32);
        let validator = SignatureValidator::new(&secret, 300, 5 * 1024 * 1024, 100);
        let body = b"raw payload";
        let t = 1_700_000_000i64;
        let sig = sign(&secret, body, t);
        let header = format!("t={t},s={sig}");
        assert!(validator.validate(body, &header, t).is_ok());
        assert_eq!(validator.validate(body, &header, t), Err(SignatureError::Replayed));
    }

    #[test]
    fn rejects_oversized_payload_without_hmac() {
        let secret = "a".repeat(32);
        let validator = SignatureValidator::new(&secret, 300, 10, 100);
        let body = vec![0u8; 100];
        assert_eq!(
            validator.validate(&body, "t=1,s=00", 1),
            Err(SignatureError::TooLarge)
        );
    }
}
