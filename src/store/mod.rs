mod reaper;

pub use reaper::Reaper;

use std::{collections::HashMap, time::Duration};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store is at capacity")]
    RejectedCapacity,
    #[error("a live entry with this message id already exists")]
    RejectedDuplicate,
    #[error("no entry found for this message id")]
    NotFound,
    #[error("message is already claimed by another worker")]
    AlreadyClaimed,
    #[error("illegal state transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: MessageState,
        to: MessageState,
    },
}

/// Lifecycle state of an [`EphemeralEmail`], see the orchestrator's state
/// machine for the legal transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    Pending,
    Analyzing,
    Delivering,
    Completed,
    Failed,
    Expired,
}

impl MessageState {
    fn can_transition_to(self, next: MessageState) -> bool {
        use MessageState::*;
        matches!(
            (self, next),
            (Pending, Analyzing)
                | (Analyzing, Delivering)
                | (Analyzing, Completed)
                | (Analyzing, Failed)
                | (Delivering, Completed)
                | (Delivering, Failed)
                | (_, Expired)
        )
    }
}

/// Everything needed to analyze and deliver one message, held only in
/// memory. Body fields are never written to a durable medium anywhere in
/// this codebase.
#[derive(Debug, Clone)]
pub struct EphemeralEmail {
    pub message_id: String,
    pub shield_address: String,
    pub from_address: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: Option<String>,
    pub headers: HashMap<String, String>,
    pub received_at: DateTime<Utc>,
    pub ttl_expires_at: DateTime<Utc>,
    pub state: MessageState,
}

impl EphemeralEmail {
    pub fn new(
        message_id: String,
        shield_address: String,
        from_address: String,
        subject: String,
        text_body: String,
        html_body: Option<String>,
        headers: HashMap<String, String>,
        received_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        let ttl_expires_at = received_at
            + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(300));
        Self {
            message_id,
            shield_address,
            from_address,
            subject,
            text_body,
            html_body,
            headers,
            received_at,
            ttl_expires_at,
            state: MessageState::Pending,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Bounded, sharded in-memory map of `message_id` -> [`EphemeralEmail`].
/// The only shared mutable structure in the gateway; every operation is
/// safe under concurrent callers because `DashMap` locks at the shard
/// (bucket) level rather than globally.
pub struct EphemeralStore {
    entries: DashMap<String, EphemeralEmail>,
    capacity: usize,
    hard_ceiling_grace: chrono::Duration,
}

impl EphemeralStore {
    pub fn new(capacity: usize, hard_ceiling_grace: Duration) -> Self {
        Self {
            entries: DashMap::with_capacity(capacity),
            capacity,
            hard_ceiling_grace: chrono::Duration::from_std(hard_ceiling_grace)
                .unwrap_or(chrono::Duration::seconds(60)),
        }
    }

    pub fn put(&self, email: EphemeralEmail) -> Result<(), StoreError> {
        if self.entries.contains_key(&email.message_id) {
            return Err(StoreError::RejectedDuplicate);
        }
        // Not perfectly atomic under a storm of concurrent puts at the
        // boundary, but `entry()` below re-checks and the size overshoot is
        // bounded by the number of concurrently racing callers, which is
        // acceptable backpressure slop for this capacity guard.
        if self.entries.len() >= self.capacity {
            return Err(StoreError::RejectedCapacity);
        }

        match self.entries.entry(email.message_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(StoreError::RejectedDuplicate),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(email);
                Ok(())
            }
        }
    }

    pub fn get(&self, message_id: &str) -> Result<EphemeralEmail, StoreError> {
        self.entries
            .get(message_id)
            .map(|entry| entry.clone())
            .ok_or(StoreError::NotFound)
    }

    pub fn claim(&self, message_id: &str) -> Result<(), StoreError> {
        let mut entry = self.entries.get_mut(message_id).ok_or(StoreError::NotFound)?;
        if entry.state != MessageState::Pending {
            return Err(StoreError::AlreadyClaimed);
        }
        entry.state = MessageState::Analyzing;
        Ok(())
    }

    pub fn update_state(&self, message_id: &str, new_state: MessageState) -> Result<(), StoreError> {
        let mut entry = self.entries.get_mut(message_id).ok_or(StoreError::NotFound)?;
        if !entry.state.can_transition_to(new_state) {
            return Err(StoreError::InvalidTransition {
                from: entry.state,
                to: new_state,
            });
        }
        entry.state = new_state;
        Ok(())
    }

    pub fn evict(&self, message_id: &str) -> Result<(), StoreError> {
        self.entries
            .remove(message_id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    /// Removes expired entries, up to `max_batch`. An entry is eligible
    /// when its soft TTL has passed and it is not currently held by a
    /// worker (`Pending`, `Completed`, `Failed`), or unconditionally once
    /// it is past the hard ceiling `ttl + grace`, on the assumption that a
    /// worker that has held a claim that long is hung.
    pub fn evict_expired(&self, now: DateTime<Utc>, max_batch: usize) -> usize {
        let hard_ceiling = self.hard_ceiling_grace;
        let candidates: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| {
                let soft_expired = entry.ttl_expires_at <= now
                    && matches!(
                        entry.state,
                        MessageState::Pending | MessageState::Completed | MessageState::Failed
                    );
                let hard_expired = now - entry.received_at >= (entry.ttl_expires_at - entry.received_at) + hard_ceiling;
                soft_expired || hard_expired
            })
            .take(max_batch)
            .map(|entry| entry.message_id.clone())
            .collect();

        let count = candidates.len();
        for message_id in candidates {
            self.entries.remove(&message_id);
        }
        count
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str) -> EphemeralEmail {
        EphemeralEmail::new(
            id.to_owned(),
            "bob1234@shield.tld".to_owned(),
            "alice@ex.com".to_owned(),
            "Lunch?".to_owned(),
            "Want to grab lunch?".to_owned(),
            None,
            HashMap::new(),
            Utc::now(),
            Duration::from_secs(300),
        )
    }

    #[test]
    fn put_rejects_duplicate() {
        let store = EphemeralStore::new(2, Duration::from_secs(60));
        store.put(sample("a")).unwrap();
        assert_eq!(store.put(sample("a")), Err(StoreError::RejectedDuplicate));
    }

    #[test]
    fn put_rejects_over_capacity() {
        let store = EphemeralStore::new(1, Duration::from_secs(60));
        store.put(sample("a")).unwrap();
        assert_eq!(store.put(sample("b")), Err(StoreError::RejectedCapacity));
    }

    #[test]
    fn claim_is_exclusive() {
        let store = EphemeralStore::new(10, Duration::from_secs(60));
        store.put(sample("a")).unwrap();
        store.claim("a").unwrap();
        assert_eq!(store.claim("a"), Err(StoreError::AlreadyClaimed));
    }

    #[test]
    fn evict_expired_removes_only_past_ttl() {
        let store = EphemeralStore::new(10, Duration::from_secs(60));
        let mut old = sample("old");
        old.ttl_expires_at = Utc::now() - chrono::Duration::seconds(1);
        store.put(old).unwrap();
        store.put(sample("fresh")).unwrap();

        let evicted = store.evict_expired(Utc::now(), 100);
        assert_eq!(evicted, 1);
        assert_eq!(store.get("old"), Err(StoreError::NotFound));
        assert!(store.get("fresh").is_ok());
    }

    #[test]
    fn size_never_exceeds_capacity() {
        let store = EphemeralStore::new(3, Duration::from_secs(60));
        for i in 0..3 {
            store.put(sample(&i.to_string())).unwrap();
        }
        assert_eq!(store.put(sample("overflow")), Err(StoreError::RejectedCapacity));
        assert!(store.size() <= store.capacity());
    }
}
