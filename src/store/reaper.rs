use std::{sync::Arc, time::Duration};

use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::store::EphemeralStore;

const EVICTION_BATCH: usize = 100;

/// Background task evicting expired entries from the [`EphemeralStore`] on a
/// fixed cadence. Runs until `shutdown` is cancelled; the in-flight tick is
/// always allowed to finish before the task returns.
pub struct Reaper {
    store: Arc<EphemeralStore>,
    interval: Duration,
    shutdown: CancellationToken,
}

impl Reaper {
    pub fn new(store: Arc<EphemeralStore>, interval: Duration, shutdown: CancellationToken) -> Self {
        Self {
            store,
            interval,
            shutdown,
        }
    }

    pub fn spawn(self) {
        tokio::spawn(async move {
            self.run().await;
        });
    }

    async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            select! {
                _ = self.shutdown.cancelled() => {
                    debug!("reaper shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    let evicted = self.store.evict_expired(chrono::Utc::now(), EVICTION_BATCH);
                    if evicted > 0 {
                        debug!(evicted, "reaper tick evicted expired entries");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EphemeralEmail;
    use std::collections::HashMap;

    #[tokio::test]
    async fn reaper_evicts_on_tick_and_stops_on_shutdown() {
        let store = Arc::new(EphemeralStore::new(10, Duration::from_secs(60)));
        let mut expired = EphemeralEmail::new(
            "m1".to_owned(),
            "bob@shield.tld".to_owned(),
            "a@ex.com".to_owned(),
            "s".to_owned(),
            "b".to_owned(),
            None,
            HashMap::new(),
            chrono::Utc::now(),
            Duration::from_secs(300),
        );
        expired.ttl_expires_at = chrono::Utc::now() - chrono::Duration::seconds(1);
        store.put(expired).unwrap();

        let shutdown = CancellationToken::new();
        let reaper = Reaper::new(store.clone(), Duration::from_millis(10), shutdown.clone());
        reaper.spawn();

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();

        assert_eq!(store.size(), 0);
    }
}
