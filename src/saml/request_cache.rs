//! In-memory replay cache for outstanding `AuthnRequest` IDs.
//!
//! This is an opt-in supplement, not a hard requirement: with the cache
//! disabled, correlation still checks that `InResponseTo` is the
//! well-formed ID of a request this process plausibly issued, it just
//! can't detect a response being replayed against the same request ID
//! twice. A `std::sync::Mutex` + `HashMap` is enough at this scale —
//! there's no reason to reach for a dependency just to guard a handful
//! of short-lived entries behind a lock that's barely contended.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct RequestIdCache {
    entries: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
}

impl RequestIdCache {
    pub fn new(ttl: Duration) -> Self {
        Self { entries: Mutex::new(HashMap::new()), ttl }
    }

    /// Records a newly-issued request ID so it can later be matched (and
    /// consumed) by an inbound response.
    pub fn record(&self, request_id: &str) {
        let mut entries = self.entries.lock().expect("request id cache poisoned");
        self.evict_expired(&mut entries);
        entries.insert(request_id.to_string(), Instant::now());
    }

    /// Consumes a request ID if it is outstanding and unexpired. Returns
    /// `true` on first use; `false` if the ID was never recorded, has
    /// already been consumed, or has aged out — either way, repeated
    /// calls with the same ID never return `true` twice.
    pub fn consume(&self, request_id: &str) -> bool {
        let mut entries = self.entries.lock().expect("request id cache poisoned");
        self.evict_expired(&mut entries);
        match entries.remove(request_id) {
            Some(_) => true,
            None => false,
        }
    }

    fn evict_expired(&self, entries: &mut HashMap<String, Instant>) {
        let ttl = self.ttl;
        entries.retain(|_, recorded_at| recorded_at.elapsed() < ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_is_single_use() {
        let cache = RequestIdCache::new(Duration::from_secs(60));
        cache.record("_abc123");
        assert!(cache.consume("_abc123"));
        assert!(!cache.consume("_abc123"));
    }

    #[test]
    fn unknown_id_is_not_consumable() {
        let cache = RequestIdCache::new(Duration::from_secs(60));
        assert!(!cache.consume("_never-issued"));
    }

    #[test]
    fn expired_entries_are_evicted() {
        let cache = RequestIdCache::new(Duration::from_millis(1));
        cache.record("_abc123");
        std::thread::sleep(Duration::from_millis(5));
        assert!(!cache.consume("_abc123"));
    }
}
