//! Short-lived cache of retrieval results.
//!
//! Repeated questions skip model checkout, embedding and search. Entries are
//! keyed by model, `k` and the normalized query text and expire after a TTL
//! measured on the injected clock.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use lru::LruCache;
use rag_types::SharedClock;
use rag_vector::RetrievalCandidate;

use crate::dedup::normalize_text;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    model_id: String,
    k: usize,
    query: String,
}

impl CacheKey {
    fn new(model_id: &str, k: usize, query: &str) -> Self {
        Self {
            model_id: model_id.to_string(),
            k,
            query: normalize_text(query),
        }
    }
}

struct CachedResult {
    passages: Vec<RetrievalCandidate>,
    stored_at_ms: i64,
}

/// Bounded LRU of recent results. A zero TTL disables it.
pub struct ResultCache {
    entries: Mutex<LruCache<CacheKey, CachedResult>>,
    ttl: Duration,
    clock: SharedClock,
}

impl ResultCache {
    pub fn new(capacity: usize, ttl: Duration, clock: SharedClock) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            clock,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<CacheKey, CachedResult>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, model_id: &str, k: usize, query: &str) -> Option<Vec<RetrievalCandidate>> {
        if !self.is_enabled() {
            return None;
        }
        let key = CacheKey::new(model_id, k, query);
        let now = self.clock.now_ms();
        let ttl_ms = self.ttl.as_millis() as i64;

        let mut entries = self.lock();
        match entries.get(&key) {
            Some(hit) if now - hit.stored_at_ms <= ttl_ms => Some(hit.passages.clone()),
            Some(_) => {
                entries.pop(&key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, model_id: &str, k: usize, query: &str, passages: &[RetrievalCandidate]) {
        if !self.is_enabled() {
            return;
        }
        let entry = CachedResult {
            passages: passages.to_vec(),
            stored_at_ms: self.clock.now_ms(),
        };
        self.lock().put(CacheKey::new(model_id, k, query), entry);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
