//! Per-identity admission control.
//!
//! Each identity owns a bucket of `capacity` tokens. A token spent at time
//! `t` becomes available again at `t + window`, computed lazily when the
//! identity next checks in; there is no refill timer. This keeps the refill
//! rate at `capacity` per window while guaranteeing that no trailing window
//! ever holds more than `capacity` admissions.
//!
//! Buckets live in a sharded map and are mutated under their shard's lock, so
//! one identity's checks are linearizable and unrelated identities rarely
//! contend.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use rag_types::SharedClock;
use tracing::{debug, info};

/// Length of the rate window.
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Checks between lazy cleanups.
const CLEANUP_EVERY: u64 = 1024;

/// Limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Admissions allowed per window
    pub capacity: u32,
    pub window: Duration,
    /// Buckets unseen for this long are dropped (never sooner than `window`)
    pub idle_ttl: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 60,
            window: RATE_WINDOW,
            idle_ttl: Duration::from_secs(600),
        }
    }
}

impl RateLimitConfig {
    pub fn per_minute(capacity: u32) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Admitted; one token was spent
    Admitted { remaining: u32 },
    /// Rejected; nothing was spent
    Limited { retry_after: Duration },
}

impl Decision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admitted { .. })
    }
}

/// Token state for one identity.
#[derive(Debug)]
struct RateBucket {
    /// Times tokens were spent, oldest first; never longer than capacity
    spent: VecDeque<i64>,
    last_seen_ms: i64,
}

impl RateBucket {
    fn new(now: i64) -> Self {
        Self {
            spent: VecDeque::new(),
            last_seen_ms: now,
        }
    }

    /// Return tokens whose window has elapsed.
    fn refill(&mut self, now: i64, window_ms: i64) {
        while let Some(&oldest) = self.spent.front() {
            if now - oldest >= window_ms {
                self.spent.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Token-bucket rate limiter keyed by identity.
pub struct RateLimiter {
    buckets: DashMap<String, RateBucket>,
    config: RateLimitConfig,
    clock: SharedClock,
    checks: AtomicU64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, clock: SharedClock) -> Self {
        Self {
            buckets: DashMap::new(),
            config,
            clock,
            checks: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn window_ms(&self) -> i64 {
        self.config.window.as_millis() as i64
    }

    /// Spend one token for `key` if available.
    pub fn check(&self, key: &str) -> Decision {
        if self.checks.fetch_add(1, Ordering::Relaxed) % CLEANUP_EVERY == CLEANUP_EVERY - 1 {
            self.cleanup();
        }

        let now = self.clock.now_ms();
        let window_ms = self.window_ms();
        let capacity = self.config.capacity as usize;

        // The entry guard holds the shard lock for the whole read-modify-write.
        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| RateBucket::new(now));

        bucket.refill(now, window_ms);
        bucket.last_seen_ms = now;

        if bucket.spent.len() < capacity {
            bucket.spent.push_back(now);
            let remaining = (capacity - bucket.spent.len()) as u32;
            Decision::Admitted { remaining }
        } else {
            let wait_ms = bucket
                .spent
                .front()
                .map(|oldest| (oldest + window_ms - now).max(1))
                .unwrap_or(window_ms);
            debug!(key, wait_ms, "Rate limited");
            Decision::Limited {
                retry_after: Duration::from_millis(wait_ms as u64),
            }
        }
    }

    /// Convenience wrapper over [`check`](Self::check).
    pub fn try_admit(&self, key: &str) -> bool {
        self.check(key).is_admitted()
    }

    /// Tokens `key` could spend right now, without spending any.
    pub fn available(&self, key: &str) -> u32 {
        let now = self.clock.now_ms();
        let window_ms = self.window_ms();
        match self.buckets.get_mut(key) {
            Some(mut bucket) => {
                bucket.refill(now, window_ms);
                self.config.capacity.saturating_sub(bucket.spent.len() as u32)
            }
            None => self.config.capacity,
        }
    }

    /// Drop buckets idle past the idle TTL. Returns how many were dropped.
    ///
    /// A bucket is never dropped while it may still hold spent tokens.
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now_ms();
        let idle_ms = self
            .config
            .idle_ttl
            .max(self.config.window)
            .as_millis() as i64;

        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| now - bucket.last_seen_ms <= idle_ms);
        let removed = before.saturating_sub(self.buckets.len());

        if removed > 0 {
            info!(removed, "Dropped idle rate buckets");
        }
        removed
    }

    /// Tracked identities
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
