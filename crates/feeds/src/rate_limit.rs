//! Per-credential request budget.
//!
//! The upstream allows a burst of 3 requests per credential and then one
//! request every 20 seconds. Buckets are keyed by credential, not by
//! tenant, so two tenants sharing a token share a budget.

use dashmap::DashMap;
use slotwatch_core::Clock;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Bucket capacity (burst size).
pub const BUCKET_CAPACITY: u32 = 3;

/// Time to refill one token.
pub const REFILL_INTERVAL: Duration = Duration::from_secs(20);

/// Token bucket driven by an external monotonic reading.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    refill_every: Duration,
    tokens: f64,
    last_update: Duration,
}

impl TokenBucket {
    /// Full bucket as of `now`.
    pub fn new(capacity: u32, refill_every: Duration, now: Duration) -> Self {
        Self {
            capacity: capacity as f64,
            refill_every,
            tokens: capacity as f64,
            last_update: now,
        }
    }

    /// Bucket with the upstream's fixed limits.
    pub fn upstream(now: Duration) -> Self {
        Self::new(BUCKET_CAPACITY, REFILL_INTERVAL, now)
    }

    fn refill(&mut self, now: Duration) {
        let elapsed = now.saturating_sub(self.last_update);
        let added = elapsed.as_secs_f64() / self.refill_every.as_secs_f64();
        self.tokens = (self.tokens + added).min(self.capacity);
        self.last_update = now.max(self.last_update);
    }

    /// Take a token if one is available.
    pub fn try_acquire(&mut self, now: Duration) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Time until the next token. `Duration::ZERO` if one is available now.
    pub fn time_until_available(&mut self, now: Duration) -> Duration {
        self.refill(now);
        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            self.refill_every.mul_f64(1.0 - self.tokens)
        }
    }

    /// Current token count (for testing/monitoring).
    pub fn available_tokens(&mut self, now: Duration) -> f64 {
        self.refill(now);
        self.tokens
    }
}

/// Keyed store of buckets, one per credential.
///
/// Each bucket sits behind its own mutex. The lock is only held for the
/// arithmetic, never across the wait.
pub struct CredentialLimiter {
    buckets: DashMap<String, Arc<Mutex<TokenBucket>>>,
    clock: Arc<dyn Clock>,
}

impl CredentialLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: DashMap::new(),
            clock,
        }
    }

    fn bucket(&self, credential: &str) -> Arc<Mutex<TokenBucket>> {
        let now = self.clock.monotonic();
        self.buckets
            .entry(credential.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(TokenBucket::upstream(now))))
            .clone()
    }

    /// Wait until a token for `credential` is available and take it.
    pub async fn acquire(&self, credential: &str) {
        let bucket = self.bucket(credential);
        loop {
            let wait = {
                let mut guard = bucket.lock().unwrap_or_else(|p| p.into_inner());
                let now = self.clock.monotonic();
                if guard.try_acquire(now) {
                    return;
                }
                guard.time_until_available(now)
            };
            debug!(wait_ms = wait.as_millis() as u64, "Rate limit: waiting for token");
            self.clock.sleep(wait.max(Duration::from_millis(1))).await;
        }
    }

    /// Number of credentials seen so far.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
