//! Token-bucket rate limiting for the dispatch pipeline.
//!
//! The dispatcher keys buckets by `(principal id | client ip, identifier)`
//! and passes each definition's `(max, window)` budget; buckets with
//! heterogeneous budgets coexist in one limiter.

use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use onegate_core::RateGate;

struct TokenBucket {
    tokens: f64,
    max_tokens: f64,
    window: Duration,
    last_refill: Instant,
}

/// Refill tokens based on elapsed time and try to consume one.
/// Returns `true` if a token was consumed, `false` if rate-limited.
#[inline]
fn refill_and_try_consume(bucket: &mut TokenBucket) -> bool {
    let now = Instant::now();
    let elapsed = now.duration_since(bucket.last_refill);
    let refill = (elapsed.as_secs_f64() / bucket.window.as_secs_f64()) * bucket.max_tokens;
    bucket.tokens = (bucket.tokens + refill).min(bucket.max_tokens);
    bucket.last_refill = now;

    if bucket.tokens >= 1.0 {
        bucket.tokens -= 1.0;
        true
    } else {
        false
    }
}

/// A token-bucket rate limiter keyed by an arbitrary type with one fixed
/// budget. Each key gets its own independent bucket.
#[derive(Clone)]
pub struct RateLimiter<K> {
    buckets: Arc<DashMap<K, TokenBucket>>,
    max_tokens: f64,
    window: Duration,
}

impl<K: Eq + Hash + Clone> RateLimiter<K> {
    /// Create a rate limiter that allows `max` requests per `window`.
    pub fn new(max: u64, window: Duration) -> Self {
        Self {
            buckets: Arc::new(DashMap::new()),
            max_tokens: max as f64,
            window,
        }
    }

    /// Try to consume one token for the given key.
    pub fn try_acquire(&self, key: &K) -> bool {
        let mut entry = self
            .buckets
            .entry(key.clone())
            .or_insert_with(|| TokenBucket {
                tokens: self.max_tokens,
                max_tokens: self.max_tokens,
                window: self.window,
                last_refill: Instant::now(),
            });
        refill_and_try_consume(entry.value_mut())
    }
}

/// In-memory limiter with per-key budgets: each key's bucket adopts the
/// `(max, window)` of the first call for that key. This is the [`RateGate`]
/// the dispatcher consumes.
#[derive(Clone, Default)]
pub struct InMemoryRateLimiter {
    buckets: Arc<DashMap<String, TokenBucket>>,
}

impl InMemoryRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateGate for InMemoryRateLimiter {
    fn try_acquire(&self, key: &str, max: u64, window: Duration) -> bool {
        let mut entry = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket {
                tokens: max as f64,
                max_tokens: max as f64,
                window,
                last_refill: Instant::now(),
            });
        refill_and_try_consume(entry.value_mut())
    }
}
