//! Fixed-window rate limiting

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Bucket table size at which expired entries are swept
const CLEANUP_THRESHOLD: usize = 2000;

/// Admission check keyed by an arbitrary string (phone, chat id, "global")
pub trait RateLimiter: Send + Sync {
    /// Returns true if the event is admitted
    fn allow(&self, key: &str) -> bool;
}

/// Limiter that admits everything
pub struct NoopLimiter;

impl RateLimiter for NoopLimiter {
    fn allow(&self, _key: &str) -> bool {
        true
    }
}

struct Bucket {
    count: u32,
    reset_at: Instant,
}

/// Fixed-window limiter: at most `limit` events per key per `window`.
///
/// State is process-local and lost on restart. A saturated window denies
/// without mutating the bucket; expired buckets are swept lazily once the
/// table grows past a threshold.
pub struct FixedWindowLimiter {
    limit: u32,
    window: Duration,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl FixedWindowLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            buckets: Mutex::new(HashMap::new()),
        }
    }
}

impl RateLimiter for FixedWindowLimiter {
    fn allow(&self, key: &str) -> bool {
        if self.limit == 0 {
            return true;
        }

        let now = Instant::now();
        let mut buckets = self.buckets.lock().unwrap();

        if buckets.len() >= CLEANUP_THRESHOLD {
            buckets.retain(|_, b| b.reset_at > now);
        }

        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            count: 0,
            reset_at: now + self.window,
        });

        if now >= bucket.reset_at {
            bucket.count = 0;
            bucket.reset_at = now + self.window;
        }

        if bucket.count >= self.limit {
            return false;
        }

        bucket.count += 1;
        true
    }
}
