//! Fixed-window per-conversation rate limiting.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

/// In-process fixed-window limiter keyed by conversation id.
///
/// Keeps the most recent request timestamps per key (capacity = limit);
/// timestamps older than the window are dropped from the front on each
/// check. Not distributed, not persisted.
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    buckets: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn buckets(&self) -> MutexGuard<'_, HashMap<String, VecDeque<Instant>>> {
        self.buckets.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a request for `key`, or fail with the wait until the oldest
    /// request in the window expires.
    pub fn check(&self, key: &str) -> Result<(), Duration> {
        let mut buckets = self.buckets();
        let timestamps = buckets.entry(key.to_string()).or_default();

        let now = Instant::now();
        while timestamps
            .front()
            .is_some_and(|t| now.duration_since(*t) > self.window)
        {
            timestamps.pop_front();
        }

        if timestamps.len() >= self.limit {
            if let Some(oldest) = timestamps.front() {
                return Err((*oldest + self.window).saturating_duration_since(now));
            }
        }

        timestamps.push_back(now);
        Ok(())
    }
}
