//! In-memory fixed-window rate limiter.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, trace};

use super::backend::Limiter;
use super::bucket::{admit, Bucket};
use super::clock::{millis, Clock, SystemClock};
use super::sweeper::Sweep;
use crate::error::Result;

/// The reference rate limiter: one bucket map behind a single lock.
///
/// `allow`, `reset` and sweeps take the write lock for their whole
/// read-modify-write, so two callers racing on the same key can never both
/// see room in a full window. Counts are read under the shared lock.
///
/// Windows are fixed, not sliding: a caller can spend a full quota at the
/// tail of one window and another at the head of the next.
pub struct MemoryLimiter<C = SystemClock> {
    /// Buckets indexed by key
    buckets: RwLock<HashMap<String, Bucket>>,
    /// Time source for window bookkeeping
    clock: C,
}

impl MemoryLimiter {
    /// Create a new limiter on the runtime clock.
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for MemoryLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> MemoryLimiter<C> {
    /// Create a new limiter reading time from `clock`.
    pub fn with_clock(clock: C) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Count one call against `key` and decide whether it may proceed.
    pub fn try_acquire(&self, key: &str, rate: u32, window: Duration) -> bool {
        let mut buckets = self.buckets.write();
        let now = self.clock.now();

        let (allowed, fresh) = admit(buckets.get_mut(key), now, rate, window);
        if let Some(bucket) = fresh {
            debug!(
                key = %key,
                rate = rate,
                window_ms = millis(window),
                "Opening rate limit window"
            );
            buckets.insert(key.to_owned(), bucket);
        }

        trace!(key = %key, allowed = allowed, "Rate limit decision");
        allowed
    }

    /// Forget the bucket for `key`. Returns whether one was stored.
    pub fn remove(&self, key: &str) -> bool {
        self.buckets.write().remove(key).is_some()
    }

    /// Calls counted against `key` in its current window.
    pub fn current_count(&self, key: &str) -> u32 {
        let buckets = self.buckets.read();
        let now = self.clock.now();
        buckets.get(key).map_or(0, |bucket| bucket.count_at(now))
    }

    /// Time left in the current window for `key`, or `None` if it has no
    /// live bucket. Useful for a `Retry-After` hint.
    pub fn time_until_reset(&self, key: &str) -> Option<Duration> {
        let buckets = self.buckets.read();
        let now = self.clock.now();
        buckets
            .get(key)
            .filter(|bucket| !bucket.is_expired(now))
            .map(|bucket| bucket.duration_until_reset(now))
    }

    /// Number of stored buckets, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.buckets.read().len()
    }

    /// Whether no buckets are stored.
    pub fn is_empty(&self) -> bool {
        self.buckets.read().is_empty()
    }
}

#[async_trait]
impl<C: Clock> Limiter for MemoryLimiter<C> {
    async fn allow(&self, key: &str, rate: u32, window: Duration) -> Result<bool> {
        Ok(self.try_acquire(key, rate, window))
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.remove(key);
        Ok(())
    }

    async fn get_count(&self, key: &str) -> Result<u32> {
        Ok(self.current_count(key))
    }
}

impl<C: Clock> Sweep for MemoryLimiter<C> {
    fn sweep_expired(&self) -> usize {
        let mut buckets = self.buckets.write();
        let now = self.clock.now();
        let before = buckets.len();
        buckets.retain(|_, bucket| !bucket.is_expired(now));
        before - buckets.len()
    }
}
