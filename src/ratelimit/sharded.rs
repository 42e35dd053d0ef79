//! Sharded fixed-window rate limiter.
//!
//! Same semantics as [`MemoryLimiter`](super::MemoryLimiter), but the key
//! space is hashed across independently locked shards so callers on
//! different keys rarely contend for the same lock.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::trace;

use super::backend::Limiter;
use super::bucket::{admit, Bucket};
use super::clock::{Clock, SystemClock};
use super::sweeper::Sweep;
use crate::error::{GatekeeperError, Result};

/// A rate limiter backed by a sharded concurrent map.
///
/// Each key lives in exactly one shard, and every read-modify-write on it,
/// including opening a bucket for a key never seen before, runs under that
/// shard's lock. Per-key decisions are therefore as strict as with a single
/// map-wide lock.
pub struct ShardedLimiter<C = SystemClock> {
    /// Buckets indexed by key
    buckets: DashMap<String, Bucket>,
    /// Time source for window bookkeeping
    clock: C,
}

impl ShardedLimiter {
    /// Create a new limiter with the default shard count.
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    /// Create a new limiter with `shards` partitions.
    ///
    /// `shards` must be a power of two and at least 2.
    pub fn with_shards(shards: usize) -> Result<Self> {
        Self::with_shards_and_clock(shards, SystemClock)
    }
}

impl Default for ShardedLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> ShardedLimiter<C> {
    /// Create a new limiter reading time from `clock`.
    pub fn with_clock(clock: C) -> Self {
        Self {
            buckets: DashMap::new(),
            clock,
        }
    }

    /// Create a new limiter with `shards` partitions, reading time from `clock`.
    pub fn with_shards_and_clock(shards: usize, clock: C) -> Result<Self> {
        if shards < 2 || !shards.is_power_of_two() {
            return Err(GatekeeperError::Config(format!(
                "shard count must be a power of two and at least 2, got {}",
                shards
            )));
        }

        Ok(Self {
            buckets: DashMap::with_shard_amount(shards),
            clock,
        })
    }

    /// Count one call against `key` and decide whether it may proceed.
    pub fn try_acquire(&self, key: &str, rate: u32, window: Duration) -> bool {
        let mut allowed = true;

        self.buckets
            .entry(key.to_owned())
            .and_modify(|bucket| {
                let (admitted, fresh) = admit(Some(&mut *bucket), self.clock.now(), rate, window);
                allowed = admitted;
                if let Some(fresh) = fresh {
                    *bucket = fresh;
                }
            })
            .or_insert_with(|| Bucket::open(self.clock.now(), window));

        trace!(key = %key, allowed = allowed, "Rate limit decision");
        allowed
    }

    /// Forget the bucket for `key`. Returns whether one was stored.
    pub fn remove(&self, key: &str) -> bool {
        self.buckets.remove(key).is_some()
    }

    /// Calls counted against `key` in its current window.
    pub fn current_count(&self, key: &str) -> u32 {
        let now = self.clock.now();
        self.buckets
            .get(key)
            .map_or(0, |bucket| bucket.count_at(now))
    }

    /// Time left in the current window for `key`, or `None` if it has no
    /// live bucket.
    pub fn time_until_reset(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now();
        self.buckets
            .get(key)
            .filter(|bucket| !bucket.is_expired(now))
            .map(|bucket| bucket.duration_until_reset(now))
    }

    /// Number of stored buckets, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether no buckets are stored.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[async_trait]
impl<C: Clock> Limiter for ShardedLimiter<C> {
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

impl<C: Clock> Sweep for ShardedLimiter<C> {
    fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut evicted = 0;

        self.buckets.retain(|_, bucket| {
            let keep = !bucket.is_expired(now);
            if !keep {
                evicted += 1;
            }
            keep
        });

        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::ManualClock;
    use std::sync::Arc;

    const WINDOW: Duration = Duration::from_secs(2);

    #[test]
    fn test_shard_count_validation() {
        assert!(ShardedLimiter::with_shards(8).is_ok());
        assert!(ShardedLimiter::with_shards(0).is_err());
        assert!(ShardedLimiter::with_shards(1).is_err());
        assert!(ShardedLimiter::with_shards(6).is_err());
    }

    #[test]
    fn test_fixed_window_scenario() {
        let clock = ManualClock::new();
        let limiter = ShardedLimiter::with_shards_and_clock(4, clock.clone()).unwrap();

        assert!(limiter.try_acquire("league:caller", 3, WINDOW));
        assert!(limiter.try_acquire("league:caller", 3, WINDOW));
        assert!(limiter.try_acquire("league:caller", 3, WINDOW));
        assert!(!limiter.try_acquire("league:caller", 3, WINDOW));
        assert_eq!(limiter.current_count("league:caller"), 3);
        assert_eq!(limiter.time_until_reset("league:caller"), Some(WINDOW));

        clock.advance(Duration::from_millis(2100));

        assert_eq!(limiter.time_until_reset("league:caller"), None);

        assert_eq!(limiter.current_count("league:caller"), 0);
        assert!(limiter.try_acquire("league:caller", 3, WINDOW));
        assert_eq!(limiter.current_count("league:caller"), 1);
    }

    #[test]
    fn test_remove_and_unseen_keys() {
        let limiter = ShardedLimiter::with_clock(ManualClock::new());

        assert_eq!(limiter.current_count("nobody"), 0);
        assert!(limiter.is_empty());

        assert!(limiter.try_acquire("key", 1, WINDOW));
        assert!(!limiter.try_acquire("key", 1, WINDOW));
        assert!(limiter.remove("key"));
        assert!(limiter.try_acquire("key", 1, WINDOW));
        assert_eq!(limiter.current_count("key"), 1);
    }

    #[test]
    fn test_sweep_evicts_only_expired() {
        let clock = ManualClock::new();
        let limiter = ShardedLimiter::with_clock(clock.clone());

        for caller in 0..32 {
            limiter.try_acquire(&format!("summoner:{}", caller), 10, Duration::from_secs(1));
        }
        limiter.try_acquire("match-list:keeper", 10, Duration::from_secs(60));

        clock.advance(Duration::from_secs(2));

        assert_eq!(limiter.sweep_expired(), 32);
        assert_eq!(limiter.len(), 1);
        assert_eq!(limiter.current_count("match-list:keeper"), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_callers_admit_exactly_rate() {
        const RATE: u32 = 40;
        const CALLERS: usize = 300;

        let limiter = Arc::new(ShardedLimiter::with_shards(16).unwrap());
        let tasks: Vec<_> = (0..CALLERS)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    limiter.allow("hot-key", RATE, Duration::from_secs(60)).await
                })
            })
            .collect();

        let allowed = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .filter(|allowed| *allowed)
            .count();

        assert_eq!(allowed, RATE as usize);
        assert_eq!(limiter.get_count("hot-key").await.unwrap(), RATE);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_calls_on_new_key() {
        let limiter = Arc::new(ShardedLimiter::new());
        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.allow("fresh", 1, Duration::from_secs(60)).await })
            })
            .collect();

        let allowed = futures::future::join_all(tasks)
            .await
            .into_iter()
            .filter(|joined| matches!(joined, Ok(Ok(true))))
            .count();

        assert_eq!(allowed, 1);
    }
}
