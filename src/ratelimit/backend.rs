//! The limiter contract and backend selection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use super::limiter::MemoryLimiter;
use super::sharded::ShardedLimiter;
use super::sweeper::{Sweeper, SweeperHandle};
use crate::config::{BackendKind, RateLimitingConfig};
use crate::error::Result;

/// Trait for rate limiter implementations.
///
/// The request layer depends only on this contract, so the in-memory stores
/// can be replaced by a remote-backed one without touching callers. An `Err`
/// is a store failure and must never be read as either allow or deny.
#[async_trait]
pub trait Limiter: Send + Sync {
    /// Count one call against `key` and decide whether it may proceed, given
    /// at most `rate` calls per `window`.
    async fn allow(&self, key: &str, rate: u32, window: Duration) -> Result<bool>;

    /// Forget everything counted against `key`.
    async fn reset(&self, key: &str) -> Result<()>;

    /// Calls counted against `key` in its current window, zero if none.
    async fn get_count(&self, key: &str) -> Result<u32>;
}

/// Build the configured limiter and start its sweeper.
///
/// The caller owns the returned handle and is expected to shut it down.
pub fn start(config: &RateLimitingConfig) -> Result<(Arc<dyn Limiter>, SweeperHandle)> {
    let interval = config.sweep_interval();

    let started = match config.backend {
        BackendKind::Memory => {
            let limiter = Arc::new(MemoryLimiter::new());
            let sweeper = Sweeper::spawn(&limiter, interval)?;
            (limiter as Arc<dyn Limiter>, sweeper)
        }
        BackendKind::Sharded => {
            let limiter = Arc::new(match config.shards {
                Some(shards) => ShardedLimiter::with_shards(shards)?,
                None => ShardedLimiter::new(),
            });
            let sweeper = Sweeper::spawn(&limiter, interval)?;
            (limiter as Arc<dyn Limiter>, sweeper)
        }
    };

    info!(backend = ?config.backend, "Rate limiter initialized");
    Ok(started)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_memory_backend() {
        let (limiter, sweeper) = start(&RateLimitingConfig::default()).unwrap();

        assert!(limiter.allow("k", 1, Duration::from_secs(1)).await.unwrap());
        assert!(!limiter.allow("k", 1, Duration::from_secs(1)).await.unwrap());
        assert_eq!(limiter.get_count("k").await.unwrap(), 1);

        sweeper.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_sharded_backend() {
        let config = RateLimitingConfig {
            backend: BackendKind::Sharded,
            shards: Some(8),
            ..Default::default()
        };
        let (limiter, sweeper) = start(&config).unwrap();

        assert!(limiter.allow("k", 2, Duration::from_secs(1)).await.unwrap());
        limiter.reset("k").await.unwrap();
        assert_eq!(limiter.get_count("k").await.unwrap(), 0);

        sweeper.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_rejects_bad_shard_count() {
        let config = RateLimitingConfig {
            backend: BackendKind::Sharded,
            shards: Some(3),
            ..Default::default()
        };
        assert!(start(&config).is_err());
    }
}
