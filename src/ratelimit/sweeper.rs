//! Background eviction of expired buckets.
//!
//! Without a sweeper the bucket map grows with every key ever seen, which is
//! unbounded when keys carry caller addresses. The sweeper keeps it bounded by
//! the number of keys active within their window.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::clock::millis;
use crate::error::{GatekeeperError, Result};

/// A store whose expired entries can be evicted in bulk.
pub trait Sweep: Send + Sync + 'static {
    /// Remove every bucket whose window has ended. Returns how many were removed.
    fn sweep_expired(&self) -> usize;
}

/// Periodic sweeper task spawner.
pub struct Sweeper;

impl Sweeper {
    /// Spawn a task sweeping `store` every `interval`.
    ///
    /// The first sweep happens one full interval after spawning. The task
    /// holds only a weak reference, so it also ends once the store is
    /// dropped. Must be called from within a tokio runtime.
    pub fn spawn<S: Sweep>(store: &Arc<S>, interval: Duration) -> Result<SweeperHandle> {
        if interval.is_zero() {
            return Err(GatekeeperError::Config(
                "sweep interval must be greater than zero".to_string(),
            ));
        }

        let store = Arc::downgrade(store);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run(store, interval, shutdown_rx));

        info!(interval_ms = millis(interval), "Bucket sweeper started");

        Ok(SweeperHandle {
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }
}

async fn run<S: Sweep>(store: Weak<S>, interval: Duration, mut shutdown: oneshot::Receiver<()>) {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                let Some(store) = store.upgrade() else {
                    debug!("Bucket store dropped, sweeper exiting");
                    break;
                };
                let evicted = store.sweep_expired();
                debug!(evicted = evicted, "Swept expired rate limit buckets");
            }
        }
    }
}

/// Owner of a running sweeper task.
///
/// Dropping the handle aborts the task; [`SweeperHandle::shutdown`] stops it
/// and waits for it to finish.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for the task to exit.
    pub async fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            // The task may already have exited on its own.
            let _ = shutdown.send(());
        }

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Bucket sweeper task failed");
            }
        }

        info!("Bucket sweeper stopped");
    }

    /// Whether the sweeper task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
