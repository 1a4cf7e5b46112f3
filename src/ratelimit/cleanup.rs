//! Periodic background sweep of expired records.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::store::RateLimitStore;

/// Default interval between sweeps.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Handle to a running cleanup task.
///
/// The task runs `cleanup()` on a fixed interval, independently of request
/// traffic. Call [`stop`](CleanupTask::stop) to end it and wait for the last
/// sweep; dropping the handle aborts the task.
pub struct CleanupTask {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl CleanupTask {
    /// Spawn the sweep loop on the current tokio runtime.
    pub fn start(stores: Vec<Arc<dyn RateLimitStore>>, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        info!(
            interval_ms = interval.as_millis() as u64,
            stores = stores.len(),
            "Starting rate limit cleanup task"
        );

        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            // Skip immediate first tick
            timer.tick().await;

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = timer.tick() => {
                        let removed: usize = stores.iter().map(|store| store.cleanup()).sum();
                        debug!(removed = removed, "Cleanup sweep finished");
                    }
                }
            }

            info!("Rate limit cleanup task stopped");
        });

        Self {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Whether the sweep loop is still running.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the task to stop and wait for it to exit.
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Cleanup task ended abnormally");
            }
        }
    }
}

impl Drop for CleanupTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::store::{create_store, StoreKind};

    #[tokio::test]
    async fn test_cleanup_task_sweeps_expired_records() {
        let clock = Arc::new(ManualClock::new(0));
        let store = create_store(StoreKind::Expiring, 100, clock.clone());

        store.increment("expired", 100);
        store.increment("live", 60_000);
        clock.set(1_000);

        let task = CleanupTask::start(vec![store.clone()], Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(store.size(), 1);
        assert!(store.get("live").is_some());

        task.stop().await;
    }

    #[tokio::test]
    async fn test_stop_ends_task() {
        let clock = Arc::new(ManualClock::new(0));
        let store = create_store(StoreKind::Lru, 10, clock);

        let task = CleanupTask::start(vec![store], Duration::from_millis(10));
        assert!(task.is_running());

        task.stop().await;
    }

    #[tokio::test]
    async fn test_drop_aborts_task() {
        let clock = Arc::new(ManualClock::new(0));
        let store = create_store(StoreKind::Expiring, 10, clock.clone());

        {
            let _task = CleanupTask::start(vec![store.clone()], Duration::from_millis(10));
        }

        // No sweep runs after the handle is dropped
        store.increment("expired", 1);
        clock.set(10);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.size(), 1);
    }
}
