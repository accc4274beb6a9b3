//! Shared application state.
//!
//! Holds the pipeline built at startup, the configuration it came from, and
//! the rate limit store, plus the background task that evicts expired rate
//! limit windows.
//!
//! # Structured Concurrency
//!
//! Background tasks are managed using `tokio_util::task::TaskTracker` and
//! `CancellationToken`. Call `shutdown()` to stop them before exit.

use std::sync::Arc;
use std::time::Instant;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace};

use crate::config::Config;
use crate::metrics;
use crate::middleware::rate_limit::{MemoryStore, RateLimitStore};
use crate::pipeline::Pipeline;
use crate::routing::RouteTable;
use crate::routes::build_pipeline;

/// Shared application state.
///
/// Cloned into the axum fallback handler; everything inside is `Arc`.
///
/// # Lifecycle
///
/// ```rust,ignore
/// let state = AppState::new(config, routes)?;
/// // ... serve ...
/// state.shutdown().await;  // Wait for background tasks to complete
/// ```
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub config: Arc<Config>,
    /// Rate limit windows; also owned by the limiter stage
    pub store: Arc<MemoryStore>,
    /// Tracks spawned background tasks for graceful shutdown
    task_tracker: TaskTracker,
    /// Cancellation token for signaling background tasks to stop
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Build the pipeline around `routes` and start background tasks.
    ///
    /// # Errors
    ///
    /// Fails if the rate limiter configuration is rejected.
    pub fn new(config: Config, routes: RouteTable) -> anyhow::Result<Self> {
        let store = Arc::new(MemoryStore::new(config.rate_limit_window));
        let pipeline = build_pipeline(&config, routes, store.clone())?;

        let state = Self {
            pipeline,
            config: Arc::new(config),
            store,
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        };

        if state.config.rate_limiting_enabled() {
            state.spawn_sweep_task();
        }

        Ok(state)
    }

    /// Spawn the expired-window sweep.
    ///
    /// Only the store is moved into the task, not the whole state.
    fn spawn_sweep_task(&self) {
        let store = self.store.clone();
        let period = self.config.rate_limit_sweep_interval;
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await; // Skip first immediate tick

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Rate limit sweep task received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        sweep_once(&store, Instant::now());
                    }
                }
            }

            debug!("Rate limit sweep task shutting down");
        });
    }

    /// Gracefully shutdown all background tasks.
    ///
    /// 1. Signals all tasks to stop via cancellation token
    /// 2. Closes the task tracker (prevents new tasks)
    /// 3. Waits for all tasks to complete
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }

    pub fn background_tasks(&self) -> usize {
        self.task_tracker.len()
    }
}

fn sweep_once(store: &MemoryStore, now: Instant) -> usize {
    let removed = store.sweep(now);
    metrics::set_rate_limit_entries(store.len());
    if removed > 0 {
        debug!(removed, remaining = store.len(), "Swept expired rate limit windows");
    } else {
        trace!(remaining = store.len(), "Rate limit sweep found nothing to evict");
    }
    removed
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_sweep_task_runs_and_stops() {
        let config = Config {
            rate_limit_window: Duration::from_millis(10),
            rate_limit_sweep_interval: Duration::from_millis(20),
            ..Config::default()
        };
        let state = AppState::new(config, RouteTable::new()).unwrap();
        assert_eq!(state.background_tasks(), 1);

        state.store.hit("203.0.113.5", Instant::now());
        assert_eq!(state.store.len(), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(state.store.is_empty());

        state.shutdown().await;
        assert_eq!(state.background_tasks(), 0);
    }

    #[tokio::test]
    async fn test_no_sweep_when_limiting_disabled() {
        let config = Config {
            rate_limit_max: 0,
            ..Config::default()
        };
        let state = AppState::new(config, RouteTable::new()).unwrap();
        assert_eq!(state.background_tasks(), 0);
        state.shutdown().await;
    }

    #[test]
    fn test_sweep_once_reports_removed() {
        let store = MemoryStore::new(Duration::from_secs(1));
        let start = Instant::now();
        store.hit("a", start);
        store.hit("b", start + Duration::from_secs(5));

        assert_eq!(sweep_once(&store, start + Duration::from_secs(5)), 1);
        assert_eq!(store.len(), 1);
    }
}
