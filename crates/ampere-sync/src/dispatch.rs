//! # Dispatcher
//!
//! Runs fire-and-forget work (pushes, command posts, async pulls) as tracked
//! tasks. Every task ends in a completion log line, and shutdown waits for
//! the tasks still in flight.

use std::future::Future;
use std::time::Duration;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::SyncResult;

/// Spawner for detached, supervised tasks.
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    tracker: TaskTracker,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `task`; its outcome is logged with `label` and `platform_id`.
    pub fn spawn<F>(&self, label: &'static str, platform_id: impl Into<String>, task: F)
    where
        F: Future<Output = SyncResult<()>> + Send + 'static,
    {
        let platform_id = platform_id.into();
        self.tracker.spawn(async move {
            match task.await {
                Ok(()) => debug!(task = label, platform_id = %platform_id, "Dispatch completed"),
                Err(e) => error!(task = label, platform_id = %platform_id, error = %e, "Dispatch failed"),
            }
        });
    }

    /// Number of tasks still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Waits until every task spawned so far has finished, then accepts new ones again.
    pub async fn settle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Stops accepting new work and waits for in-flight tasks, up to `timeout`.
    ///
    /// Returns false when tasks were still running at the deadline.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.tracker.close();
        let pending = self.tracker.len();
        if pending > 0 {
            info!(pending, "Draining in-flight dispatches");
        }
        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(remaining = self.tracker.len(), "Dispatch drain timed out");
                false
            }
        }
    }
}
