//! Background retention sweeper.
//!
//! Periodically deletes messages whose expiry timestamp has passed. When no
//! message TTL is configured, messages carry no expiry and each sweep is a
//! no-op.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chat::core::config::RetentionConfig;
use crate::chat::storage::conversation_store::{ConversationStore, StoreResult};

/// Statistics from a single sweep run.
#[derive(Debug, Clone, Default)]
pub struct SweepStats {
    /// Number of expired messages deleted.
    pub expired_deleted: u64,
    /// Total sweep duration in milliseconds.
    pub duration_ms: u64,
}

/// Background worker deleting expired messages on an interval.
pub struct RetentionSweeper {
    store: Arc<dyn ConversationStore>,
    config: RetentionConfig,
    shutdown: Arc<Notify>,
}

impl RetentionSweeper {
    /// Create a new retention sweeper.
    #[must_use]
    pub fn new(store: Arc<dyn ConversationStore>, config: RetentionConfig) -> Self {
        Self {
            store,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a shutdown notifier to stop the sweeper.
    #[must_use]
    pub fn shutdown_notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    /// Spawn the sweeper as a tokio task.
    ///
    /// Returns a `JoinHandle` that can be used to await completion.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run the sweep loop until shutdown is signaled.
    async fn run(&self) {
        if !self.config.enabled {
            info!("Retention sweeper is disabled");
            return;
        }

        let interval = Duration::from_secs(self.config.interval_seconds);
        info!(?interval, "Starting retention sweeper");

        loop {
            tokio::select! {
                () = tokio::time::sleep(interval) => {
                    match self.run_sweep().await {
                        Ok(stats) => {
                            if stats.expired_deleted > 0 {
                                info!(
                                    expired = stats.expired_deleted,
                                    duration_ms = stats.duration_ms,
                                    "Retention sweep completed"
                                );
                            } else {
                                debug!("Retention sweep completed with nothing to remove");
                            }
                        }
                        Err(err) => {
                            warn!(?err, "Retention sweep failed");
                        }
                    }
                }
                () = self.shutdown.notified() => {
                    info!("Retention sweeper shutting down");
                    break;
                }
            }
        }
    }

    /// Run a single sweep cycle.
    ///
    /// # Errors
    /// Returns an error if the store delete fails.
    pub async fn run_sweep(&self) -> StoreResult<SweepStats> {
        let start = std::time::Instant::now();
        let expired_deleted = self.store.delete_expired_messages(Utc::now()).await?;

        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = start.elapsed().as_millis() as u64;

        Ok(SweepStats {
            expired_deleted,
            duration_ms,
        })
    }
}
