//! Automatic retention and cleanup of the check log.
//!
//! Checks older than the retention window are deleted periodically as a
//! background task. Incidents are kept.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::database::Database;

/// Retention policy for the check log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    /// Days to keep checks
    pub check_retention_days: i64,
    /// Seconds between cleanup runs
    pub cleanup_interval_secs: u64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { check_retention_days: 30, cleanup_interval_secs: 3600 }
    }
}

impl RetentionPolicy {
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.check_retention_days)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}

/// Cleanup manager for expired checks
pub struct RetentionCleanup {
    database: Arc<dyn Database>,
    policy: RetentionPolicy,
}

impl RetentionCleanup {
    /// Create a new retention cleanup manager
    pub fn new(database: Arc<dyn Database>, policy: RetentionPolicy) -> Self {
        Self { database, policy }
    }

    /// Delete checks past the retention window
    pub async fn cleanup_expired_checks(&self) -> Result<u64> {
        debug!("Pruning checks older than {} days", self.policy.check_retention_days);
        let deleted = self.database.prune_checks_older_than(self.policy.retention()).await?;
        info!("Retention cleanup completed: {} checks deleted", deleted);
        Ok(deleted)
    }

    /// Start background cleanup task, stops when `shutdown` flips to true
    pub fn start_periodic_cleanup(self, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.policy.cleanup_interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = self.cleanup_expired_checks().await {
                            warn!("Periodic check cleanup failed: {e:#}");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}
