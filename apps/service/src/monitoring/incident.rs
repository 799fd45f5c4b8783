//! Incident lifecycle.
//!
//! The tracker reacts to a single status per call: a down status with no open
//! incident opens one, an up status with an open incident resolves it, and
//! everything else is a no-op. Debouncing happens before the tracker through
//! [`FailureStreak`].

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::database::Database;
use crate::database::models::Incident;
use crate::monitoring::types::CheckStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    Started,
    Resolved,
}

impl std::fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransitionKind::Started => write!(f, "started"),
            TransitionKind::Resolved => write!(f, "resolved"),
        }
    }
}

/// Outcome of feeding one status into the tracker
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    None,
    Started(Incident),
    Resolved(Incident),
}

impl Transition {
    pub fn kind(&self) -> Option<TransitionKind> {
        match self {
            Transition::None => None,
            Transition::Started(_) => Some(TransitionKind::Started),
            Transition::Resolved(_) => Some(TransitionKind::Resolved),
        }
    }

    pub fn incident(&self) -> Option<&Incident> {
        match self {
            Transition::None => None,
            Transition::Started(incident) | Transition::Resolved(incident) => Some(incident),
        }
    }
}

/// Opens and resolves incidents in storage
pub struct IncidentTracker {
    database: Arc<dyn Database>,
}

impl IncidentTracker {
    pub fn new(database: Arc<dyn Database>) -> Self {
        Self { database }
    }

    /// Apply a status observed at `at`. Callers serialise calls per resource.
    pub async fn observe(
        &self,
        resource_id: Uuid,
        status: CheckStatus,
        at: DateTime<Utc>,
    ) -> Result<Transition> {
        let open = self.database.get_open_incident(resource_id).await?;

        match (status, open) {
            (CheckStatus::Down, None) => {
                let incident = self.database.create_incident(resource_id, at).await?;
                Ok(Transition::Started(incident))
            }
            (CheckStatus::Up, Some(mut incident)) => {
                let resolved_at = at.max(incident.started_at);
                self.database.resolve_incident(incident.id, resolved_at).await?;
                incident.resolved_at = Some(resolved_at);
                Ok(Transition::Resolved(incident))
            }
            _ => Ok(Transition::None),
        }
    }

    pub async fn acknowledge(&self, incident_id: i64, acknowledged_by: &str) -> Result<()> {
        self.database.acknowledge_incident(incident_id, acknowledged_by, Utc::now()).await
    }
}

/// Consecutive failure counter for one resource
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailureStreak {
    consecutive_failures: u32,
}

impl FailureStreak {
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Record a probe status and return the status to report to the tracker.
    ///
    /// Up is always reported and resets the streak. Down is reported once the
    /// streak reaches `threshold` (0 and 1 both mean the first failure).
    pub fn record(&mut self, status: CheckStatus, threshold: u32) -> Option<CheckStatus> {
        match status {
            CheckStatus::Up => {
                self.consecutive_failures = 0;
                Some(CheckStatus::Up)
            }
            CheckStatus::Down => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                (self.consecutive_failures >= threshold.max(1)).then_some(CheckStatus::Down)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_database;
    use chrono::Duration;

    #[tokio::test]
    async fn test_down_then_down_opens_single_incident() -> Result<()> {
        let (database, _dir) = test_database().await?;
        let database: Arc<dyn Database> = Arc::new(database);
        let tracker = IncidentTracker::new(database.clone());
        let resource_id = Uuid::new_v4();
        let now = Utc::now();

        let first = tracker.observe(resource_id, CheckStatus::Down, now).await?;
        assert_eq!(first.kind(), Some(TransitionKind::Started));

        let second = tracker.observe(resource_id, CheckStatus::Down, now + Duration::seconds(30)).await?;
        assert_eq!(second, Transition::None);

        let open = database.get_open_incident(resource_id).await?.unwrap();
        assert_eq!(Some(&open), first.incident());
        Ok(())
    }

    #[tokio::test]
    async fn test_up_resolves_open_incident() -> Result<()> {
        let (database, _dir) = test_database().await?;
        let database: Arc<dyn Database> = Arc::new(database);
        let tracker = IncidentTracker::new(database.clone());
        let resource_id = Uuid::new_v4();
        let now = Utc::now();

        tracker.observe(resource_id, CheckStatus::Down, now).await?;
        let resolved = tracker.observe(resource_id, CheckStatus::Up, now + Duration::minutes(3)).await?;

        let Transition::Resolved(incident) = resolved else {
            panic!("expected a resolved transition, got {resolved:?}");
        };
        assert!(incident.resolved_at.unwrap() >= incident.started_at);
        assert_eq!(incident.duration().unwrap().num_seconds(), 180);
        assert!(database.get_open_incident(resource_id).await?.is_none());

        let again = tracker.observe(resource_id, CheckStatus::Up, now + Duration::minutes(4)).await?;
        assert_eq!(again, Transition::None);
        Ok(())
    }

    #[tokio::test]
    async fn test_resolution_never_precedes_start() -> Result<()> {
        let (database, _dir) = test_database().await?;
        let tracker = IncidentTracker::new(Arc::new(database));
        let resource_id = Uuid::new_v4();
        let now = Utc::now();

        tracker.observe(resource_id, CheckStatus::Down, now).await?;
        let resolved = tracker.observe(resource_id, CheckStatus::Up, now - Duration::seconds(5)).await?;

        let incident = resolved.incident().unwrap();
        assert_eq!(incident.resolved_at, Some(incident.started_at));
        Ok(())
    }

    #[tokio::test]
    async fn test_acknowledge() -> Result<()> {
        let (database, _dir) = test_database().await?;
        let database: Arc<dyn Database> = Arc::new(database);
        let tracker = IncidentTracker::new(database.clone());
        let resource_id = Uuid::new_v4();

        let started = tracker.observe(resource_id, CheckStatus::Down, Utc::now()).await?;
        tracker.acknowledge(started.incident().unwrap().id, "alice").await?;

        let open = database.get_open_incident(resource_id).await?.unwrap();
        assert_eq!(open.acknowledged_by.as_deref(), Some("alice"));
        assert!(open.acknowledged_at.is_some());
        Ok(())
    }

    #[test]
    fn test_failure_streak_threshold() {
        let mut streak = FailureStreak::default();

        assert_eq!(streak.record(CheckStatus::Down, 3), None);
        assert_eq!(streak.record(CheckStatus::Down, 3), None);
        assert_eq!(streak.record(CheckStatus::Down, 3), Some(CheckStatus::Down));
        assert_eq!(streak.record(CheckStatus::Down, 3), Some(CheckStatus::Down));
        assert_eq!(streak.consecutive_failures(), 4);

        assert_eq!(streak.record(CheckStatus::Up, 3), Some(CheckStatus::Up));
        assert_eq!(streak.consecutive_failures(), 0);
        assert_eq!(streak.record(CheckStatus::Down, 3), None);
    }

    #[test]
    fn test_failure_streak_zero_threshold_reports_first_failure() {
        let mut streak = FailureStreak::default();
        assert_eq!(streak.record(CheckStatus::Down, 0), Some(CheckStatus::Down));
    }
}
