//! Availability statistics and SLA reporting, computed on demand from the
//! check log and incident history.

pub mod history;
pub mod metrics;

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::database::Database;
use crate::database::models::Resource;
use crate::monitoring::types::{Check, CheckStatus};

pub use history::{HistoryBucket, bucket_width, bucketize};
pub use metrics::LatencySummary;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub resource_id: Uuid,
    pub window_hours: u32,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub total_checks: u64,
    pub successful_checks: u64,
    pub failed_checks: u64,
    pub uptime_percentage: f64,
    pub avg_response_time_ms: f64,
    pub min_response_time_ms: Option<f64>,
    pub max_response_time_ms: Option<f64>,
    pub p50_response_time_ms: Option<f64>,
    pub p95_response_time_ms: Option<f64>,
    pub p99_response_time_ms: Option<f64>,
    pub incident_count: u64,
    pub total_downtime_minutes: f64,
    /// Set while an incident is open
    pub current_downtime_minutes: Option<f64>,
    pub mttr_minutes: Option<f64>,
    pub mtbf_minutes: Option<f64>,
    pub current_status: Option<CheckStatus>,
    pub last_checked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlaSnapshot {
    pub resource_id: Uuid,
    pub window_days: u32,
    pub sla_target: f64,
    pub actual_uptime: f64,
    pub sla_met: bool,
    pub total_checks: u64,
    pub incident_count: u64,
    pub allowed_downtime_minutes: f64,
    pub actual_downtime_minutes: f64,
    /// Downtime budget left, never below zero
    pub remaining_downtime_minutes: f64,
    pub mttr_minutes: Option<f64>,
}

/// Window of a report ending at `now`
struct Window {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl Window {
    fn hours(hours: u32, now: DateTime<Utc>) -> Self {
        Self { start: now - Duration::hours(i64::from(hours)), end: now }
    }

    fn minutes(&self) -> f64 {
        (self.end - self.start).num_milliseconds() as f64 / 60_000.0
    }
}

pub struct StatsAggregator {
    database: Arc<dyn Database>,
}

impl StatsAggregator {
    pub fn new(database: Arc<dyn Database>) -> Self {
        Self { database }
    }

    async fn checks(&self, resource_id: Uuid, window: &Window) -> Result<Vec<Check>> {
        let mut checks = self.database.get_checks_in_window(resource_id, window.start).await?;
        checks.retain(|check| check.checked_at <= window.end);
        Ok(checks)
    }

    pub async fn resource_stats(
        &self,
        resource_id: Uuid,
        window_hours: u32,
        now: DateTime<Utc>,
    ) -> Result<StatsSnapshot> {
        let window = Window::hours(window_hours, now);
        let checks = self.checks(resource_id, &window).await?;
        let incidents = self.database.get_incidents_in_window(resource_id, window.start).await?;

        let successful = checks.iter().filter(|check| check.is_up()).count() as u64;
        let latency = LatencySummary::from_checks(&checks);
        let last = checks.last();

        Ok(StatsSnapshot {
            resource_id,
            window_hours,
            window_start: window.start,
            window_end: window.end,
            total_checks: checks.len() as u64,
            successful_checks: successful,
            failed_checks: checks.len() as u64 - successful,
            uptime_percentage: metrics::uptime_percentage(&checks),
            avg_response_time_ms: latency.avg_ms,
            min_response_time_ms: latency.min_ms,
            max_response_time_ms: latency.max_ms,
            p50_response_time_ms: latency.p50_ms,
            p95_response_time_ms: latency.p95_ms,
            p99_response_time_ms: latency.p99_ms,
            incident_count: metrics::incidents_started(&incidents, window.start, now),
            total_downtime_minutes: metrics::downtime_minutes(&incidents, window.start, now),
            current_downtime_minutes: metrics::current_downtime_minutes(&incidents, now),
            mttr_minutes: metrics::mttr_minutes(&incidents, window.start, now),
            mtbf_minutes: metrics::mtbf_minutes(&incidents, window.start, now),
            current_status: last.map(|check| check.status),
            last_checked_at: last.map(|check| check.checked_at),
        })
    }

    /// SLA compliance; meeting the target exactly counts as met
    pub async fn sla_report(&self, resource: &Resource, window_days: u32, now: DateTime<Utc>) -> Result<SlaSnapshot> {
        let window = Window::hours(window_days.saturating_mul(24), now);
        let checks = self.checks(resource.id, &window).await?;
        let incidents = self.database.get_incidents_in_window(resource.id, window.start).await?;

        let actual_uptime = metrics::uptime_percentage(&checks);
        let allowed = window.minutes() * (100.0 - resource.sla_target) / 100.0;
        let actual_downtime = metrics::downtime_minutes(&incidents, window.start, now);

        Ok(SlaSnapshot {
            resource_id: resource.id,
            window_days,
            sla_target: resource.sla_target,
            actual_uptime,
            sla_met: actual_uptime >= resource.sla_target,
            total_checks: checks.len() as u64,
            incident_count: metrics::incidents_started(&incidents, window.start, now),
            allowed_downtime_minutes: allowed,
            actual_downtime_minutes: actual_downtime,
            remaining_downtime_minutes: (allowed - actual_downtime).max(0.0),
            mttr_minutes: metrics::mttr_minutes(&incidents, window.start, now),
        })
    }

    pub async fn history(&self, resource_id: Uuid, window_hours: u32, now: DateTime<Utc>) -> Result<Vec<HistoryBucket>> {
        let window = Window::hours(window_hours, now);
        let checks = self.checks(resource_id, &window).await?;
        Ok(bucketize(&checks, bucket_width(window_hours)))
    }
}
