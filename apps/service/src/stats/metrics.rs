//! Pure aggregation over checks and incidents.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::database::models::Incident;
use crate::monitoring::types::Check;

/// Uptime in percent, 0 for an empty window
pub fn uptime_percentage(checks: &[Check]) -> f64 {
    if checks.is_empty() {
        return 0.0;
    }
    let up = checks.iter().filter(|check| check.is_up()).count();
    up as f64 / checks.len() as f64 * 100.0
}

/// Nearest-rank percentile of sorted samples, `p` in (0, 100]
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (p / 100.0 * sorted.len() as f64).ceil() as usize;
    Some(sorted[rank.clamp(1, sorted.len()) - 1])
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    /// 0 without samples
    pub avg_ms: f64,
    pub min_ms: Option<f64>,
    pub max_ms: Option<f64>,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
    pub samples: usize,
}

impl LatencySummary {
    pub fn from_checks(checks: &[Check]) -> Self {
        let mut latencies: Vec<f64> = checks.iter().filter_map(|check| check.response_time_ms).collect();
        if latencies.is_empty() {
            return Self::default();
        }
        latencies.sort_unstable_by(f64::total_cmp);

        Self {
            avg_ms: latencies.iter().sum::<f64>() / latencies.len() as f64,
            min_ms: latencies.first().copied(),
            max_ms: latencies.last().copied(),
            p50_ms: percentile(&latencies, 50.0),
            p95_ms: percentile(&latencies, 95.0),
            p99_ms: percentile(&latencies, 99.0),
            samples: latencies.len(),
        }
    }
}

fn minutes(duration: chrono::Duration) -> f64 {
    duration.num_milliseconds() as f64 / 60_000.0
}

/// Mean time to recovery over incidents resolved inside the window
pub fn mttr_minutes(incidents: &[Incident], window_start: DateTime<Utc>, now: DateTime<Utc>) -> Option<f64> {
    let durations: Vec<f64> = incidents
        .iter()
        .filter(|incident| incident.resolved_at.is_some_and(|resolved| resolved >= window_start && resolved <= now))
        .filter_map(|incident| incident.duration().map(minutes))
        .collect();

    if durations.is_empty() {
        None
    } else {
        Some(durations.iter().sum::<f64>() / durations.len() as f64)
    }
}

/// Mean gap between successive incident starts inside the window
pub fn mtbf_minutes(incidents: &[Incident], window_start: DateTime<Utc>, now: DateTime<Utc>) -> Option<f64> {
    let mut starts: Vec<DateTime<Utc>> = incidents
        .iter()
        .map(|incident| incident.started_at)
        .filter(|started| *started >= window_start && *started <= now)
        .collect();
    if starts.len() < 2 {
        return None;
    }
    starts.sort_unstable();

    let gaps: Vec<f64> = starts.windows(2).map(|pair| minutes(pair[1] - pair[0])).collect();
    Some(gaps.iter().sum::<f64>() / gaps.len() as f64)
}

/// Incidents that started inside the window
pub fn incidents_started(incidents: &[Incident], window_start: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    incidents
        .iter()
        .filter(|incident| incident.started_at >= window_start && incident.started_at <= now)
        .count() as u64
}

/// Minutes of incident time overlapping the window, open incidents run until `now`
pub fn downtime_minutes(incidents: &[Incident], window_start: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    incidents
        .iter()
        .map(|incident| {
            let start = incident.started_at.max(window_start);
            let end = incident.resolved_at.unwrap_or(now).min(now);
            if end > start { minutes(end - start) } else { 0.0 }
        })
        .sum()
}

/// Length of the live outage, if any
pub fn current_downtime_minutes(incidents: &[Incident], now: DateTime<Utc>) -> Option<f64> {
    incidents
        .iter()
        .find(|incident| incident.is_open() && incident.started_at <= now)
        .map(|incident| minutes(now - incident.started_at))
}
