//! Time-bucketed check history.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::monitoring::types::{Check, CheckStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryBucket {
    pub bucket_start: DateTime<Utc>,
    /// Up when more than half of the bucket's checks were up
    pub status: CheckStatus,
    pub total_checks: u64,
    pub up_checks: u64,
    /// Mean response time of the up checks
    pub response_time_ms: Option<f64>,
}

/// Bucket width for a window: hourly up to a week, 6h up to 30 days, daily beyond
pub fn bucket_width(window_hours: u32) -> Duration {
    match window_hours {
        0..=168 => Duration::hours(1),
        169..=720 => Duration::hours(6),
        _ => Duration::hours(24),
    }
}

/// Group checks into buckets aligned to multiples of `width` since the epoch.
/// Empty buckets are left out.
pub fn bucketize(checks: &[Check], width: Duration) -> Vec<HistoryBucket> {
    let width_ms = width.num_milliseconds().max(1);

    let mut grouped: BTreeMap<i64, Vec<&Check>> = BTreeMap::new();
    for check in checks {
        let start = check.checked_at.timestamp_millis().div_euclid(width_ms) * width_ms;
        grouped.entry(start).or_default().push(check);
    }

    grouped
        .into_iter()
        .map(|(start, checks)| {
            let total = checks.len() as u64;
            let up: Vec<&&Check> = checks.iter().filter(|check| check.is_up()).collect();
            let latencies: Vec<f64> = up.iter().filter_map(|check| check.response_time_ms).collect();
            let response_time_ms = if latencies.is_empty() {
                None
            } else {
                Some(latencies.iter().sum::<f64>() / latencies.len() as f64)
            };

            HistoryBucket {
                bucket_start: DateTime::from_timestamp_millis(start).unwrap_or_default(),
                status: if up.len() as u64 * 2 > total { CheckStatus::Up } else { CheckStatus::Down },
                total_checks: total,
                up_checks: up.len() as u64,
                response_time_ms,
            }
        })
        .collect()
}
