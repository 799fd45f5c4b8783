use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Status of a monitoring check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Up,
    Down,
}

impl CheckStatus {
    pub fn is_up(self) -> bool {
        matches!(self, CheckStatus::Up)
    }

    /// Parse a stored status, anything that is not "up" counts as down
    pub fn from_db(value: &str) -> Self {
        match value {
            "up" => CheckStatus::Up,
            _ => CheckStatus::Down,
        }
    }
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckStatus::Up => write!(f, "up"),
            CheckStatus::Down => write!(f, "down"),
        }
    }
}

/// Outcome of one probe against a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Check {
    /// Row id, assigned once the check has been recorded
    pub id: Option<i64>,

    /// Resource that was probed
    pub resource_id: Uuid,

    pub status: CheckStatus,

    /// Response time in milliseconds
    pub response_time_ms: Option<f64>,

    /// Protocol specific status code (HTTP status, ...)
    pub status_code: Option<u16>,

    pub error_message: Option<String>,

    /// Protocol specific payload (certificate metadata, resolved addresses, ...)
    pub details: Option<serde_json::Value>,

    pub checked_at: DateTime<Utc>,
}

impl Check {
    /// Create a check stamped with the current time. Starts out as down with no error,
    /// callers finish it with [`Check::up`] or [`Check::down`].
    pub fn new(resource_id: Uuid) -> Self {
        Self {
            id: None,
            resource_id,
            status: CheckStatus::Down,
            response_time_ms: None,
            status_code: None,
            error_message: None,
            details: None,
            checked_at: Utc::now(),
        }
    }

    /// Mark the check as successful with the measured response time
    pub fn up(mut self, elapsed: Duration) -> Self {
        self.status = CheckStatus::Up;
        self.response_time_ms = Some(duration_ms(elapsed));
        self.error_message = None;
        self
    }

    /// Mark the check as failed
    pub fn down(mut self, error: impl Into<String>) -> Self {
        self.status = CheckStatus::Down;
        self.error_message = Some(error.into());
        self
    }

    pub fn with_response_time(mut self, elapsed: Duration) -> Self {
        self.response_time_ms = Some(duration_ms(elapsed));
        self
    }

    pub fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn is_up(&self) -> bool {
        self.status.is_up()
    }
}

/// Milliseconds with sub-millisecond precision
pub fn duration_ms(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}
