use chrono::{DateTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Protocol used to probe a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Http,
    Https,
    Health,
    Tcp,
    Tls,
    Dns,
    #[serde(rename = "websocket")]
    WebSocket,
    Icmp,
}

impl ResourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceType::Http => "http",
            ResourceType::Https => "https",
            ResourceType::Health => "health",
            ResourceType::Tcp => "tcp",
            ResourceType::Tls => "tls",
            ResourceType::Dns => "dns",
            ResourceType::WebSocket => "websocket",
            ResourceType::Icmp => "icmp",
        }
    }

    /// Parse a stored type name. Unknown names fall back to HTTP.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "https" => ResourceType::Https,
            "health" => ResourceType::Health,
            "tcp" => ResourceType::Tcp,
            "tls" | "ssl" => ResourceType::Tls,
            "dns" => ResourceType::Dns,
            "websocket" | "ws" | "wss" => ResourceType::WebSocket,
            "icmp" | "ping" => ResourceType::Icmp,
            _ => ResourceType::Http,
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Daily window (UTC hours) during which alerts are held back.
/// `start_hour > end_hour` wraps past midnight, e.g. 22..6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    pub start_hour: u8,
    pub end_hour: u8,
}

impl QuietHours {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let hour = at.hour() as u8;
        match self.start_hour.cmp(&self.end_hour) {
            std::cmp::Ordering::Equal => false,
            std::cmp::Ordering::Less => hour >= self.start_hour && hour < self.end_hour,
            std::cmp::Ordering::Greater => hour >= self.start_hour || hour < self.end_hour,
        }
    }
}

/// A monitored resource. Owned by the CRUD layer, read-only to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub resource_type: ResourceType,
    pub check_interval_seconds: u64,
    pub timeout_ms: u64,
    pub enabled: bool,
    pub http_keyword: Option<String>,
    #[serde(default)]
    pub http_headers: HashMap<String, String>,
    pub cert_expiry_days: Option<u32>,
    pub quiet_hours: Option<QuietHours>,
    pub sla_target: f64,
    pub consecutive_failures_threshold: u32,
    pub response_time_threshold_ms: Option<u64>,
    pub maintenance_mode: bool,
}

impl Resource {
    /// Create a resource with default settings
    pub fn new(name: impl Into<String>, url: impl Into<String>, resource_type: ResourceType) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            url: url.into(),
            resource_type,
            check_interval_seconds: 60,
            timeout_ms: 10_000,
            enabled: true,
            http_keyword: None,
            http_headers: HashMap::new(),
            cert_expiry_days: None,
            quiet_hours: None,
            sla_target: 99.9,
            consecutive_failures_threshold: 1,
            response_time_threshold_ms: None,
            maintenance_mode: false,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds)
    }

    /// Whether notifications for this resource are held back at `at`
    pub fn alerts_suppressed(&self, at: DateTime<Utc>) -> bool {
        self.maintenance_mode || self.quiet_hours.is_some_and(|quiet| quiet.contains(at))
    }
}

/// An outage span for a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: i64,
    pub resource_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
}

impl Incident {
    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }

    /// Duration of a resolved incident, `None` while it is still open
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.resolved_at.map(|resolved| resolved - self.started_at)
    }
}

/// Convert a timestamp to unix milliseconds for storage
pub fn timestamp_to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

/// Convert stored unix milliseconds back to a timestamp
pub fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at_hour(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, hour, 30, 0).unwrap()
    }

    #[test]
    fn test_resource_type_parse() {
        assert_eq!(ResourceType::parse("TCP"), ResourceType::Tcp);
        assert_eq!(ResourceType::parse("websocket"), ResourceType::WebSocket);
        assert_eq!(ResourceType::parse("icmp"), ResourceType::Icmp);
        assert_eq!(ResourceType::parse("gopher"), ResourceType::Http);
        for kind in [ResourceType::Health, ResourceType::Tls, ResourceType::Dns] {
            assert_eq!(ResourceType::parse(kind.as_str()), kind);
        }
    }

    #[test]
    fn test_quiet_hours_same_day() {
        let quiet = QuietHours { start_hour: 9, end_hour: 17 };
        assert!(quiet.contains(at_hour(9)));
        assert!(quiet.contains(at_hour(16)));
        assert!(!quiet.contains(at_hour(17)));
        assert!(!quiet.contains(at_hour(3)));
    }

    #[test]
    fn test_quiet_hours_wrap_midnight() {
        let quiet = QuietHours { start_hour: 22, end_hour: 6 };
        assert!(quiet.contains(at_hour(23)));
        assert!(quiet.contains(at_hour(0)));
        assert!(quiet.contains(at_hour(5)));
        assert!(!quiet.contains(at_hour(6)));
        assert!(!quiet.contains(at_hour(12)));
    }

    #[test]
    fn test_alerts_suppressed() {
        let mut resource = Resource::new("api", "https://example.com", ResourceType::Https);
        assert!(!resource.alerts_suppressed(at_hour(12)));

        resource.maintenance_mode = true;
        assert!(resource.alerts_suppressed(at_hour(12)));

        resource.maintenance_mode = false;
        resource.quiet_hours = Some(QuietHours { start_hour: 11, end_hour: 13 });
        assert!(resource.alerts_suppressed(at_hour(12)));
    }

    #[test]
    fn test_millis_round_trip() {
        let now = Utc.timestamp_millis_opt(1_700_000_123_456).unwrap();
        assert_eq!(millis_to_timestamp(timestamp_to_millis(now)), now);
    }
}
