use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::database::models::{Resource, ResourceType};
use crate::monitoring::incident::Transition;
use crate::monitoring::types::{Check, CheckStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    IncidentStarted,
    IncidentResolved,
    SlowResponse,
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertKind::IncidentStarted => write!(f, "incident_started"),
            AlertKind::IncidentResolved => write!(f, "incident_resolved"),
            AlertKind::SlowResponse => write!(f, "slow_response"),
        }
    }
}

/// Check context attached to an alert
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckSummary {
    pub status: CheckStatus,
    pub response_time_ms: Option<f64>,
    pub status_code: Option<u16>,
    pub error_message: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl From<&Check> for CheckSummary {
    fn from(check: &Check) -> Self {
        Self {
            status: check.status,
            response_time_ms: check.response_time_ms,
            status_code: check.status_code,
            error_message: check.error_message.clone(),
            checked_at: check.checked_at,
        }
    }
}

/// Alert payload handed to every transport
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertMessage {
    pub kind: AlertKind,
    pub resource_id: Uuid,
    pub resource_name: String,
    pub resource_url: String,
    pub resource_type: ResourceType,
    pub incident_id: Option<i64>,
    pub occurred_at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub response_time_ms: Option<f64>,
    pub incident_duration_seconds: Option<i64>,
    /// Newest first
    pub recent_checks: Vec<CheckSummary>,
}

impl AlertMessage {
    fn base(kind: AlertKind, resource: &Resource, recent: &[Check], at: DateTime<Utc>) -> Self {
        let latest = recent.first();
        Self {
            kind,
            resource_id: resource.id,
            resource_name: resource.name.clone(),
            resource_url: resource.url.clone(),
            resource_type: resource.resource_type,
            incident_id: None,
            occurred_at: at,
            error_message: latest.and_then(|check| check.error_message.clone()),
            response_time_ms: latest.and_then(|check| check.response_time_ms),
            incident_duration_seconds: None,
            recent_checks: recent.iter().map(CheckSummary::from).collect(),
        }
    }

    /// Alert for an incident transition, `None` when nothing changed
    pub fn for_transition(
        resource: &Resource,
        transition: &Transition,
        recent: &[Check],
        at: DateTime<Utc>,
    ) -> Option<Self> {
        let (kind, incident) = match transition {
            Transition::None => return None,
            Transition::Started(incident) => (AlertKind::IncidentStarted, incident),
            Transition::Resolved(incident) => (AlertKind::IncidentResolved, incident),
        };

        let mut message = Self::base(kind, resource, recent, at);
        message.incident_id = Some(incident.id);
        message.incident_duration_seconds = incident.duration().map(|d| d.num_seconds());
        if kind == AlertKind::IncidentResolved {
            message.error_message = None;
        }
        Some(message)
    }

    pub fn slow_response(resource: &Resource, check: &Check, recent: &[Check]) -> Self {
        let mut message = Self::base(AlertKind::SlowResponse, resource, recent, check.checked_at);
        message.response_time_ms = check.response_time_ms;
        message.error_message = None;
        message
    }

    pub fn subject(&self) -> String {
        match self.kind {
            AlertKind::IncidentStarted => format!("[DOWN] {} is down", self.resource_name),
            AlertKind::IncidentResolved => format!("[RESOLVED] {} is back up", self.resource_name),
            AlertKind::SlowResponse => format!("[SLOW] {} is responding slowly", self.resource_name),
        }
    }

    pub fn text_body(&self) -> String {
        let mut body = format!(
            "Resource: {} ({})\nType: {}\nTime: {}\n",
            self.resource_name,
            self.resource_url,
            self.resource_type,
            self.occurred_at.to_rfc3339(),
        );

        if let Some(incident_id) = self.incident_id {
            body.push_str(&format!("Incident: #{incident_id}\n"));
        }
        if let Some(seconds) = self.incident_duration_seconds {
            body.push_str(&format!("Duration: {}m {}s\n", seconds / 60, seconds % 60));
        }
        if let Some(error) = &self.error_message {
            body.push_str(&format!("Error: {error}\n"));
        }
        if let Some(ms) = self.response_time_ms {
            body.push_str(&format!("Response time: {ms:.0} ms\n"));
        }

        if !self.recent_checks.is_empty() {
            body.push_str("\nRecent checks:\n");
            for check in &self.recent_checks {
                let latency = check
                    .response_time_ms
                    .map(|ms| format!("{ms:.0} ms"))
                    .unwrap_or_else(|| "-".to_string());
                body.push_str(&format!(
                    "  {} {:<4} {:>8}  {}\n",
                    check.checked_at.format("%Y-%m-%d %H:%M:%S"),
                    check.status,
                    latency,
                    check.error_message.as_deref().unwrap_or(""),
                ));
            }
        }

        body
    }
}
