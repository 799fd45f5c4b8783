use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::breaker::{BreakerError, BreakerState, CircuitBreaker, CircuitBreakerConfig};
use super::message::{AlertKind, AlertMessage};
use super::retry::{RetryConfig, RetryPolicy};
use super::transport::{Transport, TransportError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Sent,
    Failed { error: String },
    ShortCircuited,
}

/// Result of delivering one alert to one recipient
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationAttempt {
    pub transport_id: String,
    pub recipient: String,
    pub resource_id: Uuid,
    pub incident_id: Option<i64>,
    pub kind: AlertKind,
    #[serde(flatten)]
    pub outcome: DeliveryOutcome,
    pub attempts: u32,
    pub breaker_state: BreakerState,
}

impl NotificationAttempt {
    pub fn is_sent(&self) -> bool {
        self.outcome == DeliveryOutcome::Sent
    }
}

/// A transport with its recipients, breaker and retry policy
struct Channel {
    transport: Arc<dyn Transport>,
    recipients: Vec<String>,
    breaker: CircuitBreaker<TransportError>,
    retry: RetryPolicy,
}

/// Fans alerts out to every configured transport and recipient
#[derive(Default)]
pub struct NotificationDispatcher {
    channels: Vec<Channel>,
}

impl NotificationDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transport. It gets its own breaker, which ignores
    /// validation errors and permanent rejections.
    pub fn with_transport(
        mut self,
        transport: Arc<dyn Transport>,
        recipients: Vec<String>,
        retry: RetryConfig,
        breaker: CircuitBreakerConfig,
    ) -> Self {
        let breaker = CircuitBreaker::with_filter(
            transport.id(),
            breaker,
            Arc::new(|error: &TransportError| !error.is_permanent()),
        );
        self.channels.push(Channel { transport, recipients, breaker, retry: RetryPolicy::new(retry) });
        self
    }

    pub fn transport_count(&self) -> usize {
        self.channels.len()
    }

    pub fn breaker_state(&self, transport_id: &str) -> Option<BreakerState> {
        self.channels
            .iter()
            .find(|channel| channel.transport.id() == transport_id)
            .map(|channel| channel.breaker.state())
    }

    /// Deliver `message` everywhere concurrently. Never fails, every outcome
    /// is returned.
    pub async fn dispatch(&self, message: &AlertMessage) -> Vec<NotificationAttempt> {
        let deliveries = self.channels.iter().flat_map(|channel| {
            channel.recipients.iter().map(move |recipient| Self::deliver(channel, recipient, message))
        });

        join_all(deliveries).await
    }

    async fn deliver(channel: &Channel, recipient: &str, message: &AlertMessage) -> NotificationAttempt {
        let attempts = AtomicU32::new(0);

        let result = channel
            .retry
            .execute_if(
                || {
                    attempts.fetch_add(1, Ordering::Relaxed);
                    channel.breaker.call(|| channel.transport.send(recipient, message))
                },
                |error| match error {
                    BreakerError::Open { .. } => false,
                    BreakerError::Inner(error) => !error.is_permanent(),
                },
            )
            .await;

        let outcome = match result {
            Ok(_) => DeliveryOutcome::Sent,
            Err(failure) => match failure.last_error {
                BreakerError::Open { .. } => DeliveryOutcome::ShortCircuited,
                BreakerError::Inner(error) => DeliveryOutcome::Failed { error: error.to_string() },
            },
        };

        let attempt = NotificationAttempt {
            transport_id: channel.transport.id().to_string(),
            recipient: recipient.to_string(),
            resource_id: message.resource_id,
            incident_id: message.incident_id,
            kind: message.kind,
            outcome,
            attempts: attempts.load(Ordering::Relaxed),
            breaker_state: channel.breaker.state(),
        };

        match &attempt.outcome {
            DeliveryOutcome::Sent => info!(
                transport = %attempt.transport_id,
                recipient = %attempt.recipient,
                resource = %attempt.resource_id,
                kind = %attempt.kind,
                attempts = attempt.attempts,
                "Alert delivered"
            ),
            DeliveryOutcome::Failed { error } => warn!(
                transport = %attempt.transport_id,
                recipient = %attempt.recipient,
                resource = %attempt.resource_id,
                attempts = attempt.attempts,
                breaker = %attempt.breaker_state,
                "Alert delivery failed: {error}"
            ),
            DeliveryOutcome::ShortCircuited => warn!(
                transport = %attempt.transport_id,
                recipient = %attempt.recipient,
                resource = %attempt.resource_id,
                "Alert skipped, circuit breaker open"
            ),
        }

        attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{Incident, Resource, ResourceType};
    use crate::monitoring::incident::Transition;
    use crate::notify::transport::mock::MockTransport;
    use chrono::Utc;

    fn message() -> AlertMessage {
        let resource = Resource::new("api", "https://api.example.com", ResourceType::Https);
        let incident = Incident {
            id: 9,
            resource_id: resource.id,
            started_at: Utc::now(),
            resolved_at: None,
            acknowledged_at: None,
            acknowledged_by: None,
        };
        AlertMessage::for_transition(&resource, &Transition::Started(incident), &[], Utc::now()).unwrap()
    }

    fn retry(max_retries: u32) -> RetryConfig {
        RetryConfig { max_retries, initial_delay_ms: 100, max_delay_ms: 1_000, jitter: 0.1 }
    }

    fn breaker(threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig { failure_threshold: threshold, reset_timeout_ms: 60_000 }
    }

    fn network() -> Result<(), TransportError> {
        Err(TransportError::Network("connection reset".into()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_recipient_of_every_transport() {
        let email = Arc::new(MockTransport::new("email"));
        let webhook = Arc::new(MockTransport::new("webhook"));
        let dispatcher = NotificationDispatcher::new()
            .with_transport(email.clone(), vec!["a@example.com".into(), "b@example.com".into()], retry(2), breaker(5))
            .with_transport(webhook.clone(), vec!["https://hooks.example.com".into()], retry(2), breaker(5));

        let attempts = dispatcher.dispatch(&message()).await;

        assert_eq!(attempts.len(), 3);
        assert!(attempts.iter().all(NotificationAttempt::is_sent));
        assert_eq!(email.sent().len(), 2);
        assert_eq!(webhook.sent()[0].1.incident_id, Some(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retried_then_sent() {
        let transport = Arc::new(MockTransport::scripted("webhook", vec![network(), network()]));
        let dispatcher = NotificationDispatcher::new()
            .with_transport(transport.clone(), vec!["https://hooks.example.com".into()], retry(3), breaker(5));

        let attempts = dispatcher.dispatch(&message()).await;

        assert!(attempts[0].is_sent());
        assert_eq!(attempts[0].attempts, 3);
        assert_eq!(transport.calls(), 3);
        assert_eq!(attempts[0].breaker_state, BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_report_failure() {
        let transport = Arc::new(MockTransport::scripted("webhook", vec![network(); 5]));
        let dispatcher = NotificationDispatcher::new()
            .with_transport(transport.clone(), vec!["https://hooks.example.com".into()], retry(2), breaker(10));

        let attempts = dispatcher.dispatch(&message()).await;

        assert_eq!(attempts[0].attempts, 3);
        assert_eq!(transport.calls(), 3);
        assert!(matches!(&attempts[0].outcome, DeliveryOutcome::Failed { error } if error.contains("connection reset")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_error_not_retried_and_not_counted() {
        let invalid = Err(TransportError::Invalid("bad recipient".into()));
        let transport = Arc::new(MockTransport::scripted("email", vec![invalid]));
        let dispatcher = NotificationDispatcher::new()
            .with_transport(transport.clone(), vec!["nobody".into()], retry(3), breaker(1));

        let attempts = dispatcher.dispatch(&message()).await;

        assert_eq!(transport.calls(), 1);
        assert_eq!(attempts[0].attempts, 1);
        assert_eq!(dispatcher.breaker_state("email"), Some(BreakerState::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_rejection_not_retried_and_not_counted() {
        let refused = || {
            Err(TransportError::Rejected {
                status: Some(550),
                reason: "mailbox unavailable".into(),
                permanent: true,
            })
        };
        let transport = Arc::new(MockTransport::scripted("email", vec![refused(), refused()]));
        let dispatcher = NotificationDispatcher::new()
            .with_transport(transport.clone(), vec!["gone@example.com".into()], retry(3), breaker(1));

        let attempts = dispatcher.dispatch(&message()).await;

        assert_eq!(transport.calls(), 1);
        assert_eq!(attempts[0].attempts, 1);
        assert!(matches!(&attempts[0].outcome, DeliveryOutcome::Failed { error } if error.contains("550")));
        assert_eq!(dispatcher.breaker_state("email"), Some(BreakerState::Closed));

        // A 5xx from a webhook is transient and still retried
        let busy = Err(TransportError::Rejected { status: Some(503), reason: "busy".into(), permanent: false });
        let transport = Arc::new(MockTransport::scripted("webhook", vec![busy]));
        let dispatcher = NotificationDispatcher::new()
            .with_transport(transport.clone(), vec!["https://hooks.example.com".into()], retry(3), breaker(5));

        assert!(dispatcher.dispatch(&message()).await[0].is_sent());
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_short_circuits_without_calling() {
        let transport = Arc::new(MockTransport::scripted("webhook", vec![network(), network()]));
        let dispatcher = NotificationDispatcher::new()
            .with_transport(transport.clone(), vec!["https://hooks.example.com".into()], retry(0), breaker(2));

        dispatcher.dispatch(&message()).await;
        dispatcher.dispatch(&message()).await;
        assert_eq!(dispatcher.breaker_state("webhook"), Some(BreakerState::Open));

        let attempts = dispatcher.dispatch(&message()).await;

        assert_eq!(attempts[0].outcome, DeliveryOutcome::ShortCircuited);
        assert_eq!(attempts[0].breaker_state, BreakerState::Open);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_transports_is_empty() {
        let dispatcher = NotificationDispatcher::new();
        assert!(dispatcher.dispatch(&message()).await.is_empty());
        assert_eq!(dispatcher.transport_count(), 0);
    }
}
