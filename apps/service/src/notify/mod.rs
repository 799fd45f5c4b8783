//! Alert delivery.
//!
//! Every transport is wrapped in its own circuit breaker and retry policy;
//! the dispatcher fans a message out to all transports and recipients and
//! reports each outcome without failing.

pub mod breaker;
pub mod dispatcher;
pub mod email;
pub mod message;
pub mod retry;
pub mod transport;
pub mod webhook;

pub use breaker::{BreakerError, BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use dispatcher::{DeliveryOutcome, NotificationAttempt, NotificationDispatcher};
pub use email::{EmailConfig, EmailTransport};
pub use message::{AlertKind, AlertMessage};
pub use retry::{RetryConfig, RetryError, RetryPolicy};
pub use transport::{Ack, Transport, TransportError};
pub use webhook::{WebhookConfig, WebhookTransport};
