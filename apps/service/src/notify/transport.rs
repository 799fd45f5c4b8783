use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use super::message::AlertMessage;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    /// `permanent` marks refusals that will not change on resend, such as an
    /// SMTP 5xx reply or an HTTP 4xx other than 408 and 429
    #[error("rejected{}: {reason}", .status.map(|s| format!(" with status {s}")).unwrap_or_default())]
    Rejected { status: Option<u16>, reason: String, permanent: bool },

    #[error("invalid message or recipient: {0}")]
    Invalid(String),

    #[error("timed out after {0} ms")]
    Timeout(u64),
}

impl TransportError {
    /// Errors caused by the message itself. Retrying them cannot help and they
    /// say nothing about the health of the transport.
    pub fn is_validation(&self) -> bool {
        matches!(self, TransportError::Invalid(_))
    }

    /// Errors that resending the same message cannot fix. They are not
    /// retried and do not count against the transport's breaker.
    pub fn is_permanent(&self) -> bool {
        self.is_validation() || matches!(self, TransportError::Rejected { permanent: true, .. })
    }
}

/// Receipt for a delivered alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ack {
    pub transport: String,
    pub detail: Option<String>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Stable identifier, also names the transport's circuit breaker
    fn id(&self) -> &str;

    async fn send(&self, recipient: &str, message: &AlertMessage) -> Result<Ack, TransportError>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let rejected = TransportError::Rejected { status: Some(503), reason: "busy".into(), permanent: false };
        assert_eq!(rejected.to_string(), "rejected with status 503: busy");
        assert!(!rejected.is_permanent());

        let rejected = TransportError::Rejected { status: None, reason: "mailbox full".into(), permanent: true };
        assert_eq!(rejected.to_string(), "rejected: mailbox full");
        assert!(rejected.is_permanent());
        assert!(!rejected.is_validation());

        assert!(TransportError::Invalid("bad address".into()).is_validation());
        assert!(TransportError::Invalid("bad address".into()).is_permanent());
        assert!(!TransportError::Timeout(500).is_validation());
        assert!(!TransportError::Timeout(500).is_permanent());
    }
}
