//! Protocol checkers.
//!
//! Every resource type maps onto exactly one [`ProbeKind`], and every kind has a
//! [`Checker`] implementation. Checkers never fail: whatever goes wrong while
//! probing is reported as a down [`Check`] with a descriptive error message.

mod dns;
mod http;
mod icmp;
mod tcp;
mod tls;
mod websocket;

pub use dns::DnsChecker;
pub use http::{HttpChecker, MAX_REDIRECTS};
pub use icmp::{ICMP_ECHO_COUNT, IcmpChecker};
pub use tcp::TcpChecker;
pub use tls::{CertificateInfo, CertificateVerdict, TlsChecker};
pub use websocket::WebSocketChecker;

use crate::database::models::{Resource, ResourceType};
use crate::monitoring::types::Check;

/// Kind of probe to run for a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeKind {
    Http,
    Tcp,
    Tls,
    Dns,
    WebSocket,
    Icmp,
}

impl From<ResourceType> for ProbeKind {
    fn from(resource_type: ResourceType) -> Self {
        match resource_type {
            ResourceType::Http | ResourceType::Https | ResourceType::Health => ProbeKind::Http,
            ResourceType::Tcp => ProbeKind::Tcp,
            ResourceType::Tls => ProbeKind::Tls,
            ResourceType::Dns => ProbeKind::Dns,
            ResourceType::WebSocket => ProbeKind::WebSocket,
            ResourceType::Icmp => ProbeKind::Icmp,
        }
    }
}

/// Checker trait for the different protocols
#[async_trait::async_trait]
pub trait Checker: Send + Sync {
    /// Probe the resource and describe the outcome
    async fn check(&self, resource: &Resource) -> Check;
}

/// Render an error together with its sources, `outer: inner: root`
pub(crate) fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !message.contains(&cause_text) {
            message.push_str(": ");
            message.push_str(&cause_text);
        }
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_kind_mapping() {
        assert_eq!(ProbeKind::from(ResourceType::Https), ProbeKind::Http);
        assert_eq!(ProbeKind::from(ResourceType::Health), ProbeKind::Http);
        assert_eq!(ProbeKind::from(ResourceType::WebSocket), ProbeKind::WebSocket);
        assert_eq!(ProbeKind::from(ResourceType::parse("unknown")), ProbeKind::Http);
    }

    #[test]
    fn test_error_chain_skips_repeated_text() {
        let inner = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused");
        let outer = std::io::Error::new(std::io::ErrorKind::Other, inner);
        assert_eq!(error_chain(&outer), "connection refused");
    }
}
