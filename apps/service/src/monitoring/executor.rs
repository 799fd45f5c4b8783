use anyhow::Result;
use chrono::Utc;
use std::time::Instant;
use tokio::time::timeout;

use super::checker::{
    Checker, DnsChecker, HttpChecker, IcmpChecker, ProbeKind, TcpChecker, TlsChecker,
    WebSocketChecker,
};
use super::types::Check;
use crate::database::models::Resource;

/// Monitoring executor - runs the right checker for a resource under its deadline
pub struct MonitoringExecutor {
    http_checker: HttpChecker,
    tcp_checker: TcpChecker,
    tls_checker: TlsChecker,
    dns_checker: DnsChecker,
    websocket_checker: WebSocketChecker,
    icmp_checker: IcmpChecker,
}

impl MonitoringExecutor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            http_checker: HttpChecker::new()?,
            tcp_checker: TcpChecker,
            tls_checker: TlsChecker::new(),
            dns_checker: DnsChecker,
            websocket_checker: WebSocketChecker,
            icmp_checker: IcmpChecker,
        })
    }

    fn checker_for(&self, kind: ProbeKind) -> &dyn Checker {
        match kind {
            ProbeKind::Http => &self.http_checker,
            ProbeKind::Tcp => &self.tcp_checker,
            ProbeKind::Tls => &self.tls_checker,
            ProbeKind::Dns => &self.dns_checker,
            ProbeKind::WebSocket => &self.websocket_checker,
            ProbeKind::Icmp => &self.icmp_checker,
        }
    }

    /// Execute a check. Always produces a check; a probe that overruns the
    /// resource timeout is dropped and recorded as down.
    pub async fn execute_check(&self, resource: &Resource) -> Check {
        let checker = self.checker_for(ProbeKind::from(resource.resource_type));
        let started_at = Utc::now();
        let start = Instant::now();

        match timeout(resource.timeout(), checker.check(resource)).await {
            Ok(check) => check,
            Err(_) => {
                let mut check = Check::new(resource.id)
                    .down(format!("Check timed out after {} ms", resource.timeout_ms))
                    .with_response_time(start.elapsed());
                check.checked_at = started_at;
                check
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::ResourceType;
    use crate::monitoring::types::CheckStatus;
    use crate::testing::{closed_port, http_response, spawn_http_server};
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_http_resource_up() {
        let executor = MonitoringExecutor::new().unwrap();
        let addr = spawn_http_server(|_| http_response(200, "OK", "ok")).await;
        let resource = Resource::new("web", format!("http://{addr}"), ResourceType::Http);

        let check = executor.execute_check(&resource).await;

        assert_eq!(check.status, CheckStatus::Up);
        assert!(check.response_time_ms.unwrap() > 0.0);
        assert!(check.error_message.is_none());
    }

    #[tokio::test]
    async fn test_unknown_type_uses_http() {
        let executor = MonitoringExecutor::new().unwrap();
        let addr = spawn_http_server(|_| http_response(204, "No Content", "")).await;
        let resource = Resource::new("web", format!("http://{addr}"), ResourceType::parse("legacy"));

        let check = executor.execute_check(&resource).await;

        assert!(check.is_up());
        assert_eq!(check.status_code, Some(204));
    }

    #[tokio::test]
    async fn test_closed_tcp_port_down() {
        let executor = MonitoringExecutor::new().unwrap();
        let port = closed_port().await;
        let resource = Resource::new("db", format!("127.0.0.1:{port}"), ResourceType::Tcp)
            .with_timeout_ms(800);

        let start = Instant::now();
        let check = executor.execute_check(&resource).await;

        assert!(!check.is_up());
        assert!(start.elapsed() < Duration::from_millis(800 + 300));
        assert!(check.error_message.is_some());
    }

    #[tokio::test]
    async fn test_hung_server_times_out() {
        // Accepts the connection but never answers
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                held.push(socket);
            }
        });

        let executor = MonitoringExecutor::new().unwrap();
        let resource =
            Resource::new("slow", format!("http://{addr}/"), ResourceType::Http).with_timeout_ms(300);

        let start = Instant::now();
        let check = executor.execute_check(&resource).await;

        assert!(!check.is_up());
        assert!(start.elapsed() < Duration::from_millis(300 + 300));
        assert!(check.error_message.unwrap().contains("timed out"));
    }
}
