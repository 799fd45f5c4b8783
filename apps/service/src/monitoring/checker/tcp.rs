use std::time::Instant;

use serde_json::json;
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::Checker;
use crate::database::models::Resource;
use crate::monitoring::target::host_port;
use crate::monitoring::types::Check;

/// TCP port checker
pub struct TcpChecker;

#[async_trait::async_trait]
impl Checker for TcpChecker {
    async fn check(&self, resource: &Resource) -> Check {
        let check = Check::new(resource.id);

        let (host, port) = match host_port(&resource.url, None) {
            Ok(target) => target,
            Err(e) => return check.down(format!("Invalid TCP target: {e}")),
        };
        let check = check.with_details(json!({ "host": host, "port": port }));

        let start = Instant::now();
        match timeout(resource.timeout(), TcpStream::connect((host.as_str(), port))).await {
            Ok(Ok(_stream)) => check.up(start.elapsed()),
            Ok(Err(e)) => {
                check.down(format!("TCP connection failed: {e}")).with_response_time(start.elapsed())
            }
            Err(_) => check
                .down(format!("TCP connection timed out after {} ms", resource.timeout_ms))
                .with_response_time(start.elapsed()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::ResourceType;
    use crate::testing::closed_port;
    use std::time::Duration;

    #[tokio::test]
    async fn test_open_port_is_up() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let resource = Resource::new("db", addr.to_string(), ResourceType::Tcp).with_timeout_ms(1_000);

        let check = TcpChecker.check(&resource).await;

        assert!(check.is_up());
        assert!(check.response_time_ms.is_some());
        assert_eq!(check.details.unwrap()["port"], addr.port());
    }

    #[tokio::test]
    async fn test_closed_port_is_down_within_timeout() {
        let port = closed_port().await;
        let resource = Resource::new("db", format!("tcp://127.0.0.1:{port}"), ResourceType::Tcp)
            .with_timeout_ms(1_000);

        let start = Instant::now();
        let check = TcpChecker.check(&resource).await;

        assert!(!check.is_up());
        assert!(start.elapsed() < Duration::from_millis(1_500));
        let message = check.error_message.unwrap();
        assert!(message.contains("failed") || message.contains("timed out"), "{message}");
    }

    #[tokio::test]
    async fn test_invalid_target_is_down() {
        let resource = Resource::new("db", "no-port-here", ResourceType::Tcp);

        let check = TcpChecker.check(&resource).await;

        assert!(!check.is_up());
        assert!(check.error_message.unwrap().starts_with("Invalid TCP target"));
    }
}
