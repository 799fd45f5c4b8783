use std::time::Instant;

use tokio::time::timeout;
use tokio_tungstenite::connect_async;

use super::{Checker, error_chain};
use crate::database::models::Resource;
use crate::monitoring::types::Check;

/// WebSocket handshake checker
pub struct WebSocketChecker;

#[async_trait::async_trait]
impl Checker for WebSocketChecker {
    async fn check(&self, resource: &Resource) -> Check {
        let check = Check::new(resource.id);
        let start = Instant::now();

        match timeout(resource.timeout(), connect_async(resource.url.as_str())).await {
            Ok(Ok((mut socket, response))) => {
                let latency = start.elapsed();
                // A failed close is irrelevant, the handshake already succeeded
                if let Err(e) = socket.close(None).await {
                    tracing::debug!(resource = %resource.id, "WebSocket close after probe failed: {e}");
                }
                check.with_status_code(response.status().as_u16()).up(latency)
            }
            Ok(Err(e)) => check
                .down(format!("WebSocket handshake failed: {}", error_chain(&e)))
                .with_response_time(start.elapsed()),
            Err(_) => check
                .down(format!("WebSocket handshake timed out after {} ms", resource.timeout_ms))
                .with_response_time(start.elapsed()),
        }
    }
}
