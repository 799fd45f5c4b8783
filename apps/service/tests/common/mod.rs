use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use uppe_sentinel::config::Config;
use uppe_sentinel::database::{Database, open_database};
use uppe_sentinel::notify::{Ack, AlertMessage, CircuitBreakerConfig, NotificationDispatcher, RetryConfig, Transport, TransportError};
use uppe_sentinel::pool::open_local;
use uppe_sentinel::Orchestrator;

/// Transport that records every alert it is asked to send
#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<AlertMessage>>,
}

#[async_trait]
impl Transport for RecordingTransport {
    fn id(&self) -> &str {
        "recording"
    }

    async fn send(&self, _recipient: &str, message: &AlertMessage) -> Result<Ack, TransportError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(Ack { transport: "recording".into(), detail: None })
    }
}

pub struct Engine {
    pub orchestrator: Orchestrator,
    pub database: Arc<dyn Database>,
    pub transport: Arc<RecordingTransport>,
    _dir: tempfile::TempDir,
}

pub async fn engine() -> Engine {
    let dir = tempfile::tempdir().unwrap();
    let pool = open_local(dir.path().join("engine.db"), 4).await.unwrap();
    let database: Arc<dyn Database> = Arc::new(open_database(pool).await.unwrap());

    let transport = Arc::new(RecordingTransport::default());
    let dispatcher = NotificationDispatcher::new().with_transport(
        transport.clone(),
        vec!["oncall@example.com".into()],
        RetryConfig { max_retries: 0, ..RetryConfig::default() },
        CircuitBreakerConfig::default(),
    );
    let orchestrator = Orchestrator::with_dispatcher(Config::default(), database.clone(), dispatcher).unwrap();

    Engine { orchestrator, database, transport, _dir: dir }
}

/// Minimal HTTP server answering every request with `status`
pub async fn http_server(status: u16) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let response = format!("HTTP/1.1 {status} Status\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok");
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}
