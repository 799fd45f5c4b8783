use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};

use super::message::AlertMessage;
use super::transport::{Ack, Transport, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtpSecurity {
    /// Plain connection, only for local relays
    None,
    #[default]
    StartTls,
    /// Implicit TLS (port 465)
    Tls,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub security: SmtpSecurity,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_address: String,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_timeout_ms() -> u64 {
    10_000
}

/// SMTP transport
pub struct EmailTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    timeout_ms: u64,
}

impl EmailTransport {
    pub const ID: &'static str = "email";

    pub fn new(config: &EmailConfig) -> Result<Self, TransportError> {
        let from: Mailbox = config
            .from_address
            .parse()
            .map_err(|e| TransportError::Invalid(format!("from address '{}': {e}", config.from_address)))?;

        let builder = match config.security {
            SmtpSecurity::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host),
            SmtpSecurity::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
                .map_err(|e| TransportError::Invalid(format!("SMTP relay '{}': {e}", config.smtp_host)))?,
            SmtpSecurity::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
                .map_err(|e| TransportError::Invalid(format!("SMTP relay '{}': {e}", config.smtp_host)))?,
        };

        let mut builder = builder
            .port(config.smtp_port)
            .timeout(Some(Duration::from_millis(config.timeout_ms)));
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self { mailer: builder.build(), from, timeout_ms: config.timeout_ms })
    }

    fn build_email(&self, recipient: &str, message: &AlertMessage) -> Result<Message, TransportError> {
        let to: Mailbox = recipient
            .parse()
            .map_err(|e| TransportError::Invalid(format!("recipient '{recipient}': {e}")))?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(message.subject())
            .header(ContentType::TEXT_PLAIN)
            .body(message.text_body())
            .map_err(|e| TransportError::Invalid(e.to_string()))
    }
}

#[async_trait]
impl Transport for EmailTransport {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn send(&self, recipient: &str, message: &AlertMessage) -> Result<Ack, TransportError> {
        let email = self.build_email(recipient, message)?;

        self.mailer.send(email).await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(self.timeout_ms)
            } else if e.is_permanent() {
                TransportError::Rejected {
                    status: e.status().and_then(|code| code.to_string().parse().ok()),
                    reason: e.to_string(),
                    permanent: true,
                }
            } else {
                TransportError::Network(e.to_string())
            }
        })?;

        Ok(Ack { transport: Self::ID.to_string(), detail: Some(recipient.to_string()) })
    }
}
