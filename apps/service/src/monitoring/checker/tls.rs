//! TLS certificate checker.
//!
//! The handshake accepts any certificate so that expired or mismatched
//! certificates can still be inspected; chain trust is evaluated on the side
//! and reported in the details as `authorized`.

use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, TimeZone, Utc};
use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::{FromDer, X509Certificate};

use super::Checker;
use crate::database::models::Resource;
use crate::monitoring::target::host_port;
use crate::monitoring::types::Check;

const DEFAULT_TLS_PORT: u16 = 443;

/// TLS certificate checker
pub struct TlsChecker {
    provider: Arc<CryptoProvider>,
    roots: Arc<RootCertStore>,
}

impl TlsChecker {
    pub fn new() -> Self {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        Self {
            provider: Arc::new(rustls::crypto::ring::default_provider()),
            roots: Arc::new(roots),
        }
    }

    async fn fetch_certificate(
        &self,
        host: &str,
        port: u16,
    ) -> anyhow::Result<(CertificateInfo, Option<String>)> {
        let verifier = Arc::new(InspectingVerifier::new(self.roots.clone(), self.provider.clone())?);
        let config = ClientConfig::builder_with_provider(self.provider.clone())
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(verifier.clone())
            .with_no_client_auth();

        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| anyhow::anyhow!("Invalid server name {host}: {e}"))?;

        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| anyhow::anyhow!("TCP connection failed: {e}"))?;
        let tls = TlsConnector::from(Arc::new(config))
            .connect(server_name, stream)
            .await
            .map_err(|e| anyhow::anyhow!("TLS handshake failed: {e}"))?;

        let (_, session) = tls.get_ref();
        let leaf = session
            .peer_certificates()
            .and_then(|certs| certs.first())
            .ok_or_else(|| anyhow::anyhow!("Server presented no certificate"))?;

        let info = CertificateInfo::from_der(leaf.as_ref())?;
        Ok((info, verifier.trust_error()))
    }
}

impl Default for TlsChecker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Checker for TlsChecker {
    async fn check(&self, resource: &Resource) -> Check {
        let check = Check::new(resource.id);

        let (host, port) = match host_port(&resource.url, Some(DEFAULT_TLS_PORT)) {
            Ok(target) => target,
            Err(e) => return check.down(format!("Invalid TLS target: {e}")),
        };

        let start = Instant::now();
        let fetched = timeout(resource.timeout(), self.fetch_certificate(&host, port)).await;
        let latency = start.elapsed();

        let (info, trust_error) = match fetched {
            Ok(Ok(fetched)) => fetched,
            Ok(Err(e)) => return check.down(e.to_string()).with_response_time(latency),
            Err(_) => {
                return check
                    .down(format!("TLS connection timed out after {} ms", resource.timeout_ms))
                    .with_response_time(latency);
            }
        };

        let verdict = info.evaluate(&host, Utc::now(), resource.cert_expiry_days);
        let mut details = verdict.details(&info);
        details["authorized"] = json!(trust_error.is_none());
        if let Some(reason) = trust_error {
            details["authorization_error"] = json!(reason);
        }

        let check = check.with_details(details);
        match verdict.error {
            None => check.up(latency),
            Some(error) => check.down(error).with_response_time(latency),
        }
    }
}

/// Accepts every certificate while remembering whether the WebPKI chain check passed
#[derive(Debug)]
struct InspectingVerifier {
    inner: Arc<WebPkiServerVerifier>,
    provider: Arc<CryptoProvider>,
    trust_error: Mutex<Option<String>>,
}

impl InspectingVerifier {
    fn new(roots: Arc<RootCertStore>, provider: Arc<CryptoProvider>) -> anyhow::Result<Self> {
        let inner = WebPkiServerVerifier::builder_with_provider(roots, provider.clone()).build()?;
        Ok(Self { inner, provider, trust_error: Mutex::new(None) })
    }

    fn trust_error(&self) -> Option<String> {
        self.trust_error.lock().map(|guard| guard.clone()).unwrap_or(None)
    }
}

impl ServerCertVerifier for InspectingVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if let Err(e) =
            self.inner.verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            if let Ok(mut slot) = self.trust_error.lock() {
                *slot = Some(e.to_string());
            }
        }
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

/// The parts of a leaf certificate the checker reasons about
#[derive(Debug, Clone, PartialEq)]
pub struct CertificateInfo {
    pub issuer: String,
    pub subject: String,
    pub common_name: Option<String>,
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<IpAddr>,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
}

/// Result of evaluating a certificate for a host at a point in time
#[derive(Debug, Clone, PartialEq)]
pub struct CertificateVerdict {
    pub days_remaining: i64,
    pub hostname_match: bool,
    pub expiry_warning: Option<bool>,
    /// Why the certificate is unacceptable, `None` when it is fine
    pub error: Option<String>,
}

impl CertificateVerdict {
    fn details(&self, info: &CertificateInfo) -> serde_json::Value {
        let mut details = json!({
            "issuer": info.issuer,
            "subject": info.subject,
            "valid_from": info.valid_from.to_rfc3339(),
            "valid_to": info.valid_to.to_rfc3339(),
            "days_remaining": self.days_remaining,
            "hostname_match": self.hostname_match,
        });
        if let Some(warning) = self.expiry_warning {
            details["expiry_warning"] = json!(warning);
        }
        details
    }
}

impl CertificateInfo {
    pub fn from_der(der: &[u8]) -> anyhow::Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| anyhow::anyhow!("Failed to parse certificate: {e}"))?;

        let mut dns_names = Vec::new();
        let mut ip_addresses = Vec::new();
        if let Ok(Some(san)) = cert.subject_alternative_name() {
            for name in &san.value.general_names {
                match name {
                    GeneralName::DNSName(dns) => dns_names.push(dns.to_string()),
                    GeneralName::IPAddress(bytes) => {
                        if let Some(ip) = ip_from_bytes(bytes) {
                            ip_addresses.push(ip);
                        }
                    }
                    _ => {}
                }
            }
        }

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string);

        let validity = cert.validity();
        Ok(Self {
            issuer: cert.issuer().to_string(),
            subject: cert.subject().to_string(),
            common_name,
            dns_names,
            ip_addresses,
            valid_from: asn1_to_utc(validity.not_before.timestamp()),
            valid_to: asn1_to_utc(validity.not_after.timestamp()),
        })
    }

    /// Whole days until expiry, truncated toward zero. Negative once expired.
    pub fn days_remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.valid_to - now).num_days()
    }

    /// Whether `host` is covered by the certificate's SANs (or CN without SANs)
    pub fn matches_host(&self, host: &str) -> bool {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return self.ip_addresses.contains(&ip);
        }

        if self.dns_names.is_empty() {
            return self.common_name.as_deref().is_some_and(|cn| dns_name_matches(cn, host));
        }
        self.dns_names.iter().any(|name| dns_name_matches(name, host))
    }

    pub fn evaluate(
        &self,
        host: &str,
        now: DateTime<Utc>,
        warning_days: Option<u32>,
    ) -> CertificateVerdict {
        let days_remaining = self.days_remaining(now);
        let hostname_match = self.matches_host(host);

        let error = if now < self.valid_from {
            Some(format!("Certificate not valid before {}", self.valid_from.to_rfc3339()))
        } else if now >= self.valid_to {
            Some(format!("Certificate expired on {}", self.valid_to.to_rfc3339()))
        } else if days_remaining <= 0 {
            Some("Certificate expires in less than a day".to_string())
        } else if !hostname_match {
            Some(format!("Certificate is not valid for host {host}"))
        } else {
            None
        };

        CertificateVerdict {
            days_remaining,
            hostname_match,
            expiry_warning: warning_days.map(|days| days_remaining <= i64::from(days)),
            error,
        }
    }
}

fn dns_name_matches(pattern: &str, host: &str) -> bool {
    let pattern = pattern.trim_end_matches('.').to_ascii_lowercase();
    let host = host.trim_end_matches('.').to_ascii_lowercase();

    match pattern.strip_prefix("*.") {
        // Wildcards cover exactly one label
        Some(suffix) => host
            .split_once('.')
            .is_some_and(|(label, rest)| !label.is_empty() && rest == suffix),
        None => pattern == host,
    }
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => <[u8; 4]>::try_from(bytes).ok().map(IpAddr::from),
        16 => <[u8; 16]>::try_from(bytes).ok().map(IpAddr::from),
        _ => None,
    }
}

fn asn1_to_utc(timestamp: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(timestamp, 0).single().unwrap_or_default()
}
