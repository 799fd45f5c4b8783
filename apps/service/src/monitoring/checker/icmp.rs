use std::net::IpAddr;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde_json::json;
use surge_ping::{Client, Config, ICMP, PingIdentifier, PingSequence};

use super::Checker;
use crate::database::models::Resource;
use crate::monitoring::target::host;
use crate::monitoring::types::{Check, duration_ms};

/// Echo requests sent per probe
pub const ICMP_ECHO_COUNT: u16 = 3;

const PAYLOAD: [u8; 32] = [0x55; 32];

/// ICMP echo checker. Needs permission to open ICMP sockets
/// (`net.ipv4.ping_group_range` or CAP_NET_RAW).
pub struct IcmpChecker;

impl IcmpChecker {
    /// Per-echo timeout, the resource timeout in whole seconds (at least one)
    pub fn echo_timeout(timeout_ms: u64) -> Duration {
        Duration::from_secs((timeout_ms / 1000).max(1))
    }

    async fn resolve(target: &str) -> anyhow::Result<IpAddr> {
        let hostname = host(target)?;
        if let Ok(ip) = hostname.parse::<IpAddr>() {
            return Ok(ip);
        }

        tokio::net::lookup_host((hostname.as_str(), 0))
            .await?
            .next()
            .map(|addr| addr.ip())
            .ok_or_else(|| anyhow::anyhow!("No address found for {hostname}"))
    }
}

/// Aggregate of the echo replies of one probe
#[derive(Debug, Clone, PartialEq)]
pub struct EchoSummary {
    pub sent: u16,
    pub received: u16,
    pub mean_rtt: Option<Duration>,
}

impl EchoSummary {
    fn from_rtts(sent: u16, rtts: &[Duration]) -> Self {
        let mean_rtt = if rtts.is_empty() {
            None
        } else {
            Some(rtts.iter().sum::<Duration>() / rtts.len() as u32)
        };
        Self { sent, received: rtts.len() as u16, mean_rtt }
    }

    pub fn packet_loss(&self) -> f64 {
        if self.sent == 0 {
            return 100.0;
        }
        f64::from(self.sent - self.received) / f64::from(self.sent) * 100.0
    }
}

#[async_trait::async_trait]
impl Checker for IcmpChecker {
    async fn check(&self, resource: &Resource) -> Check {
        let check = Check::new(resource.id);
        let start = Instant::now();

        let ip = match Self::resolve(&resource.url).await {
            Ok(ip) => ip,
            Err(e) => {
                return check
                    .down(format!("Failed to resolve ICMP target: {e}"))
                    .with_response_time(start.elapsed());
            }
        };

        let config = match ip {
            IpAddr::V4(_) => Config::default(),
            IpAddr::V6(_) => Config::builder().kind(ICMP::V6).build(),
        };
        let client = match Client::new(&config) {
            Ok(client) => client,
            Err(e) => return check.down(format!("ICMP socket unavailable: {e}")),
        };

        let echo_timeout = Self::echo_timeout(resource.timeout_ms);
        let echoes = (0..ICMP_ECHO_COUNT).map(|seq| {
            let client = &client;
            async move {
                let mut pinger = client.pinger(ip, PingIdentifier(rand::random())).await;
                pinger.timeout(echo_timeout);
                pinger.ping(PingSequence(seq), &PAYLOAD).await
            }
        });

        let mut rtts = Vec::new();
        let mut last_error = None;
        for outcome in join_all(echoes).await {
            match outcome {
                Ok((_, rtt)) => rtts.push(rtt),
                Err(e) => last_error = Some(e.to_string()),
            }
        }

        let summary = EchoSummary::from_rtts(ICMP_ECHO_COUNT, &rtts);
        let elapsed = start.elapsed();
        let check = check.with_details(json!({
            "address": ip.to_string(),
            "packets_sent": summary.sent,
            "packets_received": summary.received,
            "packet_loss": summary.packet_loss(),
        }));

        if summary.received == 0 {
            let reason = last_error.unwrap_or_else(|| "no reply".to_string());
            return check.down(format!("Host unreachable: {reason}")).with_response_time(elapsed);
        }

        let mut check = check.up(elapsed);
        if let Some(rtt) = summary.mean_rtt {
            check.response_time_ms = Some(duration_ms(rtt));
        }
        check
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_timeout_in_whole_seconds() {
        assert_eq!(IcmpChecker::echo_timeout(250), Duration::from_secs(1));
        assert_eq!(IcmpChecker::echo_timeout(5_900), Duration::from_secs(5));
    }

    #[test]
    fn test_echo_summary() {
        let rtts = [Duration::from_millis(10), Duration::from_millis(20)];
        let summary = EchoSummary::from_rtts(3, &rtts);

        assert_eq!(summary.received, 2);
        assert_eq!(summary.mean_rtt, Some(Duration::from_millis(15)));
        assert!((summary.packet_loss() - 100.0 / 3.0).abs() < 1e-9);

        let lost = EchoSummary::from_rtts(3, &[]);
        assert_eq!(lost.mean_rtt, None);
        assert_eq!(lost.packet_loss(), 100.0);
    }

    #[tokio::test]
    async fn test_resolve_literal_and_url() {
        assert_eq!(IcmpChecker::resolve("10.1.2.3").await.unwrap(), "10.1.2.3".parse::<IpAddr>().unwrap());
        assert_eq!(
            IcmpChecker::resolve("icmp://192.0.2.1").await.unwrap(),
            "192.0.2.1".parse::<IpAddr>().unwrap()
        );
    }
}
