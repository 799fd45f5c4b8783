use std::net::IpAddr;
use std::time::Instant;

use serde_json::json;
use tokio::time::timeout;

use super::Checker;
use crate::database::models::Resource;
use crate::monitoring::target::host;
use crate::monitoring::types::Check;

/// DNS resolution checker, backed by the system resolver
pub struct DnsChecker;

#[async_trait::async_trait]
impl Checker for DnsChecker {
    async fn check(&self, resource: &Resource) -> Check {
        let check = Check::new(resource.id);

        let hostname = match host(&resource.url) {
            Ok(hostname) => hostname,
            Err(e) => return check.down(format!("Invalid DNS target: {e}")),
        };

        let start = Instant::now();
        let lookup = timeout(resource.timeout(), tokio::net::lookup_host((hostname.as_str(), 0))).await;
        let latency = start.elapsed();

        match lookup {
            Ok(Ok(addrs)) => {
                let mut addresses: Vec<IpAddr> = Vec::new();
                for addr in addrs {
                    if !addresses.contains(&addr.ip()) {
                        addresses.push(addr.ip());
                    }
                }
                let addresses: Vec<String> = addresses.iter().map(IpAddr::to_string).collect();

                check
                    .with_details(json!({ "hostname": hostname, "addresses": addresses }))
                    .up(latency)
            }
            Ok(Err(e)) => check
                .down(format!("DNS resolution failed for {hostname}: {e}"))
                .with_response_time(latency),
            Err(_) => check
                .down(format!("DNS resolution timed out after {} ms", resource.timeout_ms))
                .with_response_time(latency),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::ResourceType;

    #[tokio::test]
    async fn test_resolves_localhost() {
        let resource = Resource::new("local", "localhost", ResourceType::Dns).with_timeout_ms(2_000);

        let check = DnsChecker.check(&resource).await;

        assert!(check.is_up(), "{:?}", check.error_message);
        let details = check.details.unwrap();
        assert_eq!(details["hostname"], "localhost");
        assert!(!details["addresses"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ip_literal_resolves_to_itself() {
        let resource = Resource::new("ip", "dns://127.0.0.1", ResourceType::Dns);

        let check = DnsChecker.check(&resource).await;

        assert!(check.is_up());
        assert_eq!(check.details.unwrap()["addresses"][0], "127.0.0.1");
    }

    #[tokio::test]
    async fn test_unresolvable_name_is_down() {
        let resource =
            Resource::new("nx", "does-not-exist.invalid", ResourceType::Dns).with_timeout_ms(5_000);

        let check = DnsChecker.check(&resource).await;

        assert!(!check.is_up());
        assert!(check.error_message.is_some());
    }
}
