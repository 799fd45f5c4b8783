//! Parsing of resource addresses into hosts and ports.
//!
//! Resources store either a full URL (`https://example.com`, `tcp://db:5432`)
//! or a bare `host:port` / `host` literal depending on the protocol.

use anyhow::{Result, anyhow};
use url::Url;

/// Extract `(host, port)` from a URL or `host:port` literal.
///
/// URLs without an explicit port use the scheme's well known port, then
/// `default_port`.
pub fn host_port(target: &str, default_port: Option<u16>) -> Result<(String, u16)> {
    let target = target.trim();
    if target.is_empty() {
        return Err(anyhow!("Target cannot be empty"));
    }

    if target.contains("://") {
        let url = Url::parse(target).map_err(|e| anyhow!("Invalid URL: {}", e))?;
        let host = url
            .host_str()
            .ok_or_else(|| anyhow!("URL must have a valid host"))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = url
            .port_or_known_default()
            .or(default_port)
            .ok_or_else(|| anyhow!("No port given for {}", target))?;
        return Ok((host, port));
    }

    // [::1]:8080
    if let Some(rest) = target.strip_prefix('[') {
        let (host, tail) =
            rest.split_once(']').ok_or_else(|| anyhow!("Unterminated IPv6 literal: {}", target))?;
        let port = match tail.strip_prefix(':') {
            Some(port) => parse_port(port)?,
            None => default_port.ok_or_else(|| anyhow!("No port given for {}", target))?,
        };
        return Ok((host.to_string(), port));
    }

    match target.rsplit_once(':') {
        // A bare IPv6 address has several colons and no port
        Some((host, port)) if !host.contains(':') => Ok((host.to_string(), parse_port(port)?)),
        _ => {
            let port = default_port.ok_or_else(|| anyhow!("Target must be in format host:port"))?;
            Ok((target.to_string(), port))
        }
    }
}

/// Extract only the host name from a URL or literal
pub fn host(target: &str) -> Result<String> {
    let target = target.trim();
    if target.contains("://") {
        let url = Url::parse(target).map_err(|e| anyhow!("Invalid URL: {}", e))?;
        return url
            .host_str()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
            .ok_or_else(|| anyhow!("URL must have a valid host"));
    }

    // Port is irrelevant here, any placeholder will do
    host_port(target, Some(0)).map(|(host, _)| host)
}

fn parse_port(port: &str) -> Result<u16> {
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(anyhow!("Invalid port number: {}", port)),
        Ok(port) => Ok(port),
    }
}
