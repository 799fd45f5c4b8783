use std::time::{Duration, Instant};

use anyhow::Result;
use reqwest::redirect::Policy;
use serde_json::json;

use super::{Checker, error_chain};
use crate::database::models::Resource;
use crate::monitoring::types::Check;

/// Redirects followed before a request is considered failed
pub const MAX_REDIRECTS: usize = 5;

/// HTTP/HTTPS/health checker
pub struct HttpChecker {
    client: reqwest::Client,
}

impl HttpChecker {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(Policy::limited(MAX_REDIRECTS))
            .user_agent(concat!("uppe-sentinel/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }

    fn describe_error(error: &reqwest::Error, timeout: Duration) -> String {
        if error.is_timeout() {
            format!("HTTP request timed out after {} ms", timeout.as_millis())
        } else if error.is_redirect() {
            format!("Too many redirects (limit {MAX_REDIRECTS})")
        } else if error.is_connect() {
            format!("Connection failed: {}", error_chain(error))
        } else {
            format!("HTTP request failed: {}", error_chain(error))
        }
    }
}

#[async_trait::async_trait]
impl Checker for HttpChecker {
    async fn check(&self, resource: &Resource) -> Check {
        let check = Check::new(resource.id);
        let timeout = resource.timeout();
        let start = Instant::now();

        let mut request = self.client.get(&resource.url).timeout(timeout);
        for (name, value) in &resource.http_headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                return check
                    .down(Self::describe_error(&e, timeout))
                    .with_response_time(start.elapsed());
            }
        };

        let latency = start.elapsed();
        let status = response.status();
        let check = check
            .with_status_code(status.as_u16())
            .with_details(json!({ "final_url": response.url().as_str(), "status": status.as_u16() }));

        // Consider 2xx and 3xx as success
        if !(status.is_success() || status.is_redirection()) {
            return check
                .down(format!("HTTP check failed with status code: {}", status.as_u16()))
                .with_response_time(latency);
        }

        if let Some(keyword) = resource.http_keyword.as_deref().filter(|k| !k.is_empty()) {
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    return check
                        .down(format!("Failed to read response body: {}", error_chain(&e)))
                        .with_response_time(latency);
                }
            };

            if !body.contains(keyword) {
                return check
                    .down(format!("Keyword '{keyword}' not found in response body"))
                    .with_response_time(latency);
            }
        }

        check.up(latency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::ResourceType;
    use crate::monitoring::types::CheckStatus;
    use crate::testing::{closed_port, http_response, spawn_http_server};

    fn resource(url: String) -> Resource {
        Resource::new("web", url, ResourceType::Http).with_timeout_ms(2_000)
    }

    #[tokio::test]
    async fn test_http_200_is_up() {
        let addr = spawn_http_server(|_| http_response(200, "OK", "all good")).await;
        let checker = HttpChecker::new().unwrap();

        let check = checker.check(&resource(format!("http://{addr}/"))).await;

        assert_eq!(check.status, CheckStatus::Up);
        assert_eq!(check.status_code, Some(200));
        assert!(check.response_time_ms.unwrap() > 0.0);
        assert!(check.error_message.is_none());
    }

    #[tokio::test]
    async fn test_http_500_is_down() {
        let addr = spawn_http_server(|_| http_response(500, "Internal Server Error", "boom")).await;
        let checker = HttpChecker::new().unwrap();

        let check = checker.check(&resource(format!("http://{addr}/"))).await;

        assert_eq!(check.status, CheckStatus::Down);
        assert_eq!(check.status_code, Some(500));
        assert!(check.error_message.unwrap().contains("500"));
    }

    #[tokio::test]
    async fn test_keyword_required_in_body() {
        let addr = spawn_http_server(|_| http_response(200, "OK", "{\"status\":\"healthy\"}")).await;
        let checker = HttpChecker::new().unwrap();

        let mut present = resource(format!("http://{addr}/health"));
        present.http_keyword = Some("healthy".into());
        assert!(checker.check(&present).await.is_up());

        let mut absent = present.clone();
        absent.http_keyword = Some("degraded".into());
        let check = checker.check(&absent).await;
        assert!(!check.is_up());
        assert!(check.error_message.unwrap().contains("degraded"));
    }

    #[tokio::test]
    async fn test_redirects_are_followed() {
        let addr = spawn_http_server(|request| {
            if request.starts_with("GET /final ") {
                http_response(200, "OK", "landed")
            } else {
                "HTTP/1.1 302 Found\r\nLocation: /final\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                    .to_string()
            }
        })
        .await;
        let checker = HttpChecker::new().unwrap();

        let check = checker.check(&resource(format!("http://{addr}/start"))).await;

        assert!(check.is_up());
        assert_eq!(check.status_code, Some(200));
        let final_url = check.details.unwrap()["final_url"].as_str().unwrap().to_string();
        assert!(final_url.ends_with("/final"));
    }

    #[tokio::test]
    async fn test_redirect_loop_is_down() {
        let addr = spawn_http_server(|_| {
            "HTTP/1.1 302 Found\r\nLocation: /again\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                .to_string()
        })
        .await;
        let checker = HttpChecker::new().unwrap();

        let check = checker.check(&resource(format!("http://{addr}/"))).await;

        assert!(!check.is_up());
        assert!(check.error_message.is_some());
    }

    #[tokio::test]
    async fn test_connection_refused_is_down() {
        let port = closed_port().await;
        let checker = HttpChecker::new().unwrap();

        let check = checker.check(&resource(format!("http://127.0.0.1:{port}/"))).await;

        assert!(!check.is_up());
        assert!(check.status_code.is_none());
        assert!(check.error_message.is_some());
    }
}
