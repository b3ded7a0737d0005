use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::error::Error as _;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, trace};

use super::registry::WorkerConfig;
use crate::error::{Result, SupervisorError};

/// Default per-probe timeout
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default host used to reach workers
pub const DEFAULT_PROBE_HOST: &str = "localhost";

const TIMEOUT_DETAIL: &str = "Health check timed out";

/// Classification of a single probe
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// Health endpoint answered 2xx
    Running,
    /// Health endpoint answered with a non-2xx status
    Unhealthy,
    /// Connection refused or other network failure
    NotResponding,
    /// No answer within the probe timeout
    Timeout,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Running => "running",
            HealthState::Unhealthy => "unhealthy",
            HealthState::NotResponding => "not_responding",
            HealthState::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of probing one worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthResult {
    pub healthy: bool,
    pub state: HealthState,
    pub detail: String,
}

impl HealthResult {
    pub fn running(body: impl Into<String>) -> Self {
        Self {
            healthy: true,
            state: HealthState::Running,
            detail: body.into(),
        }
    }

    pub fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            healthy: false,
            state: HealthState::Unhealthy,
            detail: detail.into(),
        }
    }

    pub fn not_responding(detail: impl Into<String>) -> Self {
        Self {
            healthy: false,
            state: HealthState::NotResponding,
            detail: detail.into(),
        }
    }

    pub fn timed_out() -> Self {
        Self {
            healthy: false,
            state: HealthState::Timeout,
            detail: TIMEOUT_DETAIL.to_string(),
        }
    }

    fn from_request_error(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timed_out()
        } else {
            Self::not_responding(error_chain(err))
        }
    }
}

/// Probes worker health endpoints over loopback HTTP.
///
/// Cheap to clone; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    client: reqwest::Client,
    host: String,
    timeout: Duration,
}

impl HealthMonitor {
    pub fn new(host: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|e| {
                SupervisorError::Internal(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            host: host.into(),
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn health_url(&self, port: u16) -> String {
        format!("http://{}:{}/health", self.host, port)
    }

    /// Probe one worker. Never fails: every outcome is folded into the result.
    pub async fn check_health(&self, worker: &WorkerConfig) -> HealthResult {
        let url = self.health_url(worker.port);
        trace!(client = %worker.name, url = %url, "Probing worker");

        let result = match self.client.get(&url).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    match response.text().await {
                        Ok(body) => HealthResult::running(body),
                        Err(e) => HealthResult::from_request_error(&e),
                    }
                } else {
                    HealthResult::unhealthy(format!("HTTP {}", status))
                }
            }
            Err(e) => HealthResult::from_request_error(&e),
        };

        debug!(
            client = %worker.name,
            port = worker.port,
            state = %result.state,
            "Health probe finished"
        );
        result
    }

    /// Probe every worker concurrently. Results come back in input order.
    pub async fn check_all(&self, workers: &[WorkerConfig]) -> Vec<HealthResult> {
        join_all(workers.iter().map(|w| self.check_health(w))).await
    }

    /// Whether anything currently accepts TCP connections on the port.
    pub async fn is_listening(&self, port: u16) -> bool {
        let connect = TcpStream::connect((self.host.as_str(), port));
        matches!(tokio::time::timeout(self.timeout, connect).await, Ok(Ok(_)))
    }
}

fn error_chain(err: &reqwest::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn monitor(timeout: Duration) -> HealthMonitor {
        HealthMonitor::new("127.0.0.1", timeout).unwrap()
    }

    async fn worker_answering(template: ResponseTemplate) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(template)
            .mount(&server)
            .await;
        server
    }

    fn refused_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn test_health_state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(HealthState::NotResponding).unwrap(),
            serde_json::json!("not_responding")
        );
        assert_eq!(HealthState::Running.to_string(), "running");
    }

    #[tokio::test]
    async fn test_running_on_2xx() {
        let server = worker_answering(ResponseTemplate::new(200).set_body_string("ok")).await;
        let worker = WorkerConfig::new("client01", server.address().port(), "~/c1");

        let result = monitor(Duration::from_secs(2)).check_health(&worker).await;
        assert!(result.healthy);
        assert_eq!(result.state, HealthState::Running);
        assert_eq!(result.detail, "ok");
    }

    #[tokio::test]
    async fn test_unhealthy_on_error_status() {
        let server = worker_answering(ResponseTemplate::new(503)).await;
        let worker = WorkerConfig::new("client01", server.address().port(), "~/c1");

        let result = monitor(Duration::from_secs(2)).check_health(&worker).await;
        assert!(!result.healthy);
        assert_eq!(result.state, HealthState::Unhealthy);
        assert!(result.detail.starts_with("HTTP 503"));
    }

    #[tokio::test]
    async fn test_not_responding_when_refused() {
        let worker = WorkerConfig::new("client02", refused_port(), "~/c2");

        let result = monitor(Duration::from_secs(2)).check_health(&worker).await;
        assert!(!result.healthy);
        assert_eq!(result.state, HealthState::NotResponding);
        assert!(!result.detail.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_when_slow() {
        let server = worker_answering(
            ResponseTemplate::new(200).set_delay(Duration::from_secs(3)),
        )
        .await;
        let worker = WorkerConfig::new("client03", server.address().port(), "~/c3");

        let result = monitor(Duration::from_millis(200)).check_health(&worker).await;
        assert_eq!(result.state, HealthState::Timeout);
        assert_eq!(result.detail, "Health check timed out");
    }

    #[tokio::test]
    async fn test_check_all_fans_out() {
        let timeout = Duration::from_millis(300);
        let mut servers = Vec::new();
        let mut workers = Vec::new();
        for i in 0..4u16 {
            let server = worker_answering(
                ResponseTemplate::new(200).set_delay(Duration::from_secs(3)),
            )
            .await;
            workers.push(WorkerConfig::new(
                format!("client{:02}", i),
                server.address().port(),
                "~/c",
            ));
            servers.push(server);
        }

        let started = Instant::now();
        let results = monitor(timeout).check_all(&workers).await;
        let elapsed = started.elapsed();

        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| r.state == HealthState::Timeout));
        // Sequential probing would take at least 4 x timeout
        assert!(elapsed < timeout * 3, "fan-out took {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_check_all_preserves_order() {
        let up = worker_answering(ResponseTemplate::new(200).set_body_string("ok")).await;
        let workers = vec![
            WorkerConfig::new("client01", up.address().port(), "~/c1"),
            WorkerConfig::new("client02", refused_port(), "~/c2"),
        ];

        let results = monitor(Duration::from_secs(2)).check_all(&workers).await;
        assert_eq!(results[0].state, HealthState::Running);
        assert_eq!(results[1].state, HealthState::NotResponding);
    }

    #[tokio::test]
    async fn test_check_all_empty() {
        let results = monitor(Duration::from_secs(1)).check_all(&[]).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_is_listening() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let monitor = monitor(Duration::from_secs(1));

        assert!(monitor.is_listening(port).await);
        drop(listener);
        assert!(!monitor.is_listening(port).await);
    }
}
