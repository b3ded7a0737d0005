//! JSON response types for the supervisor HTTP API
//!
//! Every endpoint has its own struct so the response contract is checked at
//! compile time. Keys are serialized in camelCase.

use serde::{Deserialize, Serialize};

use super::health::{HealthResult, HealthState};
use super::lifecycle::RestartOutcome;
use super::registry::WorkerConfig;

pub const SERVER_MESSAGE: &str = "Client Manager Server";

/// `GET /`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IdentityResponse {
    pub message: String,
    pub version: String,
}

impl Default for IdentityResponse {
    fn default() -> Self {
        Self {
            message: SERVER_MESSAGE.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// `GET /health`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
}

impl HealthResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

/// One entry of `GET /clients`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientEntry {
    pub name: String,
    pub port: u16,
    pub data_path: String,
}

impl From<&WorkerConfig> for ClientEntry {
    fn from(worker: &WorkerConfig) -> Self {
        Self {
            name: worker.name.clone(),
            port: worker.port,
            data_path: worker.data_path.clone(),
        }
    }
}

/// `GET /clients`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientListResponse {
    pub clients: Vec<ClientEntry>,
    pub count: usize,
}

impl ClientListResponse {
    pub fn from_workers(workers: &[WorkerConfig]) -> Self {
        let clients: Vec<ClientEntry> = workers.iter().map(ClientEntry::from).collect();
        Self {
            count: clients.len(),
            clients,
        }
    }
}

/// One entry of `GET /clients/status`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientStatus {
    pub name: String,
    pub port: u16,
    pub healthy: bool,
    pub status: HealthState,
    pub details: String,
}

impl ClientStatus {
    pub fn new(worker: &WorkerConfig, health: HealthResult) -> Self {
        Self {
            name: worker.name.clone(),
            port: worker.port,
            healthy: health.healthy,
            status: health.state,
            details: health.detail,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusSummary {
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
}

/// `GET /clients/status`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientStatusResponse {
    pub clients: Vec<ClientStatus>,
    pub summary: StatusSummary,
}

impl ClientStatusResponse {
    /// Pair probe results with their workers and count them.
    ///
    /// `results` must be in the same order as `workers`.
    pub fn from_results(workers: &[WorkerConfig], results: Vec<HealthResult>) -> Self {
        let clients: Vec<ClientStatus> = workers
            .iter()
            .zip(results)
            .map(|(worker, health)| ClientStatus::new(worker, health))
            .collect();

        let healthy = clients.iter().filter(|c| c.healthy).count();
        let summary = StatusSummary {
            total: clients.len(),
            healthy,
            unhealthy: clients.len() - healthy,
        };

        Self { clients, summary }
    }
}

/// `POST /clients/{name}/restart`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RestartResponse {
    pub success: bool,
    pub message: String,
    pub client: String,
    pub port: u16,
    pub healthy: bool,
    /// Absent when the workflow failed before a replacement was launched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<HealthState>,
}

impl From<RestartOutcome> for RestartResponse {
    fn from(outcome: RestartOutcome) -> Self {
        let healthy = outcome
            .final_health
            .as_ref()
            .map(|h| h.healthy)
            .unwrap_or(false);
        Self {
            success: outcome.success,
            message: outcome.message,
            client: outcome.worker_name,
            port: outcome.port,
            healthy,
            status: outcome.final_health.map(|h| h.state),
        }
    }
}

/// Error body for any non-2xx reply
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn internal(details: impl Into<String>) -> Self {
        Self {
            error: "Internal server error".to_string(),
            details: Some(details.into()),
        }
    }
}

/// Body of a dispatcher reply
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ApiBody {
    Identity(IdentityResponse),
    Health(HealthResponse),
    Clients(ClientListResponse),
    Status(ClientStatusResponse),
    Restart(RestartResponse),
    Error(ErrorBody),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn worker(name: &str, port: u16) -> WorkerConfig {
        WorkerConfig::new(name, port, format!("~/naps2-{}", name))
    }

    #[test]
    fn test_client_list_camel_case() {
        let body = ClientListResponse::from_workers(&[worker("client01", 9061)]);
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(
            value,
            json!({
                "clients": [{"name": "client01", "port": 9061, "dataPath": "~/naps2-client01"}],
                "count": 1
            })
        );
    }

    #[test]
    fn test_status_summary_counts() {
        let workers = [worker("a", 1), worker("b", 2), worker("c", 3)];
        let results = vec![
            HealthResult::running("ok"),
            HealthResult::not_responding("connection refused"),
            HealthResult::timed_out(),
        ];
        let body = ClientStatusResponse::from_results(&workers, results);

        assert_eq!(body.summary.total, 3);
        assert_eq!(body.summary.healthy, 1);
        assert_eq!(body.summary.unhealthy, 2);
        assert_eq!(
            body.summary.total,
            body.summary.healthy + body.summary.unhealthy
        );
        assert_eq!(body.clients[1].status, HealthState::NotResponding);
        assert_eq!(body.clients[2].details, "Health check timed out");
    }

    #[test]
    fn test_restart_response_without_launch_omits_status() {
        let outcome = RestartOutcome {
            success: false,
            message: "Failed to restart client: no such file".to_string(),
            worker_name: "client01".to_string(),
            port: 9061,
            final_health: None,
        };
        let value = serde_json::to_value(RestartResponse::from(outcome)).unwrap();
        assert_eq!(value["success"], json!(false));
        assert_eq!(value["healthy"], json!(false));
        assert_eq!(value["client"], json!("client01"));
        assert!(value.get("status").is_none());
    }

    #[test]
    fn test_api_body_is_untagged() {
        let value = serde_json::to_value(ApiBody::Health(HealthResponse::ok())).unwrap();
        assert_eq!(value, json!({"status": "ok"}));

        let value = serde_json::to_value(ApiBody::Error(ErrorBody::internal("boom"))).unwrap();
        assert_eq!(
            value,
            json!({"error": "Internal server error", "details": "boom"})
        );
    }
}
