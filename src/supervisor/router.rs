//! Request dispatch for the supervisor HTTP API.
//!
//! [`Dispatcher::handle`] maps a method and path to a JSON reply and is usable
//! without a socket. [`router`] wraps it in an axum service with CORS, request
//! tracing and panic recovery.

use axum::extract::State;
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::any::Any;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any as AnyOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use super::health::HealthMonitor;
use super::lifecycle::LifecycleManager;
use super::protocol::{
    ApiBody, ClientListResponse, ClientStatusResponse, HealthResponse, IdentityResponse,
    RestartResponse,
};
use super::registry::ClientRegistry;
use crate::error::{Result, SupervisorError};

const CLIENTS_PREFIX: &str = "/clients/";
const RESTART_SUFFIX: &str = "/restart";

/// Status code plus optional JSON body
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: StatusCode,
    pub body: Option<ApiBody>,
}

impl Reply {
    pub fn ok(body: ApiBody) -> Self {
        Self {
            status: StatusCode::OK,
            body: Some(body),
        }
    }

    /// 200 without a body (CORS preflight)
    pub fn empty() -> Self {
        Self {
            status: StatusCode::OK,
            body: None,
        }
    }

    pub fn error(err: &SupervisorError) -> Self {
        Self {
            status: err.status_code(),
            body: Some(ApiBody::Error(err.to_body())),
        }
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        match self.body {
            Some(body) => (self.status, Json(body)).into_response(),
            None => self.status.into_response(),
        }
    }
}

pub struct Dispatcher {
    registry: ClientRegistry,
    health: HealthMonitor,
    lifecycle: Arc<LifecycleManager>,
}

impl Dispatcher {
    pub fn new(
        registry: ClientRegistry,
        health: HealthMonitor,
        lifecycle: Arc<LifecycleManager>,
    ) -> Self {
        Self {
            registry,
            health,
            lifecycle,
        }
    }

    /// Route one request. Failures become JSON error replies, never panics.
    pub async fn handle(&self, method: &Method, path: &str) -> Reply {
        debug!("HTTP {} {}", method, path);

        match self.route(method, path).await {
            Ok(reply) => reply,
            Err(e) => {
                if !e.is_client_error() {
                    error!("Error handling {} {}: {}", method, path, e);
                }
                Reply::error(&e)
            }
        }
    }

    async fn route(&self, method: &Method, path: &str) -> Result<Reply> {
        if *method == Method::OPTIONS {
            return Ok(Reply::empty());
        }

        match (method.as_str(), path) {
            ("GET", "/") => Ok(Reply::ok(ApiBody::Identity(IdentityResponse::default()))),
            ("GET", "/health") => Ok(Reply::ok(ApiBody::Health(HealthResponse::ok()))),
            ("GET", "/clients") => Ok(Reply::ok(ApiBody::Clients(
                ClientListResponse::from_workers(self.registry.list()),
            ))),
            ("GET", "/clients/status") => self.client_status().await,
            ("POST", p) if is_restart_path(p) => {
                let name = extract_client_name(p)?;
                self.restart(name).await
            }
            _ => Err(SupervisorError::RouteNotFound {
                method: method.to_string(),
                path: path.to_string(),
            }),
        }
    }

    async fn client_status(&self) -> Result<Reply> {
        let workers = self.registry.list();
        let results = self.health.check_all(workers).await;
        Ok(Reply::ok(ApiBody::Status(
            ClientStatusResponse::from_results(workers, results),
        )))
    }

    async fn restart(&self, name: &str) -> Result<Reply> {
        let lifecycle = Arc::clone(&self.lifecycle);
        let name = name.to_string();

        // Own task: a dropped connection must not abandon a half-done restart.
        let outcome = tokio::spawn(async move { lifecycle.restart(&name).await })
            .await
            .map_err(|e| SupervisorError::Internal(format!("Restart task failed: {}", e)))??;

        Ok(Reply::ok(ApiBody::Restart(RestartResponse::from(outcome))))
    }
}

fn is_restart_path(path: &str) -> bool {
    path.starts_with(CLIENTS_PREFIX) && path.ends_with(RESTART_SUFFIX)
}

/// Name segment of `/clients/{name}/restart`.
fn extract_client_name(path: &str) -> Result<&str> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        ["clients", name, "restart"] if is_valid_client_name(name) => Ok(*name),
        _ => Err(SupervisorError::InvalidClientName(path.to_string())),
    }
}

fn is_valid_client_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// axum service exposing the dispatcher.
pub fn router(dispatcher: Arc<Dispatcher>) -> axum::Router {
    let cors = CorsLayer::new()
        .allow_origin(AnyOrigin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    axum::Router::new()
        .fallback(dispatch)
        .with_state(dispatcher)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn dispatch(
    State(dispatcher): State<Arc<Dispatcher>>,
    method: Method,
    uri: Uri,
) -> Reply {
    dispatcher.handle(&method, uri.path()).await
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let details = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "handler panicked".to_string()
    };
    error!("Request handler panicked: {}", details);
    SupervisorError::Internal(details).into_response()
}
