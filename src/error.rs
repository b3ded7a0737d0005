use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::supervisor::protocol::ErrorBody;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Invalid client name")]
    InvalidClientName(String),

    #[error("Not found")]
    RouteNotFound { method: String, path: String },

    #[error("Client '{0}' not found")]
    ClientNotFound(String),

    #[error("Restart already in progress for client '{0}'")]
    RestartInProgress(String),

    #[error("{0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SupervisorError {
    /// HTTP status this error is reported with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidClientName(_) => StatusCode::BAD_REQUEST,
            Self::RouteNotFound { .. } | Self::ClientNotFound(_) => StatusCode::NOT_FOUND,
            Self::RestartInProgress(_) => StatusCode::CONFLICT,
            Self::Internal(_) | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the caller can fix the request (4xx) as opposed to a server-side failure.
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    pub fn to_body(&self) -> ErrorBody {
        if self.is_client_error() {
            ErrorBody::new(self.to_string())
        } else {
            ErrorBody::internal(self.to_string())
        }
    }
}

impl IntoResponse for SupervisorError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.to_body())).into_response()
    }
}

pub type Result<T> = std::result::Result<T, SupervisorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            SupervisorError::InvalidClientName("a/b".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            SupervisorError::ClientNotFound("client09".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            SupervisorError::RouteNotFound {
                method: "GET".into(),
                path: "/nope".into()
            }
            .status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            SupervisorError::RestartInProgress("client01".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            SupervisorError::Internal("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_bodies() {
        let body = SupervisorError::ClientNotFound("client09".into()).to_body();
        assert_eq!(body.error, "Client 'client09' not found");
        assert!(body.details.is_none());

        let body = SupervisorError::Internal("task panicked".into()).to_body();
        assert_eq!(body.error, "Internal server error");
        assert_eq!(body.details.as_deref(), Some("task panicked"));
    }
}
