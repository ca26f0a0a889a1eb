//! Unified API error handling with structured responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::auth::AuthError;
use crate::container::ContainerError;
use crate::files::FileError;
use crate::session::SessionError;
use crate::terminal::RelayError;
use crate::user::TenantError;

/// API error type with structured responses.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Gateway error: {0}")]
    BadGateway(String),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Conflict(_) => "CONFLICT",
            Self::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            Self::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::BadGateway(_) => "BAD_GATEWAY",
        }
    }

    /// Error for a bare status code produced by the proxy layer.
    pub fn from_status(status: StatusCode, msg: impl Into<String>) -> Self {
        let msg = msg.into();
        match status {
            StatusCode::NOT_FOUND => Self::NotFound(msg),
            StatusCode::BAD_REQUEST => Self::BadRequest(msg),
            StatusCode::SERVICE_UNAVAILABLE => Self::ServiceUnavailable(msg),
            StatusCode::BAD_GATEWAY => Self::BadGateway(msg),
            _ => Self::Internal(msg),
        }
    }
}

/// Structured error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();

        match &self {
            ApiError::Internal(msg) | ApiError::BadGateway(msg) => {
                error!(error_code = code, message = %msg, "API error");
            }
            ApiError::ServiceUnavailable(msg) => {
                warn!(error_code = code, message = %msg, "Service unavailable");
            }
            _ => {
                tracing::debug!(error_code = code, message = %message, "Client error");
            }
        }

        let body = ErrorResponse {
            error: message,
            code,
        };

        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{:#}", err))
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingCredentials | AuthError::InvalidAuthHeader | AuthError::InvalidToken => {
                ApiError::Unauthorized(err.to_string())
            }
            AuthError::InsufficientPermissions(msg) => ApiError::Forbidden(msg),
            AuthError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<ContainerError> for ApiError {
    fn from(err: ContainerError) -> Self {
        match err {
            ContainerError::NotFound(name) => {
                ApiError::ServiceUnavailable(format!("container {} is not available", name))
            }
            ContainerError::InvalidInput(msg) => ApiError::BadRequest(msg),
            ContainerError::ProvisionFailed { .. }
            | ContainerError::ExecFailed { .. }
            | ContainerError::ExecTimeout { .. } => ApiError::BadGateway(err.to_string()),
            ContainerError::CommandFailed { .. }
            | ContainerError::ParseError(_)
            | ContainerError::Io(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound => ApiError::NotFound("session not found".to_string()),
            SessionError::Validation(msg) => ApiError::BadRequest(msg),
            SessionError::NoContainer => ApiError::BadRequest(err.to_string()),
            SessionError::Container(e) => e.into(),
            SessionError::Storage(e) => e.into(),
        }
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::Unauthorized => ApiError::Unauthorized(err.to_string()),
            RelayError::Forbidden => ApiError::Forbidden(err.to_string()),
            RelayError::NotFound => ApiError::NotFound(err.to_string()),
            RelayError::Validation(msg) => ApiError::BadRequest(msg),
            RelayError::Attach(msg) => ApiError::BadGateway(msg),
        }
    }
}

impl From<TenantError> for ApiError {
    fn from(err: TenantError) -> Self {
        match err {
            TenantError::UserNotFound(_) => ApiError::NotFound(err.to_string()),
            TenantError::AlreadyProvisioned(_) => ApiError::Conflict(err.to_string()),
            TenantError::Container(e) => e.into(),
            TenantError::Session(e) => e.into(),
            TenantError::Storage(e) => e.into(),
        }
    }
}

impl From<FileError> for ApiError {
    fn from(err: FileError) -> Self {
        match err {
            FileError::NotFound(_) => ApiError::NotFound(err.to_string()),
            FileError::PathTraversal | FileError::Restricted(_) => {
                ApiError::Forbidden(err.to_string())
            }
            FileError::InvalidPath(_) | FileError::NotADirectory | FileError::NotAFile => {
                ApiError::BadRequest(err.to_string())
            }
            FileError::AlreadyExists(_) => ApiError::Conflict(err.to_string()),
            FileError::FileTooLarge { .. } => ApiError::PayloadTooLarge(err.to_string()),
            FileError::Io(_) => ApiError::Internal(err.to_string()),
        }
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn session_errors_map_to_client_statuses() {
        assert_eq!(
            ApiError::from(SessionError::NotFound).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(SessionError::Validation("too long".into())).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(SessionError::NoContainer).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn container_errors_map_to_upstream_statuses() {
        let timeout = ContainerError::ExecTimeout {
            container: "c1".into(),
            timeout: Duration::from_secs(5),
        };
        assert_eq!(ApiError::from(timeout).status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            ApiError::from(ContainerError::NotFound("c1".into())).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn relay_errors_map_to_handshake_statuses() {
        assert_eq!(
            ApiError::from(RelayError::Unauthorized).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(RelayError::Forbidden).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::from(RelayError::NotFound).status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn file_errors_map_to_client_statuses() {
        assert_eq!(
            ApiError::from(FileError::PathTraversal).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::from(FileError::FileTooLarge { size: 2, limit: 1 }).status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            ApiError::from(FileError::AlreadyExists("/tmp/a".into())).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(FileError::NotAFile).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn response_body_is_structured() {
        let response = ApiError::not_found("session not found").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["code"], "NOT_FOUND");
        assert!(json["error"].as_str().unwrap().contains("session not found"));
    }
}
