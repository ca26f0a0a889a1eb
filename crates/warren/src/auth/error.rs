//! Authentication errors.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    /// No token in the query, `Authorization` header or cookie.
    #[error("missing credentials")]
    MissingCredentials,

    #[error("invalid authorization header format")]
    InvalidAuthHeader,

    /// Token unknown or expired.
    #[error("invalid or expired token")]
    InvalidToken,

    #[error("insufficient permissions: {0}")]
    InsufficientPermissions(String),

    #[error("internal auth error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
pub struct AuthErrorResponse {
    pub error: String,
    pub code: &'static str,
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::MissingCredentials
            | AuthError::InvalidAuthHeader
            | AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
            AuthError::InsufficientPermissions(_) => StatusCode::FORBIDDEN,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            AuthError::MissingCredentials
            | AuthError::InvalidAuthHeader
            | AuthError::InvalidToken => "UNAUTHORIZED",
            AuthError::InsufficientPermissions(_) => "FORBIDDEN",
            AuthError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Authentication failure");
        } else {
            tracing::debug!(error = %self, "Rejected request");
        }

        let body = Json(AuthErrorResponse {
            error: self.to_string(),
            code: self.error_code(),
        });

        (status, body).into_response()
    }
}
