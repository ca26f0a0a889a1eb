//! Relay errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("authentication required")]
    Unauthorized,

    #[error("session belongs to another user")]
    Forbidden,

    #[error("session not found")]
    NotFound,

    #[error("{0}")]
    Validation(String),

    /// The terminal process could not be started or has gone away.
    #[error("terminal attachment failed: {0}")]
    Attach(String),
}
