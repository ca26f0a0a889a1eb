//! Session registry errors.

use thiserror::Error;

use crate::container::ContainerError;

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    /// No such session, or it belongs to someone else.
    #[error("session not found")]
    NotFound,

    #[error("{0}")]
    Validation(String),

    /// The user has not been given a container.
    #[error("no container assigned to user")]
    NoContainer,

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}
