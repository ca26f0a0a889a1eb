//! Container runtime error types.

use std::time::Duration;

use thiserror::Error;

/// Result type for container operations.
pub type ContainerResult<T> = Result<T, ContainerError>;

/// Errors that can occur during container operations.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// An engine command could not be run or exited unsuccessfully.
    #[error("container {command} failed: {message}")]
    CommandFailed { command: String, message: String },

    /// Container does not exist.
    #[error("container not found: {0}")]
    NotFound(String),

    /// Creating or starting a container did not reach a network-ready state.
    #[error("failed to provision container {name}: {message}")]
    ProvisionFailed { name: String, message: String },

    /// A command executed inside a container exited non-zero.
    #[error("command in {container} failed (exit code {code:?}): {stderr}")]
    ExecFailed {
        container: String,
        code: Option<i32>,
        stderr: String,
    },

    /// A command executed inside a container did not finish in time.
    #[error("command in {container} timed out after {timeout:?}")]
    ExecTimeout { container: String, timeout: Duration },

    /// Failed to parse engine output.
    #[error("failed to parse container output: {0}")]
    ParseError(String),

    /// Invalid input provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Generic IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ContainerError {
    /// Stderr of a failed exec, if this is one.
    pub fn exec_stderr(&self) -> Option<&str> {
        match self {
            ContainerError::ExecFailed { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}
