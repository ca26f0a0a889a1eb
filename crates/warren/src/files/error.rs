//! File manager errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("not found: {0}")]
    NotFound(String),

    /// The path would leave the container filesystem.
    #[error("path is outside the container filesystem")]
    PathTraversal,

    /// Inside the container but off limits, like `/proc`.
    #[error("access denied: {0}")]
    Restricted(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("not a directory")]
    NotADirectory,

    #[error("not a file")]
    NotAFile,

    #[error("file too large: {size} bytes exceeds limit of {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
