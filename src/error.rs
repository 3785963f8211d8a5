//! Crate-wide error enum (spec.md §7), covering the path, permission,
//! crypto and resource domains plus the I/O and store failures an embedded
//! KV-backed filesystem has to account for at every layer.

use thiserror::Error;

use crate::dope::DopeError;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("path not found")]
    NotFound,
    #[error("not a directory")]
    NotADirectory,
    #[error("directory not empty")]
    NotEmpty,
    #[error("operation not valid for this inode kind")]
    UnexpectedKind,
    #[error("permission denied")]
    PermissionDenied,
    #[error("quota exceeded")]
    QuotaExceeded,
    #[error(transparent)]
    Dope(#[from] DopeError),
    #[error(transparent)]
    Store(#[from] sled::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("malformed tree image: {0}")]
    MalformedTree(String),
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
