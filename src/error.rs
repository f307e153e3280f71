/// Error types for the index, the collaborators and the review session
///
/// Only boundaries that can genuinely fail return these. Batch writes, queries and
/// per-cluster commits log their failures and carry on instead of propagating them.

use std::path::PathBuf;
use thiserror::Error;

/// Failures of the SQLite-backed spatial index
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("could not create index directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not determine a data directory for the index")]
    NoDataDir,
    #[error("index connection lock poisoned")]
    Poisoned,
}

/// Failures reported by the photo library collaborator
#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("photo library access denied")]
    AccessDenied,
    #[error("photo library unavailable: {0}")]
    Unavailable(String),
}

/// Failures reported by the place resolver or the log store
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("place resolution failed: {0}")]
    Resolve(String),
    #[error("log persistence failed: {0}")]
    Persist(String),
}

/// Misuse of the review session
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    #[error("cannot move from {from} to {to}")]
    InvalidTransition { from: &'static str, to: &'static str },
    #[error("session is not reviewing (currently {0})")]
    NotReviewing(&'static str),
    #[error("could not read trip sort keys: {0}")]
    SortKeys(String),
}

/// Failures loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}
