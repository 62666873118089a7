//! Error types and result aliases.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid endpoint {endpoint:?}: {message}")]
    InvalidEndpoint { endpoint: String, message: String },

    #[error("Could not determine user cache directory. Set GOCACHE_DISK_DIR to choose one.")]
    CacheDir,

    #[error("AWS profile {profile:?}: {message}")]
    Credentials { profile: String, message: String },

    #[error("S3 error for bucket {bucket}: {message}")]
    S3 { bucket: String, message: String },

    #[error("HTTP cache error: {0}")]
    Http(String),

    #[error("Invalid {kind} {id:?}: {message}")]
    InvalidId {
        kind: &'static str,
        id: String,
        message: String,
    },

    #[error("Body size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("Protocol error: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, Error>;
