//! Error types shared across the sync engine.

use thiserror::Error;

/// Errors produced by the remote API surface.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The server answered with a non-zero envelope code.
    #[error("{operation} failed: {msg} (code {code})")]
    Server {
        operation: &'static str,
        code: i64,
        msg: String,
    },

    /// The body was empty or not the expected JSON envelope.
    #[error("{operation} returned an unreadable body (HTTP {status})")]
    BadBody { operation: &'static str, status: u16 },

    /// Retries were exhausted on a transient failure.
    #[error("{operation} gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        operation: &'static str,
        attempts: u32,
        last: String,
    },

    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ApiError {
    /// Feishu envelope codes for a document that no longer exists.
    const NOT_FOUND_CODES: [i64; 2] = [1770002, 230005];

    /// Whether this error means the target document is gone, which the
    /// change processor escalates to a full reconciliation.
    pub fn is_not_found(&self) -> bool {
        match self {
            ApiError::Server { code, msg, .. } => {
                Self::NOT_FOUND_CODES.contains(code) || msg.to_ascii_lowercase().contains("not found")
            }
            ApiError::BadBody { status, .. } => *status == 404,
            ApiError::Transport(e) => e.status().map(|s| s.as_u16() == 404).unwrap_or(false),
            ApiError::RetriesExhausted { .. } => false,
        }
    }
}

/// Errors surfaced by sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no manifest pairing for {0}")]
    UnknownPairing(String),

    #[error("document {0} has no page block")]
    MissingPageBlock(String),
}

impl SyncError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the underlying cause is a missing remote document.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::Api(e) if e.is_not_found())
    }
}
