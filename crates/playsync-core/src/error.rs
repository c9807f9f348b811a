//! Error types for Playsync core operations.
//!
//! Remote failures are absorbed at the client boundary (see [`crate::remote`]);
//! the variants here describe why a fetch produced no data so callers can
//! decide between "leave the snapshot alone", "retry later" and "skip".

use std::path::PathBuf;

use thiserror::Error;

use crate::model::BackendKind;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Playsync core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The remote call could not be completed (connection refused, timeout, ...).
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    /// The remote answered with HTTP 429.
    #[error("Rate limited by remote")]
    RateLimited,

    /// The remote answered with an HTTP status >= 400.
    #[error("Server error: HTTP {status}")]
    ServerError {
        /// HTTP status code returned by the remote.
        status: u16,
    },

    /// No app token is available for an authenticated call.
    #[error("No auth token available")]
    AuthMissing,

    /// No player backend is registered for the requested kind.
    #[error("Player backend not available: {0}")]
    BackendUnavailable(BackendKind),

    /// A player backend rejected a command.
    #[error("{backend} backend error: {message}")]
    Backend {
        /// Backend that failed.
        backend: BackendKind,
        /// Error message.
        message: String,
    },

    /// The engine has no active session.
    #[error("Sync engine is not active")]
    Inactive,

    /// Playlist not present in the current snapshot.
    #[error("Playlist not found: {0}")]
    PlaylistNotFound(String),

    /// File system operation failed.
    #[error("File system error at {path}: {message}")]
    FileSystem {
        /// Path where the error occurred.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a network error from any message.
    pub fn network_error(message: impl Into<String>) -> Self {
        Self::NetworkUnavailable(message.into())
    }

    /// Create a backend error.
    pub fn backend(backend: BackendKind, message: impl Into<String>) -> Self {
        Self::Backend {
            backend,
            message: message.into(),
        }
    }

    /// Map an HTTP status code to an error, `None` for non-error codes.
    #[must_use]
    pub const fn from_status(status: u16) -> Option<Self> {
        match status {
            429 => Some(Self::RateLimited),
            s if s >= 400 => Some(Self::ServerError { status: s }),
            _ => None,
        }
    }

    /// Whether a delayed full retry of the same fetch is appropriate.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::ServerError { .. })
    }
}
