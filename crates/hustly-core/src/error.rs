//! Error types for the Hustly gateway.
//!
//! Every fallible operation in the library returns [`HustlyError`]. Most
//! variants carry a human-readable message and, where one exists, the
//! underlying error as a `#[source]`.

use std::path::PathBuf;
use thiserror::Error;

use crate::lifecycle::LifecycleState;

/// Main error type for the Hustly gateway.
#[derive(Debug, Error)]
pub enum HustlyError {
    // Network errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// Optional cause description
        cause: Option<String>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    // Storage errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("Cache store error in '{store}': {message}")]
    Store { store: String, message: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Lifecycle errors
    #[error("Install failed while precaching {url}: {message}")]
    InstallFailed { url: String, message: String },

    #[error("Invalid lifecycle transition: cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: LifecycleState,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    // Platform seam errors
    #[error("Window client not found: {0}")]
    ClientNotFound(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for Hustly operations.
pub type Result<T> = std::result::Result<T, HustlyError>;

impl From<std::io::Error> for HustlyError {
    fn from(err: std::io::Error) -> Self {
        HustlyError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for HustlyError {
    fn from(err: serde_json::Error) -> Self {
        HustlyError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for HustlyError {
    fn from(err: rusqlite::Error) -> Self {
        HustlyError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for HustlyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            HustlyError::Timeout(std::time::Duration::from_secs(0))
        } else {
            HustlyError::Network {
                message: err.to_string(),
                cause: std::error::Error::source(&err).map(|s| s.to_string()),
            }
        }
    }
}

impl From<url::ParseError> for HustlyError {
    fn from(err: url::ParseError) -> Self {
        HustlyError::InvalidUrl {
            url: String::new(),
            message: err.to_string(),
        }
    }
}

impl HustlyError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        HustlyError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a store error.
    pub fn store(store: impl Into<String>, message: impl Into<String>) -> Self {
        HustlyError::Store {
            store: store.into(),
            message: message.into(),
        }
    }

    /// Whether this error came from the network rather than local state.
    pub fn is_network(&self) -> bool {
        matches!(self, HustlyError::Network { .. } | HustlyError::Timeout(_))
    }

    /// HTTP status the proxy server reports for this error.
    ///
    /// - 502: upstream could not be reached
    /// - 504: upstream timed out
    /// - 400: malformed request or URL
    /// - 404: unknown window client
    /// - 500: everything else
    pub fn http_status(&self) -> u16 {
        match self {
            HustlyError::Network { .. } => 502,
            HustlyError::Timeout(_) => 504,
            HustlyError::InvalidUrl { .. } => 400,
            HustlyError::ClientNotFound(_) => 404,
            _ => 500,
        }
    }
}
