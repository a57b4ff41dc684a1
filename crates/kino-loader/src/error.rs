//! Error types for Kino Loader

use thiserror::Error;

/// Result type alias for loader operations
pub type Result<T> = std::result::Result<T, Error>;

/// Loader error types
///
/// Errors are `Clone` so a single network failure can be handed to every
/// loading request attached to the failed fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // Interception errors
    #[error("Unsupported scheme, not intercepting: {url}")]
    UnsupportedScheme { url: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    // Network errors
    #[error("Network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("HTTP status {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    // Range errors
    #[error("Range starting at {offset} is not satisfiable (content length {content_length})")]
    RangeUnsatisfiable { offset: u64, content_length: u64 },

    #[error("Cache inconsistency for {url}: declared {declared} bytes, received {received}")]
    CacheInconsistency {
        url: String,
        declared: u64,
        received: u64,
    },

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a network error from a transport failure
    pub fn network(url: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Network {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Map a reqwest failure, keeping its message verbatim
    pub fn from_reqwest(url: &str, err: &reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Error::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            };
        }
        Error::network(url, err.to_string())
    }

    /// Returns true for failures that came from (or stand in for) the network layer
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Error::Network { .. } | Error::HttpStatus { .. } | Error::CacheInconsistency { .. }
        )
    }

    /// Returns true if retrying the same request may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Network { .. } | Error::CacheInconsistency { .. } => true,
            Error::HttpStatus { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            _ => false,
        }
    }

    /// Returns the error code reported to the host application
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::UnsupportedScheme { .. } => "UNSUPPORTED_SCHEME",
            Error::InvalidUrl(_) => "INVALID_URL",
            Error::Network { .. } => "NETWORK",
            Error::HttpStatus { .. } => "HTTP_STATUS",
            Error::RangeUnsatisfiable { .. } => "RANGE_UNSATISFIABLE",
            Error::CacheInconsistency { .. } => "CACHE_INCONSISTENCY",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::Internal(_) => "INTERNAL",
        }
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::InvalidUrl(err.to_string())
    }
}
