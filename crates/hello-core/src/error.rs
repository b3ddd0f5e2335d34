//! Error types for hello-core

use thiserror::Error;

/// Result type alias for hello operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the hello HTTP server
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid HTTP method
    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    /// Invalid header
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// Body too large
    #[error("Body too large: exceeds limit of {limit} bytes")]
    BodyTooLarge { limit: usize },

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Exchange did not complete in time
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// IO error (native only)
    #[cfg(feature = "native")]
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Hyper error (native only)
    #[cfg(feature = "native")]
    #[error("HTTP error: {0}")]
    Hyper(#[from] hyper::Error),

    /// Request or response construction error (native only)
    #[cfg(feature = "native")]
    #[error("HTTP message error: {0}")]
    Http(#[from] hyper::http::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
