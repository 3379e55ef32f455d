//! Error types for the common library.
//!
//! A unified `thiserror` hierarchy shared by the server crates.
//!
//! # Error Categories
//!
//! - `ConfigError`: invalid configuration values
//! - `StorageError`: artifact store failures (unsafe path, missing file,
//!   write/read failure)
//! - `Error::Api`: upstream HTTP errors (includes endpoint and status)
//! - `Error::Validation`: input validation failures
//! - `Error::Io`: file system operations

use thiserror::Error;

/// Unified error type for the common library.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration errors (invalid env var values)
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Artifact store errors (unsafe paths, write/read failures)
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Upstream API errors with endpoint and HTTP status context
    ///
    /// Status code 0 means the request never produced an HTTP response
    /// (connection failure, timeout, cancelled call).
    #[error("API error for {endpoint} (HTTP {status_code}): {message}")]
    Api {
        /// The API endpoint that was called
        endpoint: String,
        /// HTTP status code returned by the API
        status_code: u16,
        /// Error message from the API or describing the failure
        message: String,
    },

    /// Input validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// File system I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a new API error with endpoint, status code, and message.
    pub fn api(endpoint: impl Into<String>, status_code: u16, message: impl Into<String>) -> Self {
        Error::Api {
            endpoint: endpoint.into(),
            status_code,
            message: message.into(),
        }
    }

    /// Create a new validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl ConfigError {
    /// Create a new invalid value error.
    pub fn invalid_value(name: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue(name.into(), reason.into())
    }
}

/// Artifact store errors.
///
/// Read-side errors carry the caller-supplied path; write-side errors carry
/// the resolved filesystem path that failed.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested path failed traversal validation
    #[error("Invalid file path: {0}")]
    InvalidPath(String),

    /// The resolved file does not exist
    #[error("File not found: {0}")]
    NotFound(String),

    /// Creating the partition directory or writing the artifact failed
    #[error("Failed to write artifact {path}: {message}")]
    Write {
        /// The filesystem path being written
        path: String,
        /// Error message describing the failure
        message: String,
    },

    /// Opening or reading a stored artifact failed
    #[error("Failed to read artifact {path}: {message}")]
    Read {
        /// The filesystem path being read
        path: String,
        /// Error message describing the failure
        message: String,
    },
}

impl StorageError {
    /// Create a new invalid path error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        StorageError::InvalidPath(path.into())
    }

    /// Create a new not-found error.
    pub fn not_found(path: impl Into<String>) -> Self {
        StorageError::NotFound(path.into())
    }

    /// Create a new write failure error.
    pub fn write(path: impl Into<String>, message: impl Into<String>) -> Self {
        StorageError::Write {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new read failure error.
    pub fn read(path: impl Into<String>, message: impl Into<String>) -> Self {
        StorageError::Read {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type alias using the unified Error type.
pub type Result<T> = std::result::Result<T, Error>;
