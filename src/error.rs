//! Error types for media-dl
//!
//! This module provides the error handling used across the library:
//! - A crate-wide [`Error`] with nested [`DatabaseError`] and [`DownloaderError`] enums
//! - [`ErrorCategory`], the transient/permanent classification that drives job retry
//! - [`ResultExt`] for attaching context or a category to any fallible call
//!
//! Categories survive wrapping: an error marked permanent stays permanent no matter
//! how many layers of context are added on top of it. Errors that were never
//! classified are treated as transient.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for media-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Failure classification used by the worker to decide between retry and failure
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Safe to retry later (network errors, timeouts, backend temporarily unavailable)
    #[default]
    Transient,
    /// Retrying cannot help (bad configuration, missing data, nothing to import)
    Permanent,
}

impl ErrorCategory {
    /// String form stored in the database and in event metadata
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
        }
    }

    /// Parse a stored category, treating anything unrecognized as transient
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "permanent" => ErrorCategory::Permanent,
            _ => ErrorCategory::Transient,
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for media-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "timeout_secs")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Downloader backend or client management error
    #[error("downloader error: {0}")]
    Downloader(#[from] DownloaderError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Record not found
    #[error("not found: {0}")]
    NotFound(String),

    /// A status change the state machine does not allow
    #[error("invalid {kind} transition: {from} -> {to}")]
    InvalidTransition {
        /// Which machine rejected the change ("download job" or "import task")
        kind: &'static str,
        /// Current status
        from: String,
        /// Requested status
        to: String,
    },

    /// File selection or placement failed
    #[error("import error: {0}")]
    Import(String),

    /// Shutdown in progress
    #[error("shutdown in progress")]
    ShuttingDown,

    /// An error wrapped with a message describing the failed step
    #[error("{message}: {source}")]
    Context {
        /// What was being attempted
        message: String,
        /// Underlying error
        #[source]
        source: Box<Error>,
    },

    /// An error with an explicitly attached category
    #[error("{source}")]
    Categorized {
        /// Attached category
        category: ErrorCategory,
        /// Underlying error
        #[source]
        source: Box<Error>,
    },

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Mark an error as permanent: the job fails without further attempts
    pub fn permanent(err: impl Into<Error>) -> Self {
        Error::Categorized {
            category: ErrorCategory::Permanent,
            source: Box::new(err.into()),
        }
    }

    /// Mark an error as transient explicitly
    pub fn transient(err: impl Into<Error>) -> Self {
        Error::Categorized {
            category: ErrorCategory::Transient,
            source: Box::new(err.into()),
        }
    }

    /// Wrap this error with a description of the step that failed
    pub fn context(self, message: impl Into<String>) -> Self {
        Error::Context {
            message: message.into(),
            source: Box::new(self),
        }
    }

    /// Category of this error
    ///
    /// Walks context wrappers and returns the first attached category. Errors
    /// without one are transient.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Categorized { category, .. } => *category,
            Error::Context { source, .. } => source.category(),
            _ => ErrorCategory::Transient,
        }
    }

    /// Shorthand for `category() == ErrorCategory::Permanent`
    pub fn is_permanent(&self) -> bool {
        self.category() == ErrorCategory::Permanent
    }

    /// The innermost error, with context and category wrappers removed
    pub fn root(&self) -> &Error {
        match self {
            Error::Context { source, .. } | Error::Categorized { source, .. } => source.root(),
            other => other,
        }
    }

    /// True if the downloader signalled that an operation is not implemented
    pub fn is_unsupported(&self) -> bool {
        matches!(self.root(), Error::Downloader(DownloaderError::Unsupported(_)))
    }

    /// True if the downloader rejected the session credentials
    pub fn is_auth(&self) -> bool {
        matches!(self.root(), Error::Downloader(DownloaderError::Auth(_)))
    }
}

/// Attach context or a category to a fallible call
pub trait ResultExt<T> {
    /// Wrap the error with a message describing the failed step
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Mark the error permanent
    fn permanent(self) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<Error>,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().context(message))
    }

    fn permanent(self) -> Result<T> {
        self.map_err(Error::permanent)
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),

    /// Constraint violation (e.g., duplicate key)
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Downloader backend and client-management errors
#[derive(Debug, Error)]
pub enum DownloaderError {
    /// The backend does not implement this operation
    #[error("operation unsupported: {0}")]
    Unsupported(String),

    /// The backend has no item with this external id
    #[error("item not found: {0}")]
    NotFound(String),

    /// Login rejected or session expired
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Backend answered with an unexpected HTTP status
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body or description
        message: String,
    },

    /// Magnet link without a usable infohash
    #[error("invalid magnet link: {0}")]
    InvalidMagnet(String),

    /// No builder registered for this downloader type
    #[error("unknown downloader type: {0}")]
    UnknownType(String),

    /// Link protocol the backend cannot handle
    #[error("unsupported protocol for this downloader: {0}")]
    UnsupportedProtocol(String),

    /// The add call succeeded but the new item could not be located
    #[error("item was added but could not be identified: {0}")]
    NotIdentified(String),

    /// No active client for this instance
    #[error("downloader not found: {0}")]
    ClientNotFound(String),

    /// Instance id is not a valid UUID
    #[error("invalid instance id: {0}")]
    InvalidInstanceId(String),

    /// Connectivity test reported failure
    #[error("connection test failed: {0}")]
    TestFailed(String),
}
