//! Error types for SiteSift
//!
//! This module provides the error hierarchy for the crawler using `thiserror`.
//! Fetch, pagination, and extraction failures are recoverable at their own
//! scope (page, pagination chain, field); only [`JobError`] ends a job.

use thiserror::Error;

/// The main error type for SiteSift operations
#[derive(Error, Debug)]
pub enum Error {
    /// Browser-related errors
    #[error("Browser error: {0}")]
    Browser(#[from] BrowserError),

    /// Page fetch errors (after retries)
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Pagination errors
    #[error("Pagination error: {0}")]
    Pagination(#[from] PaginationError),

    /// Field extraction errors
    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    /// Driving-loop errors
    #[error("Job error: {0}")]
    Job(#[from] JobError),

    /// Invalid job or browser configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// ChromiumOxide errors
    #[error("CDP error: {0}")]
    Cdp(String),

    /// Text-model HTTP errors
    #[error("HTTP error: {0}")]
    Http(String),

    /// Generic error with message
    #[error("{0}")]
    Generic(String),
}

/// Browser lifecycle and control errors
#[derive(Error, Debug)]
pub enum BrowserError {
    /// Failed to launch browser
    #[error("Failed to launch browser: {0}")]
    LaunchFailed(String),

    /// Browser configuration error
    #[error("Invalid browser configuration: {0}")]
    ConfigError(String),

    /// Failed to create an isolated context or page
    #[error("Failed to create session: {0}")]
    SessionFailed(String),

    /// Script evaluation failed
    #[error("Script evaluation failed: {0}")]
    ScriptFailed(String),

    /// Browser already closed
    #[error("Browser already closed")]
    AlreadyClosed,
}

/// Failure of a single page fetch
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Navigation did not complete within its budget
    #[error("Navigation timed out after {0}ms")]
    Timeout(u64),

    /// Navigation completed with a non-success response or was refused
    #[error("Navigation rejected: {0}")]
    NavigationRejected(String),

    /// Page content was below the size floor
    #[error("Content too small: {size} bytes (floor {floor})")]
    EmptyContent {
        /// Bytes received
        size: usize,
        /// Minimum accepted size
        floor: usize,
    },

    /// A browser session could not be opened
    #[error("Session unavailable: {0}")]
    Session(String),

    /// The job was cancelled while the fetch was in flight
    #[error("Fetch cancelled")]
    Cancelled,
}

impl FetchError {
    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FetchError::Cancelled)
    }
}

/// Pagination errors, scoped to the current page
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaginationError {
    /// No next-page element could be resolved
    #[error("Pagination element not found: {0}")]
    ElementNotFound(String),

    /// The element was found but clicking it failed
    #[error("Click on {locator} failed after {attempts} attempts")]
    ClickFailed {
        /// Locator description
        locator: String,
        /// Attempts made
        attempts: u32,
    },
}

/// Field-scoped extraction errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    /// A pattern or selector could not be applied to a field
    #[error("Pattern failure for field '{field}': {reason}")]
    PatternFailure {
        /// Field name
        field: String,
        /// What went wrong
        reason: String,
    },

    /// A structured response could not be parsed
    #[error("Parse failure: {0}")]
    ParseFailure(String),
}

/// Errors at the driving-loop boundary
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// The worker panicked
    #[error("Job worker panicked: {0}")]
    Panicked(String),

    /// Unexpected failure in the driving loop
    #[error("Unexpected job failure: {0}")]
    Unexpected(String),

    /// Unknown job handle
    #[error("Job not found: {0}")]
    NotFound(String),
}

/// Configuration validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required value is missing
    #[error("Missing value: {0}")]
    Missing(String),

    /// A value is present but invalid
    #[error("Invalid value for {field}: {reason}")]
    Invalid {
        /// Offending field
        field: String,
        /// Why it was rejected
        reason: String,
    },
}

/// Result type alias for SiteSift operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a generic error from a string
    pub fn generic<S: Into<String>>(msg: S) -> Self {
        Error::Generic(msg.into())
    }

    /// Create a CDP error from a string
    pub fn cdp<S: Into<String>>(msg: S) -> Self {
        Error::Cdp(msg.into())
    }
}

/// Convert chromiumoxide errors
impl From<chromiumoxide::error::CdpError> for Error {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        Error::Cdp(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Http(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Browser(BrowserError::LaunchFailed("no chrome".to_string()));
        assert!(err.to_string().contains("Failed to launch browser"));
        assert!(err.to_string().contains("no chrome"));
    }

    #[test]
    fn test_fetch_error_display() {
        let err = FetchError::EmptyContent {
            size: 120,
            floor: 500,
        };
        assert_eq!(err.to_string(), "Content too small: 120 bytes (floor 500)");
        assert!(FetchError::Timeout(30000).to_string().contains("30000ms"));
    }

    #[test]
    fn test_fetch_error_retryable() {
        assert!(FetchError::Timeout(10).is_retryable());
        assert!(FetchError::NavigationRejected("404".into()).is_retryable());
        assert!(!FetchError::Cancelled.is_retryable());
    }

    #[test]
    fn test_pagination_error() {
        let err = PaginationError::ClickFailed {
            locator: "text=Next".to_string(),
            attempts: 3,
        };
        assert!(err.to_string().contains("3 attempts"));
    }

    #[test]
    fn test_extraction_error() {
        let err = ExtractionError::PatternFailure {
            field: "price".to_string(),
            reason: "bad selector".to_string(),
        };
        assert!(err.to_string().contains("price"));
    }

    #[test]
    fn test_error_from_subtypes() {
        let err: Error = FetchError::Cancelled.into();
        assert!(matches!(err, Error::Fetch(FetchError::Cancelled)));
        let err: Error = JobError::NotFound("abc".into()).into();
        assert!(err.to_string().contains("abc"));
    }

    #[test]
    fn test_generic_error() {
        let err = Error::generic("something went wrong");
        assert_eq!(err.to_string(), "something went wrong");
    }
}
