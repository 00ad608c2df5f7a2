//! Unified error type for the archiver

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Unified error type for all scraping operations
#[derive(Error, Debug)]
pub enum ScrapeError {
    // Remote browser errors
    #[error("Browser error: {0}")]
    Browser(String),

    /// Network activity did not settle before the tracker's deadline
    #[error("{tracker}: timeout waiting for {}", .pending.join(", "))]
    Timeout { tracker: String, pending: Vec<String> },

    #[error("Timed out after {timeout:?} waiting for selector {selector}")]
    SelectorTimeout { selector: String, timeout: Duration },

    /// Internal contract violation; never retried
    #[error("Usage error: {0}")]
    Usage(String),

    // Manifest errors
    #[error("Could not read {}: {source}", .path.display())]
    ManifestRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not parse {}: {source}", .path.display())]
    ManifestParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid manifest {}:\n{}", .path.display(), .violations.join("\n"))]
    Validation {
        path: PathBuf,
        violations: Vec<String>,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    // Download errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ScrapeError {
    /// Whether this error came from a deadline expiring rather than a failure
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ScrapeError::Timeout { .. } | ScrapeError::SelectorTimeout { .. }
        )
    }
}

/// Result type alias using ScrapeError
pub type Result<T> = std::result::Result<T, ScrapeError>;
