//! Error types for the store adapters
//!
//! Every variant is fatal to an integration run. Text mutation is never
//! retried automatically; the recovery is to fix the file and run again.

use std::path::{Path, PathBuf};

/// Errors raised while reading, mutating or writing back a store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Required file does not exist
    #[error("file not found: {}", path.display())]
    NotFound {
        /// Missing file
        path: PathBuf,
    },

    /// Document lacks a structural anchor the integrator requires
    #[error("section '{section}' not found in {}", path.display())]
    SectionNotFound {
        /// Document path
        path: PathBuf,
        /// Section header that was looked for
        section: String,
    },

    /// Read, write or permission failure
    #[error("io error on {}: {source}", path.display())]
    Io {
        /// File being read or written
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Entry exists but its value cannot be parsed into the expected shape
    #[error("malformed entry '{key}' in {}:{line}: {message}", path.display())]
    MalformedEntry {
        /// Store path
        path: PathBuf,
        /// 1-based line number
        line: usize,
        /// Key of the entry
        key: String,
        /// What is wrong with it
        message: String,
    },

    /// Secure random source unavailable
    #[error("secure random source unavailable: {0}")]
    EntropyUnavailable(String),
}

impl StoreError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create not-found error for path
    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Create section-not-found error
    pub fn section_not_found(path: impl Into<PathBuf>, section: impl Into<String>) -> Self {
        Self::SectionNotFound {
            path: path.into(),
            section: section.into(),
        }
    }

    /// Create malformed-entry error; `line` is 1-based
    pub fn malformed(
        path: impl Into<PathBuf>,
        line: usize,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::MalformedEntry {
            path: path.into(),
            line,
            key: key.into(),
            message: message.into(),
        }
    }

    /// File the error refers to, if any
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::NotFound { path }
            | Self::SectionNotFound { path, .. }
            | Self::Io { path, .. }
            | Self::MalformedEntry { path, .. } => Some(path),
            Self::EntropyUnavailable(_) => None,
        }
    }
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;
