//! Error types for graft core
//!
//! Store failures are wrapped with the phase that was being worked towards
//! when they happened. All errors are fatal to the run; none are retried.

use std::path::PathBuf;

use graft_store::{StoreError, TemplateError};

use crate::phase::Phase;

/// Integration run error
#[derive(Debug, thiserror::Error)]
pub enum IntegrationError {
    /// A store adapter failed
    #[error("{phase} phase failed: {source}")]
    Store {
        /// Phase being entered when the failure happened
        phase: Phase,
        /// Underlying store error
        #[source]
        source: StoreError,
    },

    /// Service spec failed validation
    #[error("invalid service spec: {0}")]
    InvalidSpec(String),

    /// Service spec file could not be read or parsed
    #[error("cannot load service spec {}: {message}", path.display())]
    SpecFile {
        /// Spec file path
        path: PathBuf,
        /// Reader or TOML error
        message: String,
    },

    /// Block template could not be rendered
    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    /// Internal phase ordering violated
    #[error("illegal phase transition {from} -> {to}")]
    IllegalTransition {
        /// Current phase
        from: Phase,
        /// Requested phase
        to: Phase,
    },
}

impl IntegrationError {
    /// Wrap a store error with its phase
    #[inline]
    pub fn store(phase: Phase, source: StoreError) -> Self {
        Self::Store { phase, source }
    }

    /// Underlying store error, if any
    #[must_use]
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            Self::Store { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Stable tag for machine-readable output
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Store { source, .. } => match source {
                StoreError::NotFound { .. } => "not_found",
                StoreError::SectionNotFound { .. } => "section_not_found",
                StoreError::Io { .. } => "io_error",
                StoreError::MalformedEntry { .. } => "malformed_entry",
                StoreError::EntropyUnavailable(_) => "entropy_unavailable",
            },
            Self::InvalidSpec(_) | Self::SpecFile { .. } => "invalid_spec",
            Self::Template(_) => "template_error",
            Self::IllegalTransition { .. } => "internal_error",
        }
    }
}

/// Extension for tagging store results with a phase
pub trait PhaseContext<T> {
    /// Wrap the error side with `phase`
    fn in_phase(self, phase: Phase) -> Result<T, IntegrationError>;
}

impl<T> PhaseContext<T> for Result<T, StoreError> {
    fn in_phase(self, phase: Phase) -> Result<T, IntegrationError> {
        self.map_err(|e| IntegrationError::store(phase, e))
    }
}

/// Result type alias for integration operations
pub type IntegrationResult<T> = Result<T, IntegrationError>;
