//! Unified error types for the GRAIN ecosystem
//!
//! This module provides a common error type [`GrainError`] that can represent
//! errors from any part of the system. Domain-specific error types can be
//! converted to `GrainError` for uniform error handling at API boundaries.
//!
//! # Example
//!
//! ```ignore
//! use grain_core::{GrainError, GrainResult};
//!
//! fn run_coclustering(path: &str) -> GrainResult<()> {
//!     let table = load_tuples(path)?;
//!     optimize(&table)?;
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// Unified error type for all GRAIN operations.
///
/// The variants follow the engine's error taxonomy: specification problems
/// abort before any computation, I/O problems abort without partial output,
/// resource problems stop the engine cleanly with the best result so far,
/// and internal invariant violations are fatal only in debug builds.
#[derive(Error, Debug)]
pub enum GrainError {
    /// I/O errors (file access, report writing, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing/deserialization errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// Coclustering specification errors (schema invalid, unknown attribute,
    /// non-numeric frequency variable, fewer than two variables)
    #[error("Specification error: {0}")]
    Spec(String),

    /// Resource errors (memory estimate exceeds the budget)
    #[error("Resource error: {0}")]
    Resource(String),

    /// The caller requested interruption; the best result so far is kept
    #[error("Interrupted: {0}")]
    Interrupted(String),

    /// Internal invariant violation (cost-model assertion failure)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Generic errors (for wrapping external errors)
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results using GrainError.
pub type GrainResult<T> = Result<T, GrainError>;

// Conversion from anyhow::Error
impl From<anyhow::Error> for GrainError {
    fn from(err: anyhow::Error) -> Self {
        GrainError::Other(err.to_string())
    }
}

// Conversion from string-like types for convenience
impl From<String> for GrainError {
    fn from(s: String) -> Self {
        GrainError::Other(s)
    }
}

impl From<&str> for GrainError {
    fn from(s: &str) -> Self {
        GrainError::Other(s.to_string())
    }
}

impl GrainError {
    /// Whether the error ends the run without any output (specification and
    /// I/O failures), as opposed to resource errors that keep the best
    /// solution found so far.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GrainError::Io(_) | GrainError::Parse(_) | GrainError::Spec(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_includes_kind() {
        let err = GrainError::Spec("fewer than 2 coclustering variables".into());
        assert!(err.to_string().starts_with("Specification error"));
        assert!(err.is_fatal());
    }

    #[test]
    fn resource_errors_are_not_fatal() {
        let err = GrainError::Resource("grid estimate exceeds 100 MiB".into());
        assert!(!err.is_fatal());
    }
}
