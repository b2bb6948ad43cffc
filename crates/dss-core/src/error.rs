//! Unified error types for the dynamic-stability suite.
//!
//! [`DssError`] is the single error currency at API boundaries. Solver
//! constructors raise [`DssError::InitialData`] when the input bundle is
//! incomplete; everything downstream of a constructed solver degrades to
//! sentinel values instead of erroring (see the per-solver failure
//! semantics), so the remaining variants mostly surface from ingestion and
//! run-directory management.

use thiserror::Error;

/// Unified error type for all suite operations.
#[derive(Error, Debug)]
pub enum DssError {
    /// I/O errors (file access, run directories, snapshots)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Incomplete input bundle, detected at solver construction.
    ///
    /// The payload is the full user-readable check list; the UI surfaces it
    /// verbatim.
    #[error("{0}")]
    InitialData(String),

    /// Parsing/deserialization errors (task CSV, results manifest)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Simulator operation failed
    #[error("Simulator error: {0}")]
    Simulator(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic errors (for wrapping external errors)
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results using DssError.
pub type DssResult<T> = Result<T, DssError>;

// Conversion from anyhow::Error
impl From<anyhow::Error> for DssError {
    fn from(err: anyhow::Error) -> Self {
        DssError::Other(err.to_string())
    }
}

impl From<String> for DssError {
    fn from(s: String) -> Self {
        DssError::Other(s)
    }
}

impl From<&str> for DssError {
    fn from(s: &str) -> Self {
        DssError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for DssError {
    fn from(err: serde_json::Error) -> Self {
        DssError::Parse(err.to_string())
    }
}
