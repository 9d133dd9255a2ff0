//! Error taxonomy of the field engine.

use thiserror::Error;

use hybridizer_compute::ComputeError;
use hybridizer_geometry::GridError;
use hybridizer_patterns::PatternError;

/// Errors raised by simulations, the batch pipeline and their file formats.
#[derive(Debug, Error)]
pub enum HybridError {
    /// A required input is missing or a step ran out of order
    /// (e.g. an empty collection before channel computation).
    #[error("Prerequisite not met: {0}")]
    Prerequisite(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Singular matrix: {0}")]
    SingularMatrix(String),

    #[error("Unsupported mode: {0}")]
    UnsupportedMode(String),

    #[error("Dimension mismatch: {0}")]
    Dimension(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Format error in {context}: {message}")]
    Format { context: String, message: String },

    #[error("External solver failed: {0}")]
    Solver(String),

    #[error(transparent)]
    Grid(#[from] GridError),

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error(transparent)]
    Compute(#[from] ComputeError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HybridError {
    pub(crate) fn format(context: impl Into<String>, message: impl Into<String>) -> Self {
        HybridError::Format {
            context: context.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, HybridError>;
