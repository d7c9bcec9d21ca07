//! Error types for the sparse-solve service.

use thiserror::Error;

/// Errors that can occur while factoring or solving a linear system.
#[derive(Debug, Error)]
pub enum Error {
    /// The system matrix is singular (or produced non-finite values).
    #[error("singular matrix")]
    SingularMatrix,

    /// Matrix or right-hand side dimensions do not agree.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The iterative solver stopped before reaching the tolerance.
    #[error("GMRES did not converge after {iterations} iterations (relative residual {residual:e})")]
    NotConverged { iterations: usize, residual: f64 },

    /// Error from operator assembly.
    #[error(transparent)]
    Core(#[from] tdem_core::Error),
}

/// Result type for solver operations.
pub type Result<T> = std::result::Result<T, Error>;
