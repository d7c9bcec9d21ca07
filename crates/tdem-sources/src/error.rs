//! Error types for source evaluation.

use thiserror::Error;

/// Errors raised while building or evaluating sources.
#[derive(Debug, Error)]
pub enum Error {
    /// A construction parameter is outside its domain.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The requested quantity has no implementation for this formulation or source.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// An auxiliary system could not be factored or solved.
    #[error("auxiliary solve failed: {0}")]
    LinearSolve(#[from] tdem_solver::Error),

    #[error(transparent)]
    Waveform(#[from] tdem_waveforms::Error),

    #[error(transparent)]
    Core(#[from] tdem_core::Error),
}

/// Result type for source operations.
pub type Result<T> = std::result::Result<T, Error>;
