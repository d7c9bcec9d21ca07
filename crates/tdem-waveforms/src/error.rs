//! Error types for waveform construction and evaluation.

use thiserror::Error;

/// Errors raised by waveforms.
#[derive(Debug, Error)]
pub enum Error {
    /// A construction parameter is outside its domain.
    #[error("invalid waveform configuration: {0}")]
    InvalidConfiguration(String),

    /// The waveform cannot provide the requested quantity.
    #[error("not supported: {0}")]
    NotSupported(String),
}

/// Result type for waveform operations.
pub type Result<T> = std::result::Result<T, Error>;
