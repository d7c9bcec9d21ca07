//! Error types for operator algebra and mesh queries.

use thiserror::Error;

/// Errors raised by core operators and mesh collaborators.
#[derive(Debug, Error)]
pub enum Error {
    /// Operand dimensions do not agree.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A triplet addresses an entry outside the matrix.
    #[error("entry ({row}, {col}) is outside a {nrows}x{ncols} matrix")]
    IndexOutOfBounds {
        row: usize,
        col: usize,
        nrows: usize,
        ncols: usize,
    },

    /// The sparse backend rejected an assembled matrix.
    #[error("sparse assembly failed: {0}")]
    Assembly(String),

    /// A point does not lie inside the mesh.
    #[error("point ({x}, {y}, {z}) lies outside the mesh")]
    OutsideMesh { x: f64, y: f64, z: f64 },

    /// A physical property is not strictly positive and finite.
    #[error("invalid physical property at cell {index}: {value}")]
    InvalidProperty { index: usize, value: f64 },

    /// The mesh does not implement the requested query.
    #[error("not supported: {0}")]
    NotSupported(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;
