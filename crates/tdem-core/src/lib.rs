//! Core numerical types for time-domain electromagnetic source terms.
//!
//! This crate provides:
//! - [`SparseMatrix`]: a faer compressed sparse column matrix with the operator
//!   algebra used to assemble discrete source terms and auxiliary systems
//! - [`Field`]: a tagged union of an algebraic zero, a dense vector or a
//!   sparse vector, so absent physical quantities never allocate
//! - [`Mesh`]: the interface a finite-volume mesh exposes to sources

pub mod error;
pub mod field;
pub mod mesh;
pub mod sparse;

pub use error::{Error, Result};
pub use field::{Field, SparseVector};
pub use mesh::{Axis, CoordinateSystem, Mesh, MeshId};
pub use sparse::SparseMatrix;

/// (H/m) Magnetic permeability of free space.
pub const MU_0: f64 = 4.0e-7 * std::f64::consts::PI;
