//! Sparse-solve service for the auxiliary systems assembled by EM sources.
//!
//! Sources ask the simulation for a factorization of a symmetric operator
//! (magnetostatic, DC or stabilised curl-curl), solve one or more right-hand
//! sides against it, and drop it when done. This crate provides:
//!
//! - [`SparseLu`]: direct sparse LU through faer
//! - [`GmresSolver`]: restarted, Jacobi-preconditioned GMRES for large systems
//! - [`SolverConfig`] and [`factor`]: strategy selection between the two
//!
//! # Module Structure
//!
//! - [`dispatch`] - Strategy configuration and the [`Factorization`] trait
//! - [`lu`] - Direct sparse LU
//! - [`gmres`] - Iterative GMRES
//! - [`operator`] - Matrix-free operator trait used by GMRES
//! - [`preconditioner`] - Preconditioners for GMRES

pub mod dispatch;
pub mod error;
pub mod gmres;
pub mod lu;
pub mod operator;
pub mod preconditioner;

pub use dispatch::{Factorization, SolverConfig, SolverStrategy, factor};
pub use error::{Error, Result};
pub use gmres::{GmresConfig, GmresResult, GmresSolver, solve_gmres};
pub use lu::SparseLu;
pub use operator::RealOperator;
pub use preconditioner::{IdentityPreconditioner, JacobiPreconditioner, RealPreconditioner};
