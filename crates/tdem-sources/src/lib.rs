//! Source terms for time-domain electromagnetic simulations.
//!
//! This crate provides:
//! - [`Source`]: the contract every transmitter satisfies, with zero-valued
//!   defaults for initial fields, source terms and their derivatives
//! - [`InductiveSource`]: magnetic dipoles and circular loops
//! - [`GalvanicSource`]: grounded wires and raw current injections, with
//!   initial fields from a DC solve
//! - [`Formulation`]: the EB and HJ discretization families
//! - [`Simulation`]: what a source reads from the simulation it is evaluated
//!   against, and [`TensorSimulation`], a reference implementation
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use nalgebra::Point3;
//! use tdem_mesh::TensorMesh;
//! use tdem_sources::{InductiveSource, MagDipoleParams, Source, TensorSimulation};
//!
//! let mesh = TensorMesh::uniform([6, 6, 6], [1.0; 3], Point3::new(-3.0, -3.0, -3.0))?;
//! let sim = TensorSimulation::builder(Arc::new(mesh))
//!     .with_time_steps(vec![1e-5; 10])
//!     .build()?;
//!
//! let params = MagDipoleParams::default().with_location(Point3::new(0.1, 0.2, 0.3));
//! let mut dipole = InductiveSource::mag_dipole(params)?;
//! let b0 = dipole.b_initial(&sim)?;
//! assert!(!b0.is_zero());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod analytic;
pub mod batch;
pub mod error;
pub mod formulation;
pub mod galvanic;
pub mod inductive;
pub mod simulation;
pub mod source;

pub use analytic::InductiveGeometry;
pub use batch::{eval_all, eval_total};
pub use error::{Error, Result};
pub use formulation::{
    EbFormulation, FieldType, Formulation, FormulationKind, HjFormulation, InitialQuantity,
};
pub use galvanic::{GalvanicSource, LineCurrentParams};
pub use inductive::{CircularLoopParams, InductiveSource, MagDipoleParams};
pub use simulation::{Simulation, TensorSimulation, TensorSimulationBuilder};
pub use source::{CacheKey, Source, SourceDerivative, SourceType};
