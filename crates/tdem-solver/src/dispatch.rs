//! Solver selection for auxiliary systems.
//!
//! Provides a unified configuration for choosing between the direct sparse LU
//! and iterative GMRES, and the [`Factorization`] handle both produce.

use nalgebra::DVector;
use tdem_core::SparseMatrix;

use crate::error::Result;
use crate::gmres::{GmresConfig, GmresSolver};
use crate::lu::SparseLu;

/// A prepared solver for one square system, reusable across right-hand sides.
///
/// Dropping the handle releases the factorization.
pub trait Factorization: Send + Sync {
    /// Number of unknowns.
    fn dim(&self) -> usize;

    /// Solve A x = rhs.
    fn solve(&self, rhs: &DVector<f64>) -> Result<DVector<f64>>;
}

/// Strategy for factoring an auxiliary system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SolverStrategy {
    /// Direct LU below `gmres_threshold` unknowns, GMRES at or above it.
    #[default]
    Auto,
    /// Always use direct LU factorization.
    DirectLu,
    /// Always use iterative GMRES.
    Gmres,
}

/// Solver configuration.
#[derive(Debug, Clone)]
pub struct SolverConfig {
    /// Solver strategy selection.
    pub strategy: SolverStrategy,
    /// Size threshold at or above which GMRES is preferred over direct LU.
    pub gmres_threshold: usize,
    /// GMRES configuration for iterative solving.
    pub gmres: GmresConfig,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            strategy: SolverStrategy::Auto,
            gmres_threshold: 200_000,
            gmres: GmresConfig::default(),
        }
    }
}

impl SolverConfig {
    /// Set the solver strategy.
    pub fn with_strategy(mut self, strategy: SolverStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the GMRES threshold.
    pub fn with_gmres_threshold(mut self, threshold: usize) -> Self {
        self.gmres_threshold = threshold;
        self
    }

    /// Set the GMRES configuration.
    pub fn with_gmres_config(mut self, config: GmresConfig) -> Self {
        self.gmres = config;
        self
    }

    /// Decide whether to use GMRES for a given system size.
    pub fn use_gmres(&self, size: usize) -> bool {
        match self.strategy {
            SolverStrategy::DirectLu => false,
            SolverStrategy::Gmres => true,
            SolverStrategy::Auto => size >= self.gmres_threshold,
        }
    }

    /// Human-readable name of the solver chosen for a size.
    pub fn describe(&self, size: usize) -> &'static str {
        if self.use_gmres(size) {
            "GMRES"
        } else {
            "Direct LU"
        }
    }
}

/// Prepare a solver for `matrix` according to `config`.
pub fn factor(matrix: &SparseMatrix, config: &SolverConfig) -> Result<Box<dyn Factorization>> {
    let n = matrix.nrows();
    log::debug!("factoring {n}x{n} auxiliary system with {}", config.describe(n));
    if config.use_gmres(n) {
        Ok(Box::new(GmresSolver::new(matrix, config.gmres.clone())?))
    } else {
        Ok(Box::new(SparseLu::factor(matrix)?))
    }
}
