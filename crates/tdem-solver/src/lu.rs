//! Direct sparse LU factorization via faer.

use faer::prelude::*;
use faer::sparse::linalg::solvers::Lu;
use nalgebra::DVector;
use tdem_core::SparseMatrix;

use crate::dispatch::Factorization;
use crate::error::{Error, Result};

/// A sparse LU factorization, computed once and reused for every right-hand side.
pub struct SparseLu {
    lu: Lu<usize, f64>,
    dim: usize,
}

impl std::fmt::Debug for SparseLu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SparseLu").field("dim", &self.dim).finish()
    }
}

impl SparseLu {
    /// Factor a square sparse matrix.
    ///
    /// # Errors
    /// * `DimensionMismatch` if the matrix is not square
    /// * `SingularMatrix` if the factorization fails
    pub fn factor(matrix: &SparseMatrix) -> Result<Self> {
        let n = matrix.nrows();
        if matrix.ncols() != n {
            return Err(Error::DimensionMismatch {
                expected: n,
                actual: matrix.ncols(),
            });
        }
        if n == 0 {
            return Err(Error::SingularMatrix);
        }

        let lu = matrix.as_faer().sp_lu().map_err(|_| Error::SingularMatrix)?;

        log::debug!("sparse LU: factored {n}x{n} system with {} nonzeros", matrix.nnz());
        Ok(Self { lu, dim: n })
    }
}

impl Factorization for SparseLu {
    fn dim(&self) -> usize {
        self.dim
    }

    fn solve(&self, rhs: &DVector<f64>) -> Result<DVector<f64>> {
        if rhs.len() != self.dim {
            return Err(Error::DimensionMismatch {
                expected: self.dim,
                actual: rhs.len(),
            });
        }

        let faer_rhs = Col::<f64>::from_fn(self.dim, |i| rhs[i]);
        let faer_x = self.lu.solve(&faer_rhs);
        let x = DVector::from_fn(self.dim, |i, _| faer_x[i]);

        // A numerically singular pivot surfaces as Inf/NaN rather than an error
        if x.iter().any(|v| !v.is_finite()) {
            return Err(Error::SingularMatrix);
        }
        Ok(x)
    }
}
