//! Matrix-free operators for iterative solvers.

use tdem_core::SparseMatrix;

/// A real-valued square linear operator: y = A * x.
pub trait RealOperator: Send + Sync {
    /// Dimension of the (square) operator.
    fn dim(&self) -> usize;

    /// Apply the operator, overwriting `y`.
    fn apply(&self, x: &[f64], y: &mut [f64]);
}

impl RealOperator for SparseMatrix {
    fn dim(&self) -> usize {
        self.nrows()
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) {
        assert_eq!(x.len(), self.ncols());
        assert_eq!(y.len(), self.nrows());

        for yi in y.iter_mut() {
            *yi = 0.0;
        }

        // CSC matrix-vector multiplication
        // For each column j, add A[:, j] * x[j] to y
        for (j, &xj) in x.iter().enumerate() {
            let (rows, vals) = self.column(j);
            for (&i, &v) in rows.iter().zip(vals) {
                y[i] += v * xj;
            }
        }
    }
}
