//! Preconditioners for iterative solvers.
//!
//! Given a linear system Ax = b, a preconditioner M approximates A^(-1). The
//! GMRES solver applies it on the right, which leaves the residual norm
//! ||b - Ax|| that it monitors unchanged.

use tdem_core::SparseMatrix;

/// A preconditioner for real-valued linear systems.
pub trait RealPreconditioner: Send + Sync {
    /// Apply the preconditioner: y = M^(-1) * x.
    fn apply(&self, x: &[f64], y: &mut [f64]);

    /// Dimension of the preconditioner.
    fn dim(&self) -> usize;
}

/// Diagonal entries below this magnitude are left unscaled.
const MIN_PIVOT: f64 = 1e-30;

/// Jacobi (diagonal) preconditioner.
///
/// Uses M = diag(A), so M^(-1) * x = x / diag(A). The auxiliary systems
/// (D MfMuiI Dᵀ, Gᵀ Me(σ) G, the stabilised curl-curl operator) are all
/// symmetric with a dominant diagonal, which is where Jacobi does well.
#[derive(Debug, Clone)]
pub struct JacobiPreconditioner {
    inv_diag: Vec<f64>,
}

impl JacobiPreconditioner {
    /// Extract and invert the diagonal of a matrix.
    pub fn from_matrix(matrix: &SparseMatrix) -> Self {
        Self::from_diagonal(matrix.diagonal().as_slice())
    }

    /// Create from a diagonal vector.
    pub fn from_diagonal(diag: &[f64]) -> Self {
        let inv_diag = diag
            .iter()
            .map(|&d| if d.abs() < MIN_PIVOT { 1.0 } else { 1.0 / d })
            .collect();

        Self { inv_diag }
    }
}

impl RealPreconditioner for JacobiPreconditioner {
    fn apply(&self, x: &[f64], y: &mut [f64]) {
        assert_eq!(x.len(), self.inv_diag.len());
        assert_eq!(y.len(), self.inv_diag.len());

        for ((yi, &xi), &inv_di) in y.iter_mut().zip(x).zip(&self.inv_diag) {
            *yi = xi * inv_di;
        }
    }

    fn dim(&self) -> usize {
        self.inv_diag.len()
    }
}

/// No preconditioning: M = I.
#[derive(Debug, Clone, Copy)]
pub struct IdentityPreconditioner {
    dim: usize,
}

impl IdentityPreconditioner {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl RealPreconditioner for IdentityPreconditioner {
    fn apply(&self, x: &[f64], y: &mut [f64]) {
        y.copy_from_slice(x);
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jacobi_from_matrix() {
        let triplets = vec![(0, 0, 2.0), (0, 1, 1.0), (1, 1, 4.0), (2, 2, 0.0)];
        let m = SparseMatrix::from_triplets(3, 3, &triplets).unwrap();
        let precond = JacobiPreconditioner::from_matrix(&m);

        let x = vec![2.0, 4.0, 7.0];
        let mut y = vec![0.0; 3];
        precond.apply(&x, &mut y);

        assert!((y[0] - 1.0).abs() < 1e-15);
        assert!((y[1] - 1.0).abs() < 1e-15);
        // Zero pivot is passed through unscaled
        assert!((y[2] - 7.0).abs() < 1e-15);
    }

    #[test]
    fn identity_copies() {
        let precond = IdentityPreconditioner::new(2);
        let mut y = vec![0.0; 2];
        precond.apply(&[3.0, -1.0], &mut y);
        assert_eq!(y, vec![3.0, -1.0]);
        assert_eq!(precond.dim(), 2);
    }
}
