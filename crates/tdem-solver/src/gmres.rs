//! Restarted GMRES for real-valued systems.
//!
//! Used in place of the direct LU when the auxiliary system is too large to
//! factor. The solver is right-preconditioned: it solves A M^(-1) y = b and
//! recovers x = M^(-1) y, so the convergence test is on the true residual.

use nalgebra::DVector;
use tdem_core::SparseMatrix;

use crate::dispatch::Factorization;
use crate::error::{Error, Result};
use crate::operator::RealOperator;
use crate::preconditioner::{JacobiPreconditioner, RealPreconditioner};

/// Configuration for GMRES solver.
#[derive(Debug, Clone)]
pub struct GmresConfig {
    /// Maximum number of iterations.
    pub max_iter: usize,
    /// Convergence tolerance (relative residual).
    pub tol: f64,
    /// Restart parameter (Krylov subspace dimension before restart).
    pub restart: usize,
}

impl Default for GmresConfig {
    fn default() -> Self {
        Self {
            max_iter: 500,
            tol: 1e-8,
            restart: 30,
        }
    }
}

/// Result of a GMRES solve.
#[derive(Debug, Clone)]
pub struct GmresResult {
    /// Solution vector.
    pub x: Vec<f64>,
    /// Number of iterations performed.
    pub iterations: usize,
    /// Final relative residual.
    pub residual: f64,
    /// Whether the solver converged.
    pub converged: bool,
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(v: &[f64]) -> f64 {
    dot(v, v).sqrt()
}

/// Givens rotation (c, s) such that [c s; -s c] [a; b] = [r; 0].
fn givens_rotation(a: f64, b: f64) -> (f64, f64) {
    if b.abs() < 1e-30 {
        return (1.0, 0.0);
    }
    let r = (a * a + b * b).sqrt();
    (a / r, b / r)
}

fn residual_norm(op: &dyn RealOperator, x: &[f64], b: &[f64]) -> f64 {
    let mut ax = vec![0.0; b.len()];
    op.apply(x, &mut ax);
    b.iter()
        .zip(&ax)
        .map(|(&bi, &axi)| (bi - axi).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Solve A*x = b using right-preconditioned restarted GMRES.
///
/// # Arguments
/// * `op` - The matrix operator A
/// * `precond` - The preconditioner M (approximates A)
/// * `b` - Right-hand side vector
/// * `config` - GMRES configuration
pub fn solve_gmres(
    op: &dyn RealOperator,
    precond: &dyn RealPreconditioner,
    b: &[f64],
    config: &GmresConfig,
) -> GmresResult {
    let n = op.dim();
    assert_eq!(b.len(), n, "RHS dimension mismatch");
    assert_eq!(precond.dim(), n, "preconditioner dimension mismatch");

    let b_norm = norm(b);
    if b_norm < 1e-30 {
        return GmresResult {
            x: vec![0.0; n],
            iterations: 0,
            residual: 0.0,
            converged: true,
        };
    }

    let mut x = vec![0.0; n];
    let mut total_iter = 0;
    let mut z = vec![0.0; n];

    loop {
        // r = b - A*x
        let mut ax = vec![0.0; n];
        op.apply(&x, &mut ax);
        let mut r: Vec<f64> = b.iter().zip(&ax).map(|(&bi, &axi)| bi - axi).collect();
        let r_norm = norm(&r);

        if r_norm / b_norm < config.tol {
            return GmresResult {
                x,
                iterations: total_iter,
                residual: r_norm / b_norm,
                converged: true,
            };
        }
        if total_iter >= config.max_iter {
            return GmresResult {
                x,
                iterations: total_iter,
                residual: r_norm / b_norm,
                converged: false,
            };
        }

        // Arnoldi process with modified Gram-Schmidt on A M^(-1)
        let m = config.restart.min(n).max(1);
        let mut v: Vec<Vec<f64>> = Vec::with_capacity(m + 1);
        let mut h = vec![vec![0.0; m + 1]; m];

        let inv_r_norm = 1.0 / r_norm;
        r.iter_mut().for_each(|ri| *ri *= inv_r_norm);
        v.push(r);

        let mut g = vec![0.0; m + 1];
        g[0] = r_norm;
        let mut cs = vec![0.0; m];
        let mut sn = vec![0.0; m];

        let mut k = 0;
        while k < m && total_iter < config.max_iter {
            total_iter += 1;

            // w = A * M^(-1) * v[k]
            precond.apply(&v[k], &mut z);
            let mut w = vec![0.0; n];
            op.apply(&z, &mut w);

            for j in 0..=k {
                let hij = dot(&v[j], &w);
                h[k][j] = hij;
                for (wi, &vji) in w.iter_mut().zip(&v[j]) {
                    *wi -= hij * vji;
                }
            }

            let w_norm = norm(&w);
            h[k][k + 1] = w_norm;

            // Apply previous rotations to the new column
            for j in 0..k {
                let temp = cs[j] * h[k][j] + sn[j] * h[k][j + 1];
                h[k][j + 1] = -sn[j] * h[k][j] + cs[j] * h[k][j + 1];
                h[k][j] = temp;
            }

            let (c, s) = givens_rotation(h[k][k], h[k][k + 1]);
            cs[k] = c;
            sn[k] = s;
            h[k][k] = c * h[k][k] + s * h[k][k + 1];
            h[k][k + 1] = 0.0;

            let temp_g = c * g[k] + s * g[k + 1];
            g[k + 1] = -s * g[k] + c * g[k + 1];
            g[k] = temp_g;

            k += 1;

            // Lucky breakdown: the Krylov space is invariant
            if w_norm < 1e-30 || g[k].abs() / b_norm < config.tol {
                break;
            }

            let inv_w = 1.0 / w_norm;
            v.push(w.iter().map(|&wi| wi * inv_w).collect());
        }

        // Back-substitution for H*y = g
        let mut y = vec![0.0; k];
        for i in (0..k).rev() {
            let mut sum = g[i];
            for j in (i + 1)..k {
                sum -= h[j][i] * y[j];
            }
            if h[i][i].abs() > 1e-30 {
                y[i] = sum / h[i][i];
            }
        }

        // x += M^(-1) * V * y
        let mut vy = vec![0.0; n];
        for (vi, &yi) in v.iter().zip(&y) {
            for (acc, &vij) in vy.iter_mut().zip(vi) {
                *acc += vij * yi;
            }
        }
        precond.apply(&vy, &mut z);
        for (xi, &zi) in x.iter_mut().zip(&z) {
            *xi += zi;
        }

        let final_res = residual_norm(op, &x, b) / b_norm;
        if final_res < config.tol {
            return GmresResult {
                x,
                iterations: total_iter,
                residual: final_res,
                converged: true,
            };
        }
    }
}

/// A "factorization" that solves each right-hand side with Jacobi-preconditioned GMRES.
#[derive(Debug, Clone)]
pub struct GmresSolver {
    matrix: SparseMatrix,
    precond: JacobiPreconditioner,
    config: GmresConfig,
}

impl GmresSolver {
    pub fn new(matrix: &SparseMatrix, config: GmresConfig) -> Result<Self> {
        if matrix.nrows() != matrix.ncols() {
            return Err(Error::DimensionMismatch {
                expected: matrix.nrows(),
                actual: matrix.ncols(),
            });
        }
        Ok(Self {
            matrix: matrix.clone(),
            precond: JacobiPreconditioner::from_matrix(matrix),
            config,
        })
    }
}

impl Factorization for GmresSolver {
    fn dim(&self) -> usize {
        self.matrix.nrows()
    }

    fn solve(&self, rhs: &DVector<f64>) -> Result<DVector<f64>> {
        if rhs.len() != self.dim() {
            return Err(Error::DimensionMismatch {
                expected: self.dim(),
                actual: rhs.len(),
            });
        }
        let result = solve_gmres(&self.matrix, &self.precond, rhs.as_slice(), &self.config);
        if !result.converged {
            log::warn!(
                "GMRES stopped after {} iterations at relative residual {:.3e}",
                result.iterations,
                result.residual
            );
            return Err(Error::NotConverged {
                iterations: result.iterations,
                residual: result.residual,
            });
        }
        log::trace!(
            "GMRES converged in {} iterations (residual {:.3e})",
            result.iterations,
            result.residual
        );
        Ok(DVector::from_vec(result.x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preconditioner::IdentityPreconditioner;

    fn laplacian_1d(n: usize) -> SparseMatrix {
        let mut triplets = Vec::new();
        for i in 0..n {
            triplets.push((i, i, 2.0));
            if i > 0 {
                triplets.push((i, i - 1, -1.0));
            }
            if i + 1 < n {
                triplets.push((i, i + 1, -1.0));
            }
        }
        SparseMatrix::from_triplets(n, n, &triplets).unwrap()
    }

    #[test]
    fn gmres_config_default() {
        let config = GmresConfig::default();
        assert_eq!(config.max_iter, 500);
        assert!((config.tol - 1e-8).abs() < 1e-15);
        assert_eq!(config.restart, 30);
    }

    #[test]
    fn givens_zeroes_second_component() {
        let (c, s) = givens_rotation(3.0, 4.0);
        assert!((-s * 3.0 + c * 4.0).abs() < 1e-12);
    }

    #[test]
    fn gmres_diagonal() {
        let d = SparseMatrix::from_triplets(3, 3, &[(0, 0, 2.0), (1, 1, 3.0), (2, 2, 4.0)])
            .unwrap();
        let b = vec![2.0, 6.0, 12.0];
        let result = solve_gmres(&d, &IdentityPreconditioner::new(3), &b, &GmresConfig::default());

        assert!(result.converged);
        assert!((result.x[0] - 1.0).abs() < 1e-8);
        assert!((result.x[1] - 2.0).abs() < 1e-8);
        assert!((result.x[2] - 3.0).abs() < 1e-8);
    }

    #[test]
    fn gmres_zero_rhs() {
        let a = laplacian_1d(4);
        let result = solve_gmres(&a, &IdentityPreconditioner::new(4), &[0.0; 4], &GmresConfig::default());
        assert!(result.converged);
        assert_eq!(result.iterations, 0);
        assert!(result.x.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn gmres_restarted_laplacian() {
        let n = 40;
        let a = laplacian_1d(n);
        let b: Vec<f64> = (0..n).map(|i| (i as f64 * 0.3).sin()).collect();
        let config = GmresConfig {
            max_iter: 2000,
            tol: 1e-10,
            restart: 10,
        };
        let precond = JacobiPreconditioner::from_matrix(&a);
        let result = solve_gmres(&a, &precond, &b, &config);

        assert!(result.converged, "residual {}", result.residual);
        assert!(residual_norm(&a, &result.x, &b) < 1e-8);
    }

    #[test]
    fn gmres_reports_non_convergence() {
        let a = laplacian_1d(50);
        let b = vec![1.0; 50];
        let config = GmresConfig {
            max_iter: 3,
            tol: 1e-12,
            restart: 3,
        };
        let solver = GmresSolver::new(&a, config).unwrap();
        let err = solver.solve(&DVector::from_vec(b)).unwrap_err();
        assert!(matches!(err, Error::NotConverged { iterations: 3, .. }));
    }

    #[test]
    fn gmres_solver_matches_matrix() {
        let a = laplacian_1d(12);
        let solver = GmresSolver::new(&a, GmresConfig::default()).unwrap();
        let x_true = DVector::from_fn(12, |i, _| 1.0 + i as f64);
        let b = a.mul_vec(&x_true).unwrap();
        let x = solver.solve(&b).unwrap();
        assert!((x - x_true).norm() < 1e-6);
    }
}
