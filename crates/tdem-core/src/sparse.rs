//! Sparse matrices for discrete differential operators.
//!
//! Mesh operators (gradient, divergence, curl), inner-product mass matrices
//! and the auxiliary systems assembled from them are all stored as
//! [`SparseMatrix`], a thin wrapper over faer's compressed sparse column
//! matrix. Products and sums are assembled through faer's triplet
//! constructor, which sums duplicate entries; factorization lives in the
//! solver crate.

use faer::sparse::{SparseColMat, SymbolicSparseColMat, Triplet};
use nalgebra::{DMatrix, DVector};

use crate::error::{Error, Result};
use crate::field::Field;

/// Real sparse matrix in compressed sparse column form.
#[derive(Debug, Clone)]
pub struct SparseMatrix {
    matrix: SparseColMat<usize, f64>,
}

impl SparseMatrix {
    /// Wrap an existing faer matrix.
    pub fn from_faer(matrix: SparseColMat<usize, f64>) -> Self {
        Self { matrix }
    }

    /// Create from triplets (row, col, value).
    ///
    /// Duplicate entries at the same position are summed.
    pub fn from_triplets(
        nrows: usize,
        ncols: usize,
        triplets: &[(usize, usize, f64)],
    ) -> Result<Self> {
        if let Some(&(row, col, _)) = triplets
            .iter()
            .find(|&&(row, col, _)| row >= nrows || col >= ncols)
        {
            return Err(Error::IndexOutOfBounds {
                row,
                col,
                nrows,
                ncols,
            });
        }
        let faer_triplets: Vec<_> = triplets
            .iter()
            .map(|&(r, c, v)| Triplet::new(r, c, v))
            .collect();
        SparseColMat::<usize, f64>::try_new_from_triplets(nrows, ncols, &faer_triplets)
            .map(Self::from_faer)
            .map_err(|e| Error::Assembly(format!("{e:?}")))
    }

    /// An empty (all-zero) matrix.
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        let symbolic =
            SymbolicSparseColMat::new_checked(nrows, ncols, vec![0; ncols + 1], None, Vec::new());
        Self::from_faer(SparseColMat::new(symbolic, Vec::new()))
    }

    /// A square diagonal matrix.
    pub fn from_diagonal(diag: &DVector<f64>) -> Self {
        let n = diag.len();
        let symbolic =
            SymbolicSparseColMat::new_checked(n, n, (0..=n).collect(), None, (0..n).collect());
        Self::from_faer(SparseColMat::new(symbolic, diag.iter().copied().collect()))
    }

    /// The n×n identity.
    pub fn identity(n: usize) -> Self {
        Self::from_diagonal(&DVector::from_element(n, 1.0))
    }

    /// The underlying faer matrix.
    pub fn as_faer(&self) -> &SparseColMat<usize, f64> {
        &self.matrix
    }

    pub fn nrows(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.matrix.ncols()
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.matrix.as_ref().val().len()
    }

    /// Return (row_indices, values) slices for column j.
    pub fn column(&self, j: usize) -> (&[usize], &[f64]) {
        let mat_ref = self.matrix.as_ref();
        let col_ptrs = mat_ref.col_ptr();
        let (start, end) = (col_ptrs[j], col_ptrs[j + 1]);
        (&mat_ref.row_idx()[start..end], &mat_ref.val()[start..end])
    }

    /// Entry (i, j), zero when not stored.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        let (rows, vals) = self.column(j);
        rows.iter()
            .zip(vals)
            .filter(|&(&r, _)| r == i)
            .map(|(_, &v)| v)
            .sum()
    }

    /// All stored entries as (row, col, value), column by column.
    pub fn triplets(&self) -> Vec<(usize, usize, f64)> {
        let mut out = Vec::with_capacity(self.nnz());
        for j in 0..self.ncols() {
            let (rows, vals) = self.column(j);
            out.extend(rows.iter().zip(vals).map(|(&i, &v)| (i, j, v)));
        }
        out
    }

    /// Main diagonal (length `min(nrows, ncols)`).
    pub fn diagonal(&self) -> DVector<f64> {
        DVector::from_fn(self.nrows().min(self.ncols()), |i, _| self.get(i, i))
    }

    /// y = A * x
    pub fn mul_vec(&self, x: &DVector<f64>) -> Result<DVector<f64>> {
        check_dim(self.ncols(), x.len())?;
        let mut y = DVector::zeros(self.nrows());
        // For each column j, add A[:, j] * x[j] to y
        for j in 0..self.ncols() {
            let xj = x[j];
            if xj == 0.0 {
                continue;
            }
            let (rows, vals) = self.column(j);
            for (&i, &v) in rows.iter().zip(vals) {
                y[i] += v * xj;
            }
        }
        Ok(y)
    }

    /// y = Aᵀ * x
    pub fn tr_mul_vec(&self, x: &DVector<f64>) -> Result<DVector<f64>> {
        check_dim(self.nrows(), x.len())?;
        Ok(DVector::from_fn(self.ncols(), |j, _| {
            let (rows, vals) = self.column(j);
            rows.iter().zip(vals).map(|(&i, &v)| v * x[i]).sum()
        }))
    }

    /// Apply to a [`Field`]. The zero sentinel maps to itself.
    pub fn mul_field(&self, x: &Field) -> Result<Field> {
        match x {
            Field::Zero => Ok(Field::Zero),
            other => {
                check_dim(self.ncols(), other.len().unwrap_or(self.ncols()))?;
                Ok(Field::Dense(self.mul_vec(&other.to_dense(self.ncols()))?))
            }
        }
    }

    /// Apply the transpose to a [`Field`]. The zero sentinel maps to itself.
    pub fn tr_mul_field(&self, x: &Field) -> Result<Field> {
        match x {
            Field::Zero => Ok(Field::Zero),
            other => {
                check_dim(self.nrows(), other.len().unwrap_or(self.nrows()))?;
                Ok(Field::Dense(self.tr_mul_vec(&other.to_dense(self.nrows()))?))
            }
        }
    }

    pub fn transpose(&self) -> Result<SparseMatrix> {
        let swapped: Vec<_> = self
            .triplets()
            .into_iter()
            .map(|(i, j, v)| (j, i, v))
            .collect();
        Self::from_triplets(self.ncols(), self.nrows(), &swapped)
    }

    /// C = A * B, one outer product per shared index.
    pub fn matmul(&self, other: &SparseMatrix) -> Result<SparseMatrix> {
        check_dim(self.ncols(), other.nrows())?;
        let mut products = Vec::new();
        for j in 0..other.ncols() {
            let (b_rows, b_vals) = other.column(j);
            for (&k, &b_kj) in b_rows.iter().zip(b_vals) {
                let (a_rows, a_vals) = self.column(k);
                products.extend(a_rows.iter().zip(a_vals).map(|(&i, &a_ik)| (i, j, a_ik * b_kj)));
            }
        }
        Self::from_triplets(self.nrows(), other.ncols(), &products)
    }

    /// alpha * A + beta * B
    pub fn linear_combination(
        &self,
        alpha: f64,
        other: &SparseMatrix,
        beta: f64,
    ) -> Result<SparseMatrix> {
        check_dim(self.nrows(), other.nrows())?;
        check_dim(self.ncols(), other.ncols())?;
        let mut triplets = Vec::with_capacity(self.nnz() + other.nnz());
        triplets.extend(self.triplets().into_iter().map(|(i, j, v)| (i, j, alpha * v)));
        triplets.extend(other.triplets().into_iter().map(|(i, j, v)| (i, j, beta * v)));
        Self::from_triplets(self.nrows(), self.ncols(), &triplets)
    }

    pub fn add(&self, other: &SparseMatrix) -> Result<SparseMatrix> {
        self.linear_combination(1.0, other, 1.0)
    }

    pub fn sub(&self, other: &SparseMatrix) -> Result<SparseMatrix> {
        self.linear_combination(1.0, other, -1.0)
    }

    /// Same sparsity pattern with every stored value mapped by `f(row, col, value)`.
    fn map_values(&self, f: impl Fn(usize, usize, f64) -> f64) -> SparseMatrix {
        let mat_ref = self.matrix.as_ref();
        let col_ptr = mat_ref.col_ptr().to_vec();
        let row_idx = mat_ref.row_idx().to_vec();
        let mut values = Vec::with_capacity(self.nnz());
        for j in 0..self.ncols() {
            let (rows, vals) = self.column(j);
            values.extend(rows.iter().zip(vals).map(|(&i, &v)| f(i, j, v)));
        }
        let symbolic =
            SymbolicSparseColMat::new_checked(self.nrows(), self.ncols(), col_ptr, None, row_idx);
        Self::from_faer(SparseColMat::new(symbolic, values))
    }

    pub fn scale(&self, factor: f64) -> SparseMatrix {
        self.map_values(|_, _, v| v * factor)
    }

    /// diag(d) * A
    pub fn scale_rows(&self, d: &DVector<f64>) -> Result<SparseMatrix> {
        check_dim(self.nrows(), d.len())?;
        Ok(self.map_values(|i, _, v| v * d[i]))
    }

    /// A * diag(d)
    pub fn scale_cols(&self, d: &DVector<f64>) -> Result<SparseMatrix> {
        check_dim(self.ncols(), d.len())?;
        Ok(self.map_values(|_, j, v| v * d[j]))
    }

    /// Whether A equals Aᵀ within an absolute tolerance.
    pub fn is_symmetric(&self, tol: f64) -> bool {
        self.nrows() == self.ncols()
            && self
                .triplets()
                .into_iter()
                .all(|(i, j, v)| (v - self.get(j, i)).abs() <= tol)
    }

    pub fn to_dense(&self) -> DMatrix<f64> {
        let mut dense = DMatrix::zeros(self.nrows(), self.ncols());
        for (i, j, v) in self.triplets() {
            dense[(i, j)] += v;
        }
        dense
    }
}

fn check_dim(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(Error::DimensionMismatch { expected, actual });
    }
    Ok(())
}
