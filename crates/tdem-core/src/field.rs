//! Field values: an algebraic zero, a dense vector or a sparse vector.
//!
//! Sources with no initial fields return [`Field::Zero`] instead of
//! materialising zero vectors. The zero sentinel has no length and acts as
//! the additive identity against every other variant, so callers can combine
//! source terms without checking which ones are present.

use std::ops::{Add, Mul, Neg, Sub};

use nalgebra::DVector;

use crate::error::{Error, Result};

/// A sparse vector with sorted, unique indices.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseVector {
    len: usize,
    entries: Vec<(usize, f64)>,
}

impl SparseVector {
    /// Create from (index, value) pairs. Duplicate indices are summed.
    pub fn new(len: usize, mut entries: Vec<(usize, f64)>) -> Result<Self> {
        if let Some(&(index, _)) = entries.iter().find(|&&(i, _)| i >= len) {
            return Err(Error::IndexOutOfBounds {
                row: index,
                col: 0,
                nrows: len,
                ncols: 1,
            });
        }
        entries.sort_by_key(|&(i, _)| i);
        let mut merged: Vec<(usize, f64)> = Vec::with_capacity(entries.len());
        for (i, v) in entries {
            match merged.last_mut() {
                Some(last) if last.0 == i => last.1 += v,
                _ => merged.push((i, v)),
            }
        }
        Ok(Self {
            len,
            entries: merged,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Stored (index, value) pairs in increasing index order.
    pub fn entries(&self) -> &[(usize, f64)] {
        &self.entries
    }

    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, index: usize) -> f64 {
        match self.entries.binary_search_by_key(&index, |&(i, _)| i) {
            Ok(k) => self.entries[k].1,
            Err(_) => 0.0,
        }
    }

    pub fn to_dense(&self) -> DVector<f64> {
        let mut out = DVector::zeros(self.len);
        for &(i, v) in &self.entries {
            out[i] += v;
        }
        out
    }

    pub fn scale(mut self, factor: f64) -> Self {
        self.entries.iter_mut().for_each(|(_, v)| *v *= factor);
        self
    }

    /// self + beta * other, merging the two index sets.
    fn axpy(&self, beta: f64, other: &SparseVector) -> SparseVector {
        let mut out = Vec::with_capacity(self.entries.len() + other.entries.len());
        let (mut a, mut b) = (self.entries.iter().peekable(), other.entries.iter().peekable());
        loop {
            match (a.peek(), b.peek()) {
                (Some(&&(i, x)), Some(&&(j, y))) => {
                    if i == j {
                        out.push((i, x + beta * y));
                        a.next();
                        b.next();
                    } else if i < j {
                        out.push((i, x));
                        a.next();
                    } else {
                        out.push((j, beta * y));
                        b.next();
                    }
                }
                (Some(&&(i, x)), None) => {
                    out.push((i, x));
                    a.next();
                }
                (None, Some(&&(j, y))) => {
                    out.push((j, beta * y));
                    b.next();
                }
                (None, None) => break,
            }
        }
        SparseVector {
            len: self.len,
            entries: out,
        }
    }
}

/// A discrete field or source term.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Field {
    /// Additive identity; carries no length and allocates nothing.
    #[default]
    Zero,
    Dense(DVector<f64>),
    Sparse(SparseVector),
}

impl Field {
    /// True only for the zero sentinel (a dense vector of zeros is not `Zero`).
    pub fn is_zero(&self) -> bool {
        matches!(self, Field::Zero)
    }

    /// Length of the underlying vector; `None` for the zero sentinel.
    pub fn len(&self) -> Option<usize> {
        match self {
            Field::Zero => None,
            Field::Dense(v) => Some(v.len()),
            Field::Sparse(v) => Some(v.len()),
        }
    }

    /// Materialise as a dense vector of length `n` (the sentinel becomes zeros).
    pub fn to_dense(&self, n: usize) -> DVector<f64> {
        match self {
            Field::Zero => DVector::zeros(n),
            Field::Dense(v) => v.clone(),
            Field::Sparse(v) => v.to_dense(),
        }
    }

    pub fn into_dense(self, n: usize) -> DVector<f64> {
        match self {
            Field::Dense(v) => v,
            other => other.to_dense(n),
        }
    }

    pub fn scale(self, factor: f64) -> Field {
        match self {
            Field::Zero => Field::Zero,
            Field::Dense(v) => Field::Dense(v * factor),
            Field::Sparse(v) => Field::Sparse(v.scale(factor)),
        }
    }

    /// Euclidean inner product; zero whenever either side is the sentinel.
    pub fn dot(&self, other: &Field) -> f64 {
        match (self, other) {
            (Field::Zero, _) | (_, Field::Zero) => 0.0,
            (Field::Dense(a), Field::Dense(b)) => a.dot(b),
            (Field::Dense(d), Field::Sparse(s)) | (Field::Sparse(s), Field::Dense(d)) => {
                s.entries().iter().map(|&(i, v)| v * d[i]).sum()
            }
            (Field::Sparse(a), Field::Sparse(b)) => {
                a.entries().iter().map(|&(i, v)| v * b.get(i)).sum()
            }
        }
    }

    pub fn norm(&self) -> f64 {
        self.dot(self).sqrt()
    }

    /// self + beta * other, reporting a length mismatch instead of panicking.
    pub fn axpy(self, beta: f64, other: &Field) -> Result<Field> {
        if let (Some(a), Some(b)) = (self.len(), other.len()) {
            if a != b {
                return Err(Error::DimensionMismatch {
                    expected: a,
                    actual: b,
                });
            }
        }
        Ok(match (self, other) {
            (lhs, Field::Zero) => lhs,
            (Field::Zero, rhs) => rhs.clone().scale(beta),
            (Field::Dense(a), Field::Dense(b)) => Field::Dense(a + b * beta),
            (Field::Dense(mut a), Field::Sparse(b)) => {
                for &(i, v) in b.entries() {
                    a[i] += beta * v;
                }
                Field::Dense(a)
            }
            (Field::Sparse(a), Field::Dense(b)) => Field::Dense(a.to_dense() + b * beta),
            (Field::Sparse(a), Field::Sparse(b)) => Field::Sparse(a.axpy(beta, b)),
        })
    }

    pub fn checked_add(self, other: &Field) -> Result<Field> {
        self.axpy(1.0, other)
    }

    pub fn checked_sub(self, other: &Field) -> Result<Field> {
        self.axpy(-1.0, other)
    }
}

impl From<DVector<f64>> for Field {
    fn from(v: DVector<f64>) -> Self {
        Field::Dense(v)
    }
}

impl From<SparseVector> for Field {
    fn from(v: SparseVector) -> Self {
        Field::Sparse(v)
    }
}

/// Panics on a length mismatch, like nalgebra's vector addition.
impl Add for Field {
    type Output = Field;

    fn add(self, rhs: Field) -> Field {
        match self.checked_add(&rhs) {
            Ok(f) => f,
            Err(e) => panic!("field addition: {e}"),
        }
    }
}

/// Panics on a length mismatch, like nalgebra's vector subtraction.
impl Sub for Field {
    type Output = Field;

    fn sub(self, rhs: Field) -> Field {
        match self.checked_sub(&rhs) {
            Ok(f) => f,
            Err(e) => panic!("field subtraction: {e}"),
        }
    }
}

impl Neg for Field {
    type Output = Field;

    fn neg(self) -> Field {
        self.scale(-1.0)
    }
}

impl Mul<f64> for Field {
    type Output = Field;

    fn mul(self, rhs: f64) -> Field {
        self.scale(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;

    fn sparse(len: usize, entries: &[(usize, f64)]) -> Field {
        Field::Sparse(SparseVector::new(len, entries.to_vec()).unwrap())
    }

    #[test]
    fn zero_is_additive_identity() {
        let d = Field::Dense(dvector![1.0, 2.0]);
        assert_eq!(Field::Zero + d.clone(), d);
        assert_eq!(d.clone() + Field::Zero, d);
        assert_eq!(Field::Zero - d.clone(), Field::Dense(dvector![-1.0, -2.0]));
        assert!((Field::Zero + Field::Zero).is_zero());
        assert!((Field::Zero * 3.0).is_zero());
        assert!((-Field::Zero).is_zero());
    }

    #[test]
    fn sparse_entries_merge() {
        let v = SparseVector::new(4, vec![(3, 1.0), (1, 2.0), (3, 0.5)]).unwrap();
        assert_eq!(v.entries(), &[(1, 2.0), (3, 1.5)]);
        assert!(SparseVector::new(2, vec![(2, 1.0)]).is_err());
    }

    #[test]
    fn mixed_arithmetic() {
        let a = sparse(3, &[(0, 1.0), (2, 2.0)]);
        let b = sparse(3, &[(2, 1.0)]);
        let d = Field::Dense(dvector![1.0, 1.0, 1.0]);

        assert_eq!(a.clone() - b.clone(), sparse(3, &[(0, 1.0), (2, 1.0)]));
        assert_eq!(
            (a.clone() + d.clone()).to_dense(3),
            dvector![2.0, 1.0, 3.0]
        );
        assert_eq!((d.clone() - a.clone()).to_dense(3), dvector![0.0, 1.0, -1.0]);
        assert_eq!(a.dot(&d), 3.0);
        assert_eq!(a.dot(&b), 2.0);
        assert_eq!(a.dot(&Field::Zero), 0.0);
    }

    #[test]
    fn length_mismatch_is_reported() {
        let a = Field::Dense(dvector![1.0, 2.0]);
        let b = Field::Dense(dvector![1.0]);
        assert!(matches!(
            a.checked_add(&b),
            Err(Error::DimensionMismatch {
                expected: 2,
                actual: 1
            })
        ));
    }
}
