//! Discrete source terms of wire paths.
//!
//! A grounded wire carrying unit current is described two ways:
//! - on edges, by the current integrated along each edge's dual volume,
//!   which is what `Grad^T` turns into nodal point sources
//! - on faces, by the signed crossings of the wire through each face,
//!   which is what `Div` turns into cell point sources

use nalgebra::{Point3, Vector3};
use tdem_core::{Error, Field, Mesh, Result, SparseVector};

use crate::tensor::{Index3, TensorMesh, shift};

/// Relative tolerance on curve parameters when merging plane crossings.
const T_TOL: f64 = 1e-12;

fn check_path(path: &[Point3<f64>]) -> Result<()> {
    if path.len() < 2 {
        return Err(Error::DimensionMismatch {
            expected: 2,
            actual: path.len(),
        });
    }
    Ok(())
}

impl TensorMesh {
    /// Linear shape function of node `lower + s` in the cell `[x_lo, x_hi)`
    /// along `axis`, evaluated at `x`.
    fn hat(&self, axis: usize, cell: usize, s: usize, x: f64) -> f64 {
        let lo = self.node_coordinate(axis, cell);
        let h = self.width(axis, cell);
        let t = (x - lo) / h;
        if s == 0 { 1.0 - t } else { t }
    }

    /// Curve parameters in (0, 1) where the segment crosses a node plane.
    fn node_plane_crossings(&self, p: &Point3<f64>, d: &Vector3<f64>) -> Vec<f64> {
        let mut ts = vec![0.0, 1.0];
        for a in 0..3 {
            if d[a] == 0.0 {
                continue;
            }
            for &x in self.nodes_along(a) {
                let t = (x - p[a]) / d[a];
                if t > 0.0 && t < 1.0 {
                    ts.push(t);
                }
            }
        }
        ts.sort_by(f64::total_cmp);
        ts.dedup_by(|b, a| (*b - *a).abs() < T_TOL);
        ts
    }

    /// Edge source term of a unit current flowing along `path`.
    ///
    /// Each segment is split at every node plane so that every piece lies in
    /// a single cell. A piece contributes its length along each axis to the
    /// four parallel edges of that cell, weighted by the bilinear shape
    /// functions of the transverse coordinates integrated along the piece
    /// (Simpson's rule, exact for the quadratic integrand).
    pub(crate) fn segmented_line_current_term(&self, path: &[Point3<f64>]) -> Result<Field> {
        check_path(path)?;
        for p in path {
            self.locate(p)?;
        }

        let mut entries = Vec::new();
        for seg in path.windows(2) {
            let (p, q) = (seg[0], seg[1]);
            let d = q - p;
            let ts = self.node_plane_crossings(&p, &d);

            for w in ts.windows(2) {
                let a = p + d * w[0];
                let b = p + d * w[1];
                let mid = Point3::from((a.coords + b.coords) * 0.5);
                let cell = self.locate(&mid)?;
                let piece = b - a;

                for axis in 0..3 {
                    if piece[axis] == 0.0 {
                        continue;
                    }
                    let (tb, tc) = ((axis + 1) % 3, (axis + 2) % 3);
                    for sb in 0..2 {
                        for sc in 0..2 {
                            let shape = |x: &Point3<f64>| {
                                self.hat(tb, cell[tb], sb, x[tb]) * self.hat(tc, cell[tc], sc, x[tc])
                            };
                            let weight = (shape(&a) + 4.0 * shape(&mid) + shape(&b)) / 6.0;
                            if weight == 0.0 {
                                continue;
                            }
                            let mut edge: Index3 = cell;
                            edge[tb] += sb;
                            edge[tc] += sc;
                            entries.push((self.edge_index(axis, edge), piece[axis] * weight));
                        }
                    }
                }
            }
        }

        log::trace!(
            "segmented line current: {} points, {} edge contributions",
            path.len(),
            entries.len()
        );
        Ok(Field::Sparse(SparseVector::new(self.n_edges(), entries)?))
    }

    /// Face source term of a unit current flowing along `path`.
    ///
    /// A segment crosses the interior node plane `x` along an axis when
    /// `min < x <= max` of its end coordinates, matching the half-open cell
    /// convention of [`TensorMesh::locate`]. Crossings are walked in order of
    /// the curve parameter starting from the cell holding the segment start,
    /// so every crossed face lies between the current cell and its neighbour.
    /// Simultaneous crossings of a node line or corner step through one axis
    /// at a time. Each crossing adds the sign of the direction of travel to
    /// the crossed face, divided by the face area when `normalize_by_area`
    /// is set.
    pub(crate) fn line_through_faces_term(
        &self,
        path: &[Point3<f64>],
        normalize_by_area: bool,
    ) -> Result<Field> {
        check_path(path)?;
        for p in path {
            self.locate(p)?;
        }

        let mut entries = Vec::new();
        for seg in path.windows(2) {
            let (p, q) = (seg[0], seg[1]);
            let d = q - p;

            let mut crossings = Vec::new();
            for axis in 0..3 {
                if d[axis] == 0.0 {
                    continue;
                }
                let (lo, hi) = (p[axis].min(q[axis]), p[axis].max(q[axis]));
                for plane in self.interior_planes(axis) {
                    let x = self.node_coordinate(axis, plane);
                    if lo < x && x <= hi {
                        crossings.push(((x - p[axis]) / d[axis], axis, plane));
                    }
                }
            }
            crossings.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut cell = self.locate(&p)?;
            for (_, axis, plane) in crossings {
                let mut face = cell;
                face[axis] = plane;
                let index = self.face_index(axis, face);
                let sign = d[axis].signum();
                let value = if normalize_by_area {
                    sign / self.face_areas()[index]
                } else {
                    sign
                };
                entries.push((index, value));
                cell[axis] = if sign > 0.0 { plane } else { plane - 1 };
            }
        }

        Ok(Field::Sparse(SparseVector::new(self.n_faces(), entries)?))
    }

    /// Trilinear interpolation weights of `p` on the nodes of its cell.
    pub fn nodal_interpolation(&self, p: &Point3<f64>) -> Result<Vec<(usize, f64)>> {
        let cell = self.locate(p)?;
        let mut out = Vec::with_capacity(8);
        for s in 0..8 {
            let corner = [s & 1, (s >> 1) & 1, (s >> 2) & 1];
            let w: f64 = (0..3).map(|a| self.hat(a, cell[a], corner[a], p[a])).product();
            let mut node = cell;
            for a in 0..3 {
                if corner[a] == 1 {
                    node = shift(node, a);
                }
            }
            out.push((self.node_index(node), w));
        }
        Ok(out)
    }
}
