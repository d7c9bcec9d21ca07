//! Tensor mesh geometry, differential operators and inner products.

use nalgebra::{DVector, Point3};
use tdem_core::{Axis, Error, Mesh, MeshId, Result, SparseMatrix};

/// Index triple (i, j, k) on one of the staggered grids.
pub(crate) type Index3 = [usize; 3];

pub(crate) fn shift(idx: Index3, axis: usize) -> Index3 {
    let mut out = idx;
    out[axis] += 1;
    out
}

fn flat(shape: Index3, idx: Index3) -> usize {
    idx[0] + shape[0] * (idx[1] + shape[1] * idx[2])
}

fn grid_len(shape: Index3) -> usize {
    shape[0] * shape[1] * shape[2]
}

fn for_each_index(shape: Index3, mut f: impl FnMut(Index3)) {
    for k in 0..shape[2] {
        for j in 0..shape[1] {
            for i in 0..shape[0] {
                f([i, j, k]);
            }
        }
    }
}

/// A 3D rectilinear mesh.
#[derive(Debug, Clone)]
pub struct TensorMesh {
    id: MeshId,
    h: [Vec<f64>; 3],
    nodes: [Vec<f64>; 3],
    centers: [Vec<f64>; 3],
    cell_volumes: DVector<f64>,
    face_areas: DVector<f64>,
    edge_lengths: DVector<f64>,
    edge_grids: [Vec<Point3<f64>>; 3],
    face_grids: [Vec<Point3<f64>>; 3],
    nodal_grad: SparseMatrix,
    face_div: SparseMatrix,
    edge_curl: SparseMatrix,
    face_weights: SparseMatrix,
    edge_weights: SparseMatrix,
}

impl TensorMesh {
    /// Build a mesh from cell widths along x, y and z, with the lowest
    /// corner at `origin`.
    ///
    /// # Errors
    /// `InvalidProperty` if an axis has no cells or a width is not positive
    /// and finite.
    pub fn new(hx: Vec<f64>, hy: Vec<f64>, hz: Vec<f64>, origin: Point3<f64>) -> Result<Self> {
        let h = [hx, hy, hz];
        for widths in &h {
            if widths.is_empty() {
                return Err(Error::InvalidProperty {
                    index: 0,
                    value: 0.0,
                });
            }
            if let Some((index, &value)) = widths
                .iter()
                .enumerate()
                .find(|&(_, &w)| !(w.is_finite() && w > 0.0))
            {
                return Err(Error::InvalidProperty { index, value });
            }
        }

        let nodes: [Vec<f64>; 3] = std::array::from_fn(|a| {
            let mut x = Vec::with_capacity(h[a].len() + 1);
            let mut acc = origin[a];
            x.push(acc);
            for &w in &h[a] {
                acc += w;
                x.push(acc);
            }
            x
        });
        let centers: [Vec<f64>; 3] = std::array::from_fn(|a| {
            nodes[a].windows(2).map(|w| 0.5 * (w[0] + w[1])).collect()
        });

        let mut mesh = Self {
            id: MeshId::next(),
            h,
            nodes,
            centers,
            cell_volumes: DVector::zeros(0),
            face_areas: DVector::zeros(0),
            edge_lengths: DVector::zeros(0),
            edge_grids: Default::default(),
            face_grids: Default::default(),
            nodal_grad: SparseMatrix::zeros(0, 0),
            face_div: SparseMatrix::zeros(0, 0),
            edge_curl: SparseMatrix::zeros(0, 0),
            face_weights: SparseMatrix::zeros(0, 0),
            edge_weights: SparseMatrix::zeros(0, 0),
        };
        mesh.build_geometry();
        mesh.build_operators()?;

        log::debug!(
            "tensor mesh {:?}: {} cells, {} faces, {} edges, {} nodes",
            mesh.shape_cells(),
            mesh.n_cells(),
            mesh.n_faces(),
            mesh.n_edges(),
            mesh.n_nodes()
        );
        Ok(mesh)
    }

    /// A mesh of `n` equal cells of width `h` along each axis.
    pub fn uniform(n: [usize; 3], h: [f64; 3], origin: Point3<f64>) -> Result<Self> {
        Self::new(
            vec![h[0]; n[0]],
            vec![h[1]; n[1]],
            vec![h[2]; n[2]],
            origin,
        )
    }

    /// Number of cells along each axis.
    pub fn shape_cells(&self) -> Index3 {
        std::array::from_fn(|a| self.h[a].len())
    }

    /// Number of nodes along each axis.
    pub fn shape_nodes(&self) -> Index3 {
        std::array::from_fn(|a| self.h[a].len() + 1)
    }

    /// Grid shape of the edges parallel to `axis`.
    pub(crate) fn edge_shape(&self, axis: usize) -> Index3 {
        let mut s = self.shape_nodes();
        s[axis] -= 1;
        s
    }

    /// Grid shape of the faces normal to `axis`.
    pub(crate) fn face_shape(&self, axis: usize) -> Index3 {
        let mut s = self.shape_cells();
        s[axis] += 1;
        s
    }

    fn edge_offset(&self, axis: usize) -> usize {
        (0..axis).map(|a| grid_len(self.edge_shape(a))).sum()
    }

    fn face_offset(&self, axis: usize) -> usize {
        (0..axis).map(|a| grid_len(self.face_shape(a))).sum()
    }

    pub(crate) fn cell_index(&self, idx: Index3) -> usize {
        flat(self.shape_cells(), idx)
    }

    pub(crate) fn node_index(&self, idx: Index3) -> usize {
        flat(self.shape_nodes(), idx)
    }

    pub(crate) fn edge_index(&self, axis: usize, idx: Index3) -> usize {
        self.edge_offset(axis) + flat(self.edge_shape(axis), idx)
    }

    pub(crate) fn face_index(&self, axis: usize, idx: Index3) -> usize {
        self.face_offset(axis) + flat(self.face_shape(axis), idx)
    }

    /// Cell widths along one axis.
    pub fn widths(&self, axis: Axis) -> &[f64] {
        &self.h[axis.index()]
    }

    /// Node coordinates along one axis.
    pub fn node_coordinates(&self, axis: Axis) -> &[f64] {
        &self.nodes[axis.index()]
    }

    /// Cell-centre coordinates along one axis.
    pub fn cell_center_coordinates(&self, axis: Axis) -> &[f64] {
        &self.centers[axis.index()]
    }

    pub fn face_areas(&self) -> &DVector<f64> {
        &self.face_areas
    }

    pub fn edge_lengths(&self) -> &DVector<f64> {
        &self.edge_lengths
    }

    /// Face weights `P_f` (n_faces × n_cells): each face receives half the
    /// volume of every cell it bounds. `face_inner_product(p)` is
    /// `diag(P_f p)`.
    pub fn face_weights(&self) -> &SparseMatrix {
        &self.face_weights
    }

    /// Edge weights `P_e` (n_edges × n_cells): each edge receives a quarter
    /// of the volume of every cell it borders. `edge_inner_product(p)` is
    /// `diag(P_e p)`.
    pub fn edge_weights(&self) -> &SparseMatrix {
        &self.edge_weights
    }

    /// Index of the cell containing coordinate `x` along `axis`, using
    /// half-open cells `[x_i, x_{i+1})`; the upper boundary belongs to the
    /// last cell. `None` outside the mesh.
    pub(crate) fn locate_axis(&self, axis: usize, x: f64) -> Option<usize> {
        let nodes = &self.nodes[axis];
        let n = nodes.len() - 1;
        let tol = 1e-10 * (nodes[n] - nodes[0]);
        if !(x >= nodes[0] - tol && x <= nodes[n] + tol) {
            return None;
        }
        let i = nodes.partition_point(|&v| v <= x);
        Some(i.saturating_sub(1).min(n - 1))
    }

    /// Cell index triple containing `p`.
    pub fn locate(&self, p: &Point3<f64>) -> Result<Index3> {
        let mut idx = [0; 3];
        for (a, slot) in idx.iter_mut().enumerate() {
            *slot = self.locate_axis(a, p[a]).ok_or(Error::OutsideMesh {
                x: p.x,
                y: p.y,
                z: p.z,
            })?;
        }
        Ok(idx)
    }

    pub(crate) fn node_coordinate(&self, axis: usize, i: usize) -> f64 {
        self.nodes[axis][i]
    }

    pub(crate) fn width(&self, axis: usize, i: usize) -> f64 {
        self.h[axis][i]
    }

    pub(crate) fn interior_planes(&self, axis: usize) -> std::ops::Range<usize> {
        1..self.h[axis].len()
    }

    pub(crate) fn nodes_along(&self, axis: usize) -> &[f64] {
        &self.nodes[axis]
    }

    fn build_geometry(&mut self) {
        let nc = self.shape_cells();

        let mut vol = Vec::with_capacity(grid_len(nc));
        for_each_index(nc, |c| {
            vol.push(self.h[0][c[0]] * self.h[1][c[1]] * self.h[2][c[2]]);
        });
        self.cell_volumes = DVector::from_vec(vol);

        let mut areas = Vec::with_capacity(self.n_faces());
        for a in 0..3 {
            let (b, c) = ((a + 1) % 3, (a + 2) % 3);
            let mut grid = Vec::with_capacity(grid_len(self.face_shape(a)));
            for_each_index(self.face_shape(a), |f| {
                areas.push(self.h[b][f[b]] * self.h[c][f[c]]);
                let mut p = Point3::origin();
                p[a] = self.nodes[a][f[a]];
                p[b] = self.centers[b][f[b]];
                p[c] = self.centers[c][f[c]];
                grid.push(p);
            });
            self.face_grids[a] = grid;
        }
        self.face_areas = DVector::from_vec(areas);

        let mut lengths = Vec::with_capacity(self.n_edges());
        for a in 0..3 {
            let (b, c) = ((a + 1) % 3, (a + 2) % 3);
            let mut grid = Vec::with_capacity(grid_len(self.edge_shape(a)));
            for_each_index(self.edge_shape(a), |e| {
                lengths.push(self.h[a][e[a]]);
                let mut p = Point3::origin();
                p[a] = self.centers[a][e[a]];
                p[b] = self.nodes[b][e[b]];
                p[c] = self.nodes[c][e[c]];
                grid.push(p);
            });
            self.edge_grids[a] = grid;
        }
        self.edge_lengths = DVector::from_vec(lengths);
    }

    fn build_operators(&mut self) -> Result<()> {
        let (n_cells, n_faces, n_edges, n_nodes) =
            (self.n_cells(), self.n_faces(), self.n_edges(), self.n_nodes());

        // Grad: edge along a from node idx to idx + e_a
        let mut grad = Vec::with_capacity(2 * n_edges);
        for a in 0..3 {
            for_each_index(self.edge_shape(a), |e| {
                let row = self.edge_index(a, e);
                let inv_h = 1.0 / self.h[a][e[a]];
                grad.push((row, self.node_index(e), -inv_h));
                grad.push((row, self.node_index(shift(e, a)), inv_h));
            });
        }
        self.nodal_grad = SparseMatrix::from_triplets(n_edges, n_nodes, &grad)?;

        // Div: outward flux through the two faces normal to each axis
        let mut div = Vec::with_capacity(6 * n_cells);
        for_each_index(self.shape_cells(), |c| {
            let row = self.cell_index(c);
            for a in 0..3 {
                let inv_h = 1.0 / self.h[a][c[a]];
                div.push((row, self.face_index(a, c), -inv_h));
                div.push((row, self.face_index(a, shift(c, a)), inv_h));
            }
        });
        self.face_div = SparseMatrix::from_triplets(n_cells, n_faces, &div)?;

        // Curl: circulation around a face normal to a, divided by its area
        //   (curl E)_a = d_b E_c - d_c E_b  with (a, b, c) cyclic
        let mut curl = Vec::with_capacity(4 * n_faces);
        for a in 0..3 {
            let (b, c) = ((a + 1) % 3, (a + 2) % 3);
            for_each_index(self.face_shape(a), |f| {
                let row = self.face_index(a, f);
                let inv_hb = 1.0 / self.h[b][f[b]];
                let inv_hc = 1.0 / self.h[c][f[c]];
                curl.push((row, self.edge_index(c, shift(f, b)), inv_hb));
                curl.push((row, self.edge_index(c, f), -inv_hb));
                curl.push((row, self.edge_index(b, shift(f, c)), -inv_hc));
                curl.push((row, self.edge_index(b, f), inv_hc));
            });
        }
        self.edge_curl = SparseMatrix::from_triplets(n_faces, n_edges, &curl)?;

        let mut fw = Vec::with_capacity(6 * n_cells);
        let mut ew = Vec::with_capacity(12 * n_cells);
        for_each_index(self.shape_cells(), |c| {
            let col = self.cell_index(c);
            let v = self.cell_volumes[col];
            for a in 0..3 {
                let (b, cc) = ((a + 1) % 3, (a + 2) % 3);
                fw.push((self.face_index(a, c), col, 0.5 * v));
                fw.push((self.face_index(a, shift(c, a)), col, 0.5 * v));
                for corner in [c, shift(c, b), shift(c, cc), shift(shift(c, b), cc)] {
                    ew.push((self.edge_index(a, corner), col, 0.25 * v));
                }
            }
        });
        self.face_weights = SparseMatrix::from_triplets(n_faces, n_cells, &fw)?;
        self.edge_weights = SparseMatrix::from_triplets(n_edges, n_cells, &ew)?;
        Ok(())
    }

    fn lumped_inner_product(
        &self,
        weights: &SparseMatrix,
        property: &DVector<f64>,
        invert: bool,
    ) -> Result<SparseMatrix> {
        if property.len() != self.n_cells() {
            return Err(Error::DimensionMismatch {
                expected: self.n_cells(),
                actual: property.len(),
            });
        }
        if let Some((index, &value)) = property
            .iter()
            .enumerate()
            .find(|&(_, &p)| !(p.is_finite() && p > 0.0))
        {
            return Err(Error::InvalidProperty { index, value });
        }
        let mut diag = weights.mul_vec(property)?;
        if invert {
            diag.apply(|d| *d = 1.0 / *d);
        }
        Ok(SparseMatrix::from_diagonal(&diag))
    }
}

impl Mesh for TensorMesh {
    fn id(&self) -> MeshId {
        self.id
    }

    fn n_cells(&self) -> usize {
        grid_len(self.shape_cells())
    }

    fn n_faces(&self) -> usize {
        (0..3).map(|a| grid_len(self.face_shape(a))).sum()
    }

    fn n_edges(&self) -> usize {
        (0..3).map(|a| grid_len(self.edge_shape(a))).sum()
    }

    fn n_nodes(&self) -> usize {
        grid_len(self.shape_nodes())
    }

    fn edge_grid(&self, axis: Axis) -> &[Point3<f64>] {
        &self.edge_grids[axis.index()]
    }

    fn face_grid(&self, axis: Axis) -> &[Point3<f64>] {
        &self.face_grids[axis.index()]
    }

    fn nodal_grad(&self) -> &SparseMatrix {
        &self.nodal_grad
    }

    fn face_div(&self) -> &SparseMatrix {
        &self.face_div
    }

    fn edge_curl(&self) -> &SparseMatrix {
        &self.edge_curl
    }

    fn cell_volumes(&self) -> &DVector<f64> {
        &self.cell_volumes
    }

    fn face_inner_product(&self, property: &DVector<f64>, invert: bool) -> Result<SparseMatrix> {
        self.lumped_inner_product(&self.face_weights, property, invert)
    }

    fn edge_inner_product(&self, property: &DVector<f64>, invert: bool) -> Result<SparseMatrix> {
        self.lumped_inner_product(&self.edge_weights, property, invert)
    }

    fn segmented_line_current(&self, path: &[Point3<f64>]) -> Result<tdem_core::Field> {
        self.segmented_line_current_term(path)
    }

    fn line_through_faces(
        &self,
        path: &[Point3<f64>],
        normalize_by_area: bool,
    ) -> Result<tdem_core::Field> {
        self.line_through_faces_term(path, normalize_by_area)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mesh() -> TensorMesh {
        TensorMesh::new(
            vec![1.0, 2.0, 1.5],
            vec![0.5, 1.0],
            vec![2.0, 1.0, 1.0, 0.5],
            Point3::new(-1.0, 0.0, -3.0),
        )
        .unwrap()
    }

    fn max_abs(m: &SparseMatrix) -> f64 {
        m.triplets().iter().map(|t| t.2.abs()).fold(0.0, f64::max)
    }

    #[test]
    fn counts() {
        let m = mesh();
        assert_eq!(m.n_cells(), 3 * 2 * 4);
        assert_eq!(m.n_nodes(), 4 * 3 * 5);
        assert_eq!(m.n_edges(), 3 * 3 * 5 + 4 * 2 * 5 + 4 * 3 * 4);
        assert_eq!(m.n_faces(), 4 * 2 * 4 + 3 * 3 * 4 + 3 * 2 * 5);
        assert_eq!(m.nodal_grad().nrows(), m.n_edges());
        assert_eq!(m.face_div().ncols(), m.n_faces());
        assert_eq!(m.edge_curl().ncols(), m.n_edges());
        assert_eq!(m.edge_grid(Axis::Y).len(), 4 * 2 * 5);
        assert_eq!(m.face_grid(Axis::Z).len(), 3 * 2 * 5);
    }

    #[test]
    fn invalid_widths_rejected() {
        let err = TensorMesh::new(vec![1.0, -1.0], vec![1.0], vec![1.0], Point3::origin());
        assert!(matches!(
            err,
            Err(Error::InvalidProperty { index: 1, .. })
        ));
        assert!(TensorMesh::new(vec![], vec![1.0], vec![1.0], Point3::origin()).is_err());
    }

    #[test]
    fn exact_sequence() {
        let m = mesh();
        let curl_grad = m.edge_curl().matmul(m.nodal_grad()).unwrap();
        let div_curl = m.face_div().matmul(m.edge_curl()).unwrap();
        assert!(max_abs(&curl_grad) < 1e-12);
        assert!(max_abs(&div_curl) < 1e-12);
    }

    #[test]
    fn gradient_of_linear_function() {
        let m = mesh();
        let nn = m.shape_nodes();
        let mut phi = DVector::zeros(m.n_nodes());
        for_each_index(nn, |n| {
            let (x, y, z) = (m.nodes[0][n[0]], m.nodes[1][n[1]], m.nodes[2][n[2]]);
            phi[m.node_index(n)] = 2.0 * x - y + 0.5 * z;
        });
        let e = m.nodal_grad().mul_vec(&phi).unwrap();
        let expected = [2.0, -1.0, 0.5];
        for a in 0..3 {
            for_each_index(m.edge_shape(a), |idx| {
                assert!((e[m.edge_index(a, idx)] - expected[a]).abs() < 1e-12);
            });
        }
    }

    #[test]
    fn divergence_theorem() {
        let m = mesh();
        // Total outward flux of a unit field through every face
        let flux = DVector::from_element(m.n_faces(), 1.0);
        let div = m.face_div().mul_vec(&flux).unwrap();
        // Uniform field: net outflow is zero everywhere
        assert!(div.amax() < 1e-12);
        assert!((m.cell_volumes().sum() - 4.5 * 1.5 * 4.5).abs() < 1e-12);
    }

    #[test]
    fn inner_products_are_lumped() {
        let m = mesh();
        let sigma = DVector::from_element(m.n_cells(), 2.0);
        let mf = m.face_inner_product(&sigma, false).unwrap();
        let mf_inv = m.face_inner_product(&sigma, true).unwrap();
        assert_eq!(mf.nnz(), m.n_faces());
        let prod = mf.matmul(&mf_inv).unwrap();
        assert!((prod.diagonal() - DVector::from_element(m.n_faces(), 1.0)).amax() < 1e-12);

        // Summed face weights per cell: 6 faces × vol/2
        let ones_f = DVector::from_element(m.n_faces(), 1.0);
        let per_cell = m.face_weights().tr_mul_vec(&ones_f).unwrap();
        assert!((per_cell - m.cell_volumes() * 3.0).amax() < 1e-12);

        let ones_e = DVector::from_element(m.n_edges(), 1.0);
        let per_cell = m.edge_weights().tr_mul_vec(&ones_e).unwrap();
        assert!((per_cell - m.cell_volumes() * 3.0).amax() < 1e-12);

        let me = m.edge_inner_product(&sigma, false).unwrap();
        assert!((me.diagonal().sum() - 2.0 * 3.0 * m.cell_volumes().sum()).abs() < 1e-9);
    }

    #[test]
    fn non_positive_property_rejected() {
        let m = mesh();
        let mut sigma = DVector::from_element(m.n_cells(), 1.0);
        sigma[5] = 0.0;
        assert!(matches!(
            m.face_inner_product(&sigma, true),
            Err(Error::InvalidProperty { index: 5, .. })
        ));
    }

    #[test]
    fn locate_half_open() {
        let m = mesh();
        assert_eq!(m.locate(&Point3::new(-1.0, 0.0, -3.0)).unwrap(), [0, 0, 0]);
        assert_eq!(m.locate(&Point3::new(0.0, 0.5, -1.0)).unwrap(), [1, 1, 1]);
        // Upper boundary belongs to the last cell
        assert_eq!(m.locate(&Point3::new(3.5, 1.5, 1.5)).unwrap(), [2, 1, 3]);
        assert!(matches!(
            m.locate(&Point3::new(4.0, 0.0, 0.0)),
            Err(Error::OutsideMesh { .. })
        ));
    }
}
