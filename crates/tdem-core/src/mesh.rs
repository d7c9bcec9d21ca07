//! The mesh interface consumed by sources.
//!
//! A mesh owns its geometry and differential operators; sources borrow it
//! for the duration of a computation and never store mesh state themselves,
//! only values derived from it (keyed by [`MeshId`]).

use std::sync::atomic::{AtomicU64, Ordering};

use nalgebra::{DVector, Point3};

use crate::error::{Error, Result};
use crate::field::Field;
use crate::sparse::SparseMatrix;

/// Process-unique identity of a mesh instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshId(u64);

impl MeshId {
    /// Allocate a fresh identity.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        MeshId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Cartesian axis, also used as the component index of vector quantities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

/// Coordinate system in which grid locations are expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinateSystem {
    Cartesian,
    /// Grid locations are (r, θ, z). A symmetric mesh resolves only the
    /// azimuthal component of edge quantities.
    Cylindrical { symmetric: bool },
}

/// Geometry and differential operators of a finite-volume mesh.
pub trait Mesh: Send + Sync {
    fn id(&self) -> MeshId;

    fn coordinate_system(&self) -> CoordinateSystem {
        CoordinateSystem::Cartesian
    }

    fn n_cells(&self) -> usize;
    fn n_faces(&self) -> usize;
    fn n_edges(&self) -> usize;
    fn n_nodes(&self) -> usize;

    /// Locations of the edges parallel to `axis`.
    fn edge_grid(&self, axis: Axis) -> &[Point3<f64>];

    /// Locations of the faces normal to `axis`.
    fn face_grid(&self, axis: Axis) -> &[Point3<f64>];

    /// Nodes → edges (n_edges × n_nodes).
    fn nodal_grad(&self) -> &SparseMatrix;

    /// Faces → cells (n_cells × n_faces).
    fn face_div(&self) -> &SparseMatrix;

    /// Edges → faces (n_faces × n_edges).
    fn edge_curl(&self) -> &SparseMatrix;

    fn cell_volumes(&self) -> &DVector<f64>;

    /// Face inner-product matrix of a cell property; its inverse when `invert`.
    fn face_inner_product(&self, property: &DVector<f64>, invert: bool) -> Result<SparseMatrix>;

    /// Edge inner-product matrix of a cell property; its inverse when `invert`.
    fn edge_inner_product(&self, property: &DVector<f64>, invert: bool) -> Result<SparseMatrix>;

    /// Edge-integrated current density of a unit current along a polyline.
    fn segmented_line_current(&self, _path: &[Point3<f64>]) -> Result<Field> {
        Err(Error::NotSupported(
            "segmented line currents on this mesh type".to_string(),
        ))
    }

    /// Signed face crossings of a polyline, optionally divided by face area.
    fn line_through_faces(&self, _path: &[Point3<f64>], _normalize_by_area: bool) -> Result<Field> {
        Err(Error::NotSupported(
            "line-through-face currents on this mesh type".to_string(),
        ))
    }
}
