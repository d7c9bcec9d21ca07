//! Discretization families.
//!
//! The EB family keeps the electric field on edges and the magnetic flux
//! density on faces; HJ keeps the magnetic field on edges and the current
//! density on faces. Every formulation-dependent step a source performs goes
//! through a [`Formulation`], so source types never branch on the family
//! themselves.

use std::fmt;

use nalgebra::{DVector, Point3};
use tdem_core::{Axis, CoordinateSystem, Field, Mesh, SparseMatrix};

use crate::error::{Error, Result};
use crate::simulation::Simulation;

/// Which discretization family a simulation uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormulationKind {
    Eb,
    Hj,
}

impl FormulationKind {
    /// The strategy object for this family.
    pub fn strategy(self) -> &'static dyn Formulation {
        match self {
            FormulationKind::Eb => &EbFormulation,
            FormulationKind::Hj => &HjFormulation,
        }
    }

    /// Field types a simulation of this family may solve for.
    pub fn field_types(self) -> [FieldType; 2] {
        match self {
            FormulationKind::Eb => [FieldType::E, FieldType::B],
            FormulationKind::Hj => [FieldType::H, FieldType::J],
        }
    }

    pub fn supports(self, field_type: FieldType) -> bool {
        self.field_types().contains(&field_type)
    }
}

impl fmt::Display for FormulationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormulationKind::Eb => write!(f, "EB"),
            FormulationKind::Hj => write!(f, "HJ"),
        }
    }
}

/// The field a time-stepping simulation solves for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    E,
    B,
    H,
    J,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::E => "e",
            FieldType::B => "b",
            FieldType::H => "h",
            FieldType::J => "j",
        };
        f.write_str(name)
    }
}

/// Quantities of the galvanic initial-field chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InitialQuantity {
    /// DC potential.
    Phi,
    E,
    J,
    /// Magnetostatic vector potential.
    A,
    B,
    H,
}

impl fmt::Display for InitialQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InitialQuantity::Phi => "phi",
            InitialQuantity::E => "e",
            InitialQuantity::J => "j",
            InitialQuantity::A => "a",
            InitialQuantity::B => "b",
            InitialQuantity::H => "h",
        };
        f.write_str(name)
    }
}

/// Formulation-dependent pieces of source evaluation.
pub trait Formulation: Send + Sync {
    fn kind(&self) -> FormulationKind;

    /// The field type for which an inductive source deposits no initial
    /// source term inside the first time step.
    fn magnetic_field_type(&self) -> FieldType;

    /// Number of unknowns of the grid the source vector potential lives on.
    fn potential_len(&self, mesh: &dyn Mesh) -> usize;

    /// Grids on which to sample each component of a source vector potential.
    ///
    /// A cylindrically symmetric mesh resolves only the azimuthal component,
    /// so only the `Y` grid is returned there.
    fn potential_grids<'m>(&self, mesh: &'m dyn Mesh) -> Vec<(Axis, &'m [Point3<f64>])>;

    /// Flux density of a sampled vector potential.
    fn curl_potential(&self, mesh: &dyn Mesh, a: &DVector<f64>) -> Result<DVector<f64>>;

    /// Electric source term of an inductive source with flux `b` in a medium
    /// of permeability `mu`.
    fn inductive_injection(&self, mesh: &dyn Mesh, b: &DVector<f64>, mu: f64)
    -> Result<DVector<f64>>;

    /// `D·MfMuiI·Dᵀ`, the system of the magnetostatic correction.
    fn magnetostatic_operator(&self, simulation: &dyn Simulation) -> Result<SparseMatrix>;

    /// Number of unknowns of the grid galvanic currents are injected on.
    fn injection_len(&self, mesh: &dyn Mesh) -> usize;

    /// Discrete current of a unit current along `path`.
    fn galvanic_injection(&self, mesh: &dyn Mesh, path: &[Point3<f64>]) -> Result<Field>;

    /// `Q·q`: the DC right-hand side of an injection `q`.
    fn dc_source(&self, mesh: &dyn Mesh, q: &Field) -> Result<DVector<f64>>;

    /// `Qᵀ·phi`.
    fn dc_source_transpose(&self, mesh: &dyn Mesh, phi: &DVector<f64>) -> Result<DVector<f64>>;

    /// `C·MeMuI·Cᵀ − Dᵀ·diag(μ⁻¹/vol)·D`, the stabilized magnetostatic
    /// vector-potential system on faces.
    fn ammr(&self, simulation: &dyn Simulation) -> Result<SparseMatrix>;

    /// Whether the galvanic initial-field chain resolves `quantity`.
    fn resolves(&self, quantity: InitialQuantity) -> bool;

    fn check_galvanic(&self, quantity: InitialQuantity) -> Result<()> {
        if self.resolves(quantity) {
            Ok(())
        } else {
            Err(Error::NotSupported(format!(
                "initial {quantity} of a galvanic source in the {} formulation",
                self.kind()
            )))
        }
    }
}

fn sampling_grids<'m>(
    mesh: &'m dyn Mesh,
    grid: impl Fn(Axis) -> &'m [Point3<f64>],
) -> Vec<(Axis, &'m [Point3<f64>])> {
    match mesh.coordinate_system() {
        CoordinateSystem::Cylindrical { symmetric: true } => vec![(Axis::Y, grid(Axis::Y))],
        _ => Axis::ALL.iter().map(|&axis| (axis, grid(axis))).collect(),
    }
}

fn uniform(n: usize, value: f64) -> DVector<f64> {
    DVector::from_element(n, value)
}

/// E on edges, B on faces.
#[derive(Debug, Clone, Copy, Default)]
pub struct EbFormulation;

impl Formulation for EbFormulation {
    fn kind(&self) -> FormulationKind {
        FormulationKind::Eb
    }

    fn magnetic_field_type(&self) -> FieldType {
        FieldType::B
    }

    fn potential_len(&self, mesh: &dyn Mesh) -> usize {
        mesh.n_edges()
    }

    fn potential_grids<'m>(&self, mesh: &'m dyn Mesh) -> Vec<(Axis, &'m [Point3<f64>])> {
        sampling_grids(mesh, move |axis| mesh.edge_grid(axis))
    }

    fn curl_potential(&self, mesh: &dyn Mesh, a: &DVector<f64>) -> Result<DVector<f64>> {
        Ok(mesh.edge_curl().mul_vec(a)?)
    }

    fn inductive_injection(
        &self,
        mesh: &dyn Mesh,
        b: &DVector<f64>,
        mu: f64,
    ) -> Result<DVector<f64>> {
        let mf_mui = mesh.face_inner_product(&uniform(mesh.n_cells(), 1.0 / mu), false)?;
        Ok(mesh.edge_curl().tr_mul_vec(&mf_mui.mul_vec(b)?)?)
    }

    fn magnetostatic_operator(&self, simulation: &dyn Simulation) -> Result<SparseMatrix> {
        let div = simulation.mesh().face_div();
        let a = div
            .matmul(simulation.mf_mui_i())?
            .matmul(&div.transpose()?)?;
        Ok(a)
    }

    fn injection_len(&self, mesh: &dyn Mesh) -> usize {
        mesh.n_edges()
    }

    fn galvanic_injection(&self, mesh: &dyn Mesh, path: &[Point3<f64>]) -> Result<Field> {
        Ok(mesh.segmented_line_current(path)?)
    }

    fn dc_source(&self, mesh: &dyn Mesh, q: &Field) -> Result<DVector<f64>> {
        Ok(mesh.nodal_grad().tr_mul_field(q)?.into_dense(mesh.n_nodes()))
    }

    fn dc_source_transpose(&self, mesh: &dyn Mesh, phi: &DVector<f64>) -> Result<DVector<f64>> {
        Ok(mesh.nodal_grad().mul_vec(phi)?)
    }

    fn ammr(&self, _simulation: &dyn Simulation) -> Result<SparseMatrix> {
        Err(Error::NotSupported(
            "the magnetostatic vector-potential system in the EB formulation".to_string(),
        ))
    }

    fn resolves(&self, quantity: InitialQuantity) -> bool {
        matches!(quantity, InitialQuantity::Phi | InitialQuantity::E)
    }
}

/// H on edges, J on faces.
#[derive(Debug, Clone, Copy, Default)]
pub struct HjFormulation;

impl Formulation for HjFormulation {
    fn kind(&self) -> FormulationKind {
        FormulationKind::Hj
    }

    fn magnetic_field_type(&self) -> FieldType {
        FieldType::H
    }

    fn potential_len(&self, mesh: &dyn Mesh) -> usize {
        mesh.n_faces()
    }

    fn potential_grids<'m>(&self, mesh: &'m dyn Mesh) -> Vec<(Axis, &'m [Point3<f64>])> {
        sampling_grids(mesh, move |axis| mesh.face_grid(axis))
    }

    fn curl_potential(&self, mesh: &dyn Mesh, a: &DVector<f64>) -> Result<DVector<f64>> {
        Ok(mesh.edge_curl().tr_mul_vec(a)?)
    }

    fn inductive_injection(
        &self,
        mesh: &dyn Mesh,
        b: &DVector<f64>,
        mu: f64,
    ) -> Result<DVector<f64>> {
        Ok(mesh.edge_curl().mul_vec(&(b / mu))?)
    }

    fn magnetostatic_operator(&self, _simulation: &dyn Simulation) -> Result<SparseMatrix> {
        Err(Error::NotSupported(
            "magnetostatic correction of permeable models in the HJ formulation".to_string(),
        ))
    }

    fn injection_len(&self, mesh: &dyn Mesh) -> usize {
        mesh.n_faces()
    }

    fn galvanic_injection(&self, mesh: &dyn Mesh, path: &[Point3<f64>]) -> Result<Field> {
        Ok(mesh.line_through_faces(path, true)?)
    }

    fn dc_source(&self, mesh: &dyn Mesh, q: &Field) -> Result<DVector<f64>> {
        let div_q = mesh.face_div().mul_field(q)?.into_dense(mesh.n_cells());
        Ok(div_q.component_mul(mesh.cell_volumes()))
    }

    fn dc_source_transpose(&self, mesh: &dyn Mesh, phi: &DVector<f64>) -> Result<DVector<f64>> {
        let scaled = phi.component_mul(mesh.cell_volumes());
        Ok(mesh.face_div().tr_mul_vec(&scaled)?)
    }

    fn ammr(&self, simulation: &dyn Simulation) -> Result<SparseMatrix> {
        let mesh = simulation.mesh();
        let curl = mesh.edge_curl();
        let div = mesh.face_div();

        let curl_curl = curl
            .matmul(simulation.me_mu_i())?
            .matmul(&curl.transpose()?)?;
        let stabilization = simulation
            .permeability()
            .zip_map(mesh.cell_volumes(), |mu, vol| 1.0 / (vol * mu));
        let grad_div = div.transpose()?.matmul(&div.scale_rows(&stabilization)?)?;

        Ok(curl_curl.sub(&grad_div)?)
    }

    fn resolves(&self, quantity: InitialQuantity) -> bool {
        !matches!(quantity, InitialQuantity::E)
    }
}
