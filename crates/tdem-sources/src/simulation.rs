//! The simulation a source is evaluated against.
//!
//! Sources only read from a simulation: its mesh, formulation, time steps,
//! physical properties and the auxiliary solves built from them. The
//! [`Simulation`] trait is that read surface; [`TensorSimulation`] is a
//! reference implementation on a [`TensorMesh`] with the model taken to be
//! cell conductivity.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use nalgebra::DVector;
use tdem_core::{Field, MU_0, Mesh, SparseMatrix};
use tdem_mesh::TensorMesh;
use tdem_solver::{Factorization, SolverConfig};

use crate::error::{Error, Result};
use crate::formulation::{FieldType, Formulation, FormulationKind};

/// Read access to a time-domain simulation.
///
/// Derivatives are taken with respect to the simulation's model vector (one
/// value per cell). Forward-mode derivative methods take a model-space
/// vector; adjoint-mode methods take a vector of the output's space and
/// return a model-space vector.
pub trait Simulation: Send + Sync {
    fn mesh(&self) -> &dyn Mesh;

    fn formulation_kind(&self) -> FormulationKind;

    fn formulation(&self) -> &'static dyn Formulation {
        self.formulation_kind().strategy()
    }

    fn field_type(&self) -> FieldType;

    /// Durations of the time steps.
    fn time_steps(&self) -> &[f64];

    /// Changes whenever a physical property changes. Unique across
    /// simulations, so it also distinguishes two simulations sharing a mesh.
    fn model_revision(&self) -> u64;

    /// Cell magnetic permeability.
    fn permeability(&self) -> &DVector<f64>;

    /// Inverse face inner product of 1/μ.
    fn mf_mui_i(&self) -> &SparseMatrix;

    /// Inverse edge inner product of μ.
    fn me_mu_i(&self) -> &SparseMatrix;

    /// Inverse face inner product of resistivity.
    fn mf_rho_i(&self) -> &SparseMatrix;

    /// Derivative of `MfRhoI·u` with respect to the model, applied to `v`.
    fn mf_rho_i_deriv(
        &self,
        u: &DVector<f64>,
        v: &DVector<f64>,
        adjoint: bool,
    ) -> Result<DVector<f64>>;

    /// `Adc⁻¹·rhs` for the DC operator of this formulation.
    fn dc_solve(&self, rhs: &DVector<f64>) -> Result<DVector<f64>>;

    /// Derivative of `Adc·phi` with respect to the model, applied to `v`.
    fn dc_operator_deriv(
        &self,
        phi: &DVector<f64>,
        v: &DVector<f64>,
        adjoint: bool,
    ) -> Result<DVector<f64>>;

    /// Prepare a solver for an auxiliary system.
    fn solver(&self, matrix: &SparseMatrix) -> Result<Box<dyn Factorization>>;
}

fn next_revision() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

fn check_property(name: &str, values: &DVector<f64>, n_cells: usize) -> Result<()> {
    if values.len() != n_cells {
        return Err(Error::Core(tdem_core::Error::DimensionMismatch {
            expected: n_cells,
            actual: values.len(),
        }));
    }
    if let Some((index, &value)) = values
        .iter()
        .enumerate()
        .find(|&(_, &v)| !(v.is_finite() && v > 0.0))
    {
        log::debug!("rejecting {name}: cell {index} has value {value}");
        return Err(Error::Core(tdem_core::Error::InvalidProperty { index, value }));
    }
    Ok(())
}

fn check_len(expected: usize, v: &DVector<f64>) -> Result<()> {
    if v.len() != expected {
        return Err(Error::Core(tdem_core::Error::DimensionMismatch {
            expected,
            actual: v.len(),
        }));
    }
    Ok(())
}

/// Property-dependent operators, rebuilt whenever σ or μ changes.
#[derive(Debug, Clone)]
struct Model {
    revision: u64,
    sigma: DVector<f64>,
    mu: DVector<f64>,
    mf_mui_i: SparseMatrix,
    me_mu_i: SparseMatrix,
    mf_rho_i: SparseMatrix,
    /// `P_f·(1/σ)`, the face resistivities before inversion.
    face_rho: DVector<f64>,
    adc: SparseMatrix,
}

impl Model {
    fn assemble(
        mesh: &TensorMesh,
        kind: FormulationKind,
        sigma: DVector<f64>,
        mu: DVector<f64>,
    ) -> Result<Self> {
        let n = mesh.n_cells();
        check_property("conductivity", &sigma, n)?;
        check_property("permeability", &mu, n)?;

        let rho = sigma.map(|s| 1.0 / s);
        let mui = mu.map(|m| 1.0 / m);
        let mf_mui_i = mesh.face_inner_product(&mui, true)?;
        let me_mu_i = mesh.edge_inner_product(&mu, true)?;
        let mf_rho_i = mesh.face_inner_product(&rho, true)?;
        let face_rho = mesh.face_weights().mul_vec(&rho)?;

        let adc = match kind {
            FormulationKind::Eb => {
                let grad = mesh.nodal_grad();
                let me_sigma = mesh.edge_weights().mul_vec(&sigma)?;
                let laplacian = grad.transpose()?.matmul(&grad.scale_rows(&me_sigma)?)?;
                // Pin the first node to remove the constant null space
                let pin = SparseMatrix::from_triplets(mesh.n_nodes(), mesh.n_nodes(), &[(0, 0, 1.0)])?;
                laplacian.add(&pin)?
            }
            FormulationKind::Hj => {
                let q = mesh.face_div().scale_rows(mesh.cell_volumes())?;
                q.matmul(&mf_rho_i)?.matmul(&q.transpose()?)?
            }
        };

        Ok(Self {
            revision: next_revision(),
            sigma,
            mu,
            mf_mui_i,
            me_mu_i,
            mf_rho_i,
            face_rho,
            adc,
        })
    }
}

/// Builder for [`TensorSimulation`].
#[derive(Debug, Clone)]
pub struct TensorSimulationBuilder {
    mesh: Arc<TensorMesh>,
    formulation: FormulationKind,
    field_type: Option<FieldType>,
    time_steps: Vec<f64>,
    conductivity: Option<DVector<f64>>,
    permeability: Option<DVector<f64>>,
    solver: SolverConfig,
}

impl TensorSimulationBuilder {
    pub fn with_formulation(mut self, formulation: FormulationKind) -> Self {
        self.formulation = formulation;
        self
    }

    /// Defaults to the formulation's magnetic field type.
    pub fn with_field_type(mut self, field_type: FieldType) -> Self {
        self.field_type = Some(field_type);
        self
    }

    pub fn with_time_steps(mut self, time_steps: Vec<f64>) -> Self {
        self.time_steps = time_steps;
        self
    }

    pub fn with_conductivity(mut self, sigma: DVector<f64>) -> Self {
        self.conductivity = Some(sigma);
        self
    }

    pub fn with_uniform_conductivity(mut self, sigma: f64) -> Self {
        self.conductivity = Some(DVector::from_element(self.mesh.n_cells(), sigma));
        self
    }

    pub fn with_permeability(mut self, mu: DVector<f64>) -> Self {
        self.permeability = Some(mu);
        self
    }

    pub fn with_uniform_permeability(mut self, mu: f64) -> Self {
        self.permeability = Some(DVector::from_element(self.mesh.n_cells(), mu));
        self
    }

    pub fn with_solver_config(mut self, config: SolverConfig) -> Self {
        self.solver = config;
        self
    }

    /// Validate the configuration and assemble the property operators.
    ///
    /// # Errors
    /// `InvalidConfiguration` for a field type outside the formulation or a
    /// non-positive time step; a core error for a property of the wrong
    /// length or with a non-positive value.
    pub fn build(self) -> Result<TensorSimulation> {
        let kind = self.formulation;
        let field_type = self
            .field_type
            .unwrap_or_else(|| kind.strategy().magnetic_field_type());
        if !kind.supports(field_type) {
            return Err(Error::InvalidConfiguration(format!(
                "field type {field_type} is not solved for by the {kind} formulation"
            )));
        }
        if let Some(dt) = self.time_steps.iter().find(|dt| !(dt.is_finite() && **dt > 0.0)) {
            return Err(Error::InvalidConfiguration(format!(
                "time steps must be positive and finite, got {dt}"
            )));
        }

        let n = self.mesh.n_cells();
        let sigma = self
            .conductivity
            .unwrap_or_else(|| DVector::from_element(n, TensorSimulation::DEFAULT_CONDUCTIVITY));
        let mu = self
            .permeability
            .unwrap_or_else(|| DVector::from_element(n, MU_0));
        let model = Model::assemble(&self.mesh, kind, sigma, mu)?;

        log::debug!(
            "built {kind} simulation ({field_type}) on {n} cells, {} time steps",
            self.time_steps.len()
        );

        Ok(TensorSimulation {
            mesh: self.mesh,
            formulation: kind,
            field_type,
            time_steps: self.time_steps,
            solver: self.solver,
            model,
            dc: RwLock::new(None),
            factorizations: AtomicUsize::new(0),
        })
    }
}

/// A simulation on a tensor mesh with cell conductivity as its model.
///
/// The DC factorization is built on first use and shared by every source
/// evaluated against this simulation until a property changes.
pub struct TensorSimulation {
    mesh: Arc<TensorMesh>,
    formulation: FormulationKind,
    field_type: FieldType,
    time_steps: Vec<f64>,
    solver: SolverConfig,
    model: Model,
    dc: RwLock<Option<Arc<dyn Factorization>>>,
    factorizations: AtomicUsize,
}

impl fmt::Debug for TensorSimulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TensorSimulation")
            .field("formulation", &self.formulation)
            .field("field_type", &self.field_type)
            .field("n_cells", &self.mesh.n_cells())
            .field("time_steps", &self.time_steps.len())
            .field("revision", &self.model.revision)
            .finish()
    }
}

impl TensorSimulation {
    /// (S/m) Conductivity used when none is given.
    pub const DEFAULT_CONDUCTIVITY: f64 = 1e-2;

    /// Start building an EB simulation on `mesh` in a uniform half-space of
    /// default conductivity and free-space permeability.
    pub fn builder(mesh: Arc<TensorMesh>) -> TensorSimulationBuilder {
        TensorSimulationBuilder {
            mesh,
            formulation: FormulationKind::Eb,
            field_type: None,
            time_steps: Vec::new(),
            conductivity: None,
            permeability: None,
            solver: SolverConfig::default(),
        }
    }

    pub fn tensor_mesh(&self) -> &Arc<TensorMesh> {
        &self.mesh
    }

    pub fn conductivity(&self) -> &DVector<f64> {
        &self.model.sigma
    }

    /// Replace the conductivity model, dropping the DC factorization.
    pub fn set_conductivity(&mut self, sigma: DVector<f64>) -> Result<()> {
        let mu = self.model.mu.clone();
        self.reassemble(sigma, mu)
    }

    /// Replace the permeability model, dropping the DC factorization.
    pub fn set_permeability(&mut self, mu: DVector<f64>) -> Result<()> {
        let sigma = self.model.sigma.clone();
        self.reassemble(sigma, mu)
    }

    fn reassemble(&mut self, sigma: DVector<f64>, mu: DVector<f64>) -> Result<()> {
        self.model = Model::assemble(&self.mesh, self.formulation, sigma, mu)?;
        *self.dc.get_mut().unwrap_or_else(PoisonError::into_inner) = None;
        log::debug!("model changed, now at revision {}", self.model.revision);
        Ok(())
    }

    /// Number of auxiliary systems factored so far.
    pub fn factorization_count(&self) -> usize {
        self.factorizations.load(Ordering::Relaxed)
    }

    /// The DC operator of the current model.
    pub fn dc_operator(&self) -> &SparseMatrix {
        &self.model.adc
    }

    fn dc_factorization(&self) -> Result<Arc<dyn Factorization>> {
        if let Some(f) = self.dc.read().unwrap_or_else(PoisonError::into_inner).as_ref() {
            return Ok(Arc::clone(f));
        }

        let mut slot = self.dc.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(f) = slot.as_ref() {
            return Ok(Arc::clone(f));
        }
        let f: Arc<dyn Factorization> = Arc::from(self.solver(&self.model.adc)?);
        *slot = Some(Arc::clone(&f));
        Ok(f)
    }
}

impl Simulation for TensorSimulation {
    fn mesh(&self) -> &dyn Mesh {
        self.mesh.as_ref()
    }

    fn formulation_kind(&self) -> FormulationKind {
        self.formulation
    }

    fn field_type(&self) -> FieldType {
        self.field_type
    }

    fn time_steps(&self) -> &[f64] {
        &self.time_steps
    }

    fn model_revision(&self) -> u64 {
        self.model.revision
    }

    fn permeability(&self) -> &DVector<f64> {
        &self.model.mu
    }

    fn mf_mui_i(&self) -> &SparseMatrix {
        &self.model.mf_mui_i
    }

    fn me_mu_i(&self) -> &SparseMatrix {
        &self.model.me_mu_i
    }

    fn mf_rho_i(&self) -> &SparseMatrix {
        &self.model.mf_rho_i
    }

    /// `MfRhoI·u = u / (P_f·σ⁻¹)`, so its derivative is
    /// `diag(u/d²)·P_f·diag(σ⁻²)` with `d = P_f·σ⁻¹`.
    fn mf_rho_i_deriv(
        &self,
        u: &DVector<f64>,
        v: &DVector<f64>,
        adjoint: bool,
    ) -> Result<DVector<f64>> {
        let weights = self.mesh.face_weights();
        let d = &self.model.face_rho;
        check_len(d.len(), u)?;

        let w = u.zip_map(d, |u, d| u / (d * d));
        let inv_sigma_sq = self.model.sigma.map(|s| 1.0 / (s * s));
        if adjoint {
            check_len(d.len(), v)?;
            Ok(weights
                .tr_mul_vec(&w.component_mul(v))?
                .component_mul(&inv_sigma_sq))
        } else {
            check_len(inv_sigma_sq.len(), v)?;
            Ok(weights
                .mul_vec(&v.component_mul(&inv_sigma_sq))?
                .component_mul(&w))
        }
    }

    fn dc_solve(&self, rhs: &DVector<f64>) -> Result<DVector<f64>> {
        let f = self.dc_factorization()?;
        Ok(f.solve(rhs)?)
    }

    fn dc_operator_deriv(
        &self,
        phi: &DVector<f64>,
        v: &DVector<f64>,
        adjoint: bool,
    ) -> Result<DVector<f64>> {
        let mesh: &dyn Mesh = self.mesh.as_ref();
        match self.formulation {
            FormulationKind::Eb => {
                // Adc·phi = Gᵀ·diag(P_e·σ)·G·phi
                let grad = mesh.nodal_grad();
                let weights = self.mesh.edge_weights();
                let grad_phi = grad.mul_vec(phi)?;
                if adjoint {
                    let g_w = grad.mul_vec(v)?;
                    Ok(weights.tr_mul_vec(&grad_phi.component_mul(&g_w))?)
                } else {
                    check_len(self.model.sigma.len(), v)?;
                    let me_v = weights.mul_vec(v)?;
                    Ok(grad.tr_mul_vec(&grad_phi.component_mul(&me_v))?)
                }
            }
            FormulationKind::Hj => {
                // Adc·phi = Q·MfRhoI·Qᵀ·phi
                let formulation = self.formulation();
                let qt_phi = formulation.dc_source_transpose(mesh, phi)?;
                if adjoint {
                    let qt_v = formulation.dc_source_transpose(mesh, v)?;
                    self.mf_rho_i_deriv(&qt_phi, &qt_v, true)
                } else {
                    let d = self.mf_rho_i_deriv(&qt_phi, v, false)?;
                    formulation.dc_source(mesh, &Field::Dense(d))
                }
            }
        }
    }

    fn solver(&self, matrix: &SparseMatrix) -> Result<Box<dyn Factorization>> {
        let f = tdem_solver::factor(matrix, &self.solver)?;
        let count = self.factorizations.fetch_add(1, Ordering::Relaxed) + 1;
        log::debug!(
            "factorization #{count}: {}x{} auxiliary system",
            matrix.nrows(),
            matrix.ncols()
        );
        Ok(f)
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::Point3;

    use super::*;

    fn mesh() -> Arc<TensorMesh> {
        Arc::new(
            TensorMesh::new(
                vec![2.0, 1.0, 1.0, 2.0],
                vec![1.5, 1.0, 1.5],
                vec![2.0, 1.0, 1.0],
                Point3::new(-3.0, -2.0, -4.0),
            )
            .unwrap(),
        )
    }

    fn sigma(n: usize) -> DVector<f64> {
        DVector::from_fn(n, |i, _| 0.01 * (1.0 + (i % 5) as f64))
    }

    #[test]
    fn builder_defaults() {
        let sim = TensorSimulation::builder(mesh()).build().unwrap();
        assert_eq!(sim.formulation_kind(), FormulationKind::Eb);
        assert_eq!(sim.field_type(), FieldType::B);
        assert!(sim.time_steps().is_empty());
        assert!(sim.permeability().iter().all(|&m| m == MU_0));
        assert_eq!(sim.factorization_count(), 0);
    }

    #[test]
    fn builder_rejects_bad_configuration() {
        let wrong_field = TensorSimulation::builder(mesh())
            .with_field_type(FieldType::J)
            .build();
        assert!(matches!(wrong_field, Err(Error::InvalidConfiguration(_))));

        let bad_steps = TensorSimulation::builder(mesh())
            .with_time_steps(vec![1e-4, 0.0])
            .build();
        assert!(matches!(bad_steps, Err(Error::InvalidConfiguration(_))));

        let bad_sigma = TensorSimulation::builder(mesh())
            .with_uniform_conductivity(-1.0)
            .build();
        assert!(matches!(
            bad_sigma,
            Err(Error::Core(tdem_core::Error::InvalidProperty { .. }))
        ));

        let short = TensorSimulation::builder(mesh())
            .with_conductivity(DVector::from_element(3, 1.0))
            .build();
        assert!(matches!(
            short,
            Err(Error::Core(tdem_core::Error::DimensionMismatch { .. }))
        ));
    }

    #[test]
    fn revisions_are_unique_and_change_with_the_model() {
        let m = mesh();
        let mut a = TensorSimulation::builder(Arc::clone(&m)).build().unwrap();
        let b = TensorSimulation::builder(m).build().unwrap();
        assert_ne!(a.model_revision(), b.model_revision());

        let before = a.model_revision();
        a.set_conductivity(sigma(a.mesh().n_cells())).unwrap();
        assert_ne!(a.model_revision(), before);
    }

    #[test]
    fn dc_factorization_is_shared_until_the_model_changes() {
        let m = mesh();
        let n = m.n_cells();
        let mut sim = TensorSimulation::builder(m).build().unwrap();
        let rhs = DVector::from_fn(sim.mesh().n_nodes(), |i, _| (i as f64).sin());

        let x1 = sim.dc_solve(&rhs).unwrap();
        let x2 = sim.dc_solve(&rhs).unwrap();
        assert_eq!(sim.factorization_count(), 1);
        assert!((x1 - x2).norm() < 1e-14);

        let residual = sim.dc_operator().mul_vec(&sim.dc_solve(&rhs).unwrap()).unwrap() - &rhs;
        assert!(residual.norm() < 1e-9 * rhs.norm());

        sim.set_conductivity(sigma(n)).unwrap();
        sim.dc_solve(&rhs).unwrap();
        assert_eq!(sim.factorization_count(), 2);
    }

    #[test]
    fn hj_dc_operator_is_symmetric() {
        let sim = TensorSimulation::builder(mesh())
            .with_formulation(FormulationKind::Hj)
            .build()
            .unwrap();
        assert_eq!(sim.field_type(), FieldType::H);
        assert_eq!(sim.dc_operator().nrows(), sim.mesh().n_cells());
        assert!(sim.dc_operator().is_symmetric(1e-12));
    }

    /// Finite-difference check of a model derivative `f'(σ)·v`.
    fn check_fd(
        kind: FormulationKind,
        f: impl Fn(&TensorSimulation) -> DVector<f64>,
        df: impl Fn(&TensorSimulation, &DVector<f64>) -> DVector<f64>,
    ) {
        let m = mesh();
        let n = m.n_cells();
        let s0 = sigma(n);
        let v = DVector::from_fn(n, |i, _| 1e-3 * ((i * 7 % 11) as f64 - 5.0));

        let build = |s: DVector<f64>| {
            TensorSimulation::builder(Arc::clone(&m))
                .with_formulation(kind)
                .with_conductivity(s)
                .build()
                .unwrap()
        };
        let h = 1e-4;
        let plus = f(&build(&s0 + &v * h));
        let minus = f(&build(&s0 - &v * h));
        let fd = (plus - minus) / (2.0 * h);

        let analytic = df(&build(s0), &v);
        let err = (&fd - &analytic).norm();
        assert!(
            err <= 1e-6 * analytic.norm().max(1e-30),
            "derivative mismatch: |fd - analytic| = {err}, |analytic| = {}",
            analytic.norm()
        );
    }

    #[test]
    fn mf_rho_i_deriv_matches_finite_differences() {
        let u = |sim: &TensorSimulation| {
            DVector::from_fn(sim.mesh().n_faces(), |i, _| 1.0 + (i % 3) as f64)
        };
        check_fd(
            FormulationKind::Hj,
            |sim| sim.mf_rho_i().mul_vec(&u(sim)).unwrap(),
            |sim, v| sim.mf_rho_i_deriv(&u(sim), v, false).unwrap(),
        );
    }

    #[test]
    fn dc_operator_deriv_matches_finite_differences() {
        for kind in [FormulationKind::Eb, FormulationKind::Hj] {
            let phi = |sim: &TensorSimulation| {
                let n = sim.dc_operator().nrows();
                DVector::from_fn(n, |i, _| ((i as f64) * 0.37).cos())
            };
            check_fd(
                kind,
                |sim| sim.dc_operator().mul_vec(&phi(sim)).unwrap(),
                |sim, v| sim.dc_operator_deriv(&phi(sim), v, false).unwrap(),
            );
        }
    }

    #[test]
    fn derivative_adjoints_are_consistent() {
        for kind in [FormulationKind::Eb, FormulationKind::Hj] {
            let sim = TensorSimulation::builder(mesh())
                .with_formulation(kind)
                .with_conductivity(sigma(mesh().n_cells()))
                .build()
                .unwrap();
            let n = sim.mesh().n_cells();
            let rows = sim.dc_operator().nrows();
            let phi = DVector::from_fn(rows, |i, _| ((i as f64) * 0.37).cos());
            let v = DVector::from_fn(n, |i, _| (i as f64 * 0.11).sin());
            let w = DVector::from_fn(rows, |i, _| 1.0 / (1.0 + i as f64));

            let forward = sim.dc_operator_deriv(&phi, &v, false).unwrap();
            let adjoint = sim.dc_operator_deriv(&phi, &w, true).unwrap();
            let (lhs, rhs) = (w.dot(&forward), v.dot(&adjoint));
            assert!(
                (lhs - rhs).abs() <= 1e-10 * lhs.abs().max(rhs.abs()),
                "{kind}: <w, J v> = {lhs} but <J^T w, v> = {rhs}"
            );
        }
    }
}
