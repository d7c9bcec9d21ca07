//! Grounded transmitters: wires along a polyline and raw injections.
//!
//! A grounded source starts from a steady state. Its initial fields follow
//! from the DC potential `phi = Adc⁻¹·Q·q` of the injected current `q`:
//! - EB: `e = −G·phi`
//! - HJ: `j = −MfRhoI·Qᵀ·phi`, then the magnetostatic vector potential
//!   `a = Ammr⁻¹·(s_e(0) − j)`, `b = Cᵀ·a` and `h = MeMuI·b`
//!
//! Every derivative is the exact transpose of its forward map in adjoint
//! mode. `Adc` and `Ammr` are symmetric, so both modes share one
//! factorization of each.

use std::fmt;

use nalgebra::{DVector, Point3};
use tdem_core::Field;
use tdem_solver::Factorization;
use tdem_waveforms::Waveform;

use crate::error::{Error, Result};
use crate::formulation::InitialQuantity;
use crate::simulation::Simulation;
use crate::source::{Source, SourceCache, SourceType};

/// Parameters of a grounded wire.
#[derive(Debug, Clone)]
pub struct LineCurrentParams {
    /// Wire vertices; current flows from the first point to the last.
    pub path: Vec<Point3<f64>>,
    /// (A)
    pub current: f64,
    pub waveform: Waveform,
}

impl LineCurrentParams {
    pub fn new(path: Vec<Point3<f64>>) -> Self {
        Self {
            path,
            current: 1.0,
            waveform: Waveform::step_off(),
        }
    }

    pub fn with_current(mut self, current: f64) -> Self {
        self.current = current;
        self
    }

    pub fn with_waveform(mut self, waveform: Waveform) -> Self {
        self.waveform = waveform;
        self
    }
}

#[derive(Debug, Clone)]
enum Injection {
    Line { path: Vec<Point3<f64>>, current: f64 },
    Raw(DVector<f64>),
}

#[derive(Debug, Default)]
struct GeometryCache {
    /// Injection of a unit current along the path.
    unit_injection: Option<Field>,
}

#[derive(Default)]
struct ModelCache {
    phi: Option<DVector<f64>>,
    ammr: Option<Box<dyn Factorization>>,
    a: Option<DVector<f64>>,
}

impl fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelCache")
            .field("phi", &self.phi.as_ref().map(|v| v.len()))
            .field("ammr", &self.ammr.as_ref().map(|s| s.dim()))
            .field("a", &self.a.as_ref().map(|v| v.len()))
            .finish()
    }
}

/// A grounded line current or a raw current injection.
#[derive(Debug)]
pub struct GalvanicSource {
    injection: Injection,
    waveform: Waveform,
    cache: SourceCache<GeometryCache, ModelCache>,
}

impl GalvanicSource {
    /// A wire carrying `current` along `path`.
    ///
    /// # Errors
    /// `InvalidConfiguration` for fewer than two points, a non-finite point
    /// or a non-finite current.
    pub fn line_current(params: LineCurrentParams) -> Result<Self> {
        if params.path.len() < 2 {
            return Err(Error::InvalidConfiguration(format!(
                "a line current needs at least two points, got {}",
                params.path.len()
            )));
        }
        if let Some(p) = params.path.iter().find(|p| !p.iter().all(|c| c.is_finite())) {
            return Err(Error::InvalidConfiguration(format!(
                "path points must be finite, got {p:?}"
            )));
        }
        if !params.current.is_finite() {
            return Err(Error::InvalidConfiguration(format!(
                "current must be finite, got {}",
                params.current
            )));
        }
        Ok(Self {
            injection: Injection::Line {
                path: params.path,
                current: params.current,
            },
            waveform: params.waveform,
            cache: SourceCache::default(),
        })
    }

    /// A precomputed injection on the formulation's injection grid (edges
    /// in EB, faces in HJ).
    ///
    /// # Errors
    /// `InvalidConfiguration` for an empty or non-finite vector.
    pub fn raw_vec_grounded(injection: DVector<f64>, waveform: Waveform) -> Result<Self> {
        if injection.is_empty() {
            return Err(Error::InvalidConfiguration(
                "raw injection must not be empty".to_string(),
            ));
        }
        if injection.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidConfiguration(
                "raw injection must be finite".to_string(),
            ));
        }
        Ok(Self {
            injection: Injection::Raw(injection),
            waveform,
            cache: SourceCache::default(),
        })
    }

    /// Wire vertices; `None` for a raw injection.
    pub fn path(&self) -> Option<&[Point3<f64>]> {
        match &self.injection {
            Injection::Line { path, .. } => Some(path),
            Injection::Raw(_) => None,
        }
    }

    /// Wire current; raw injections carry their amplitude in the vector.
    pub fn current(&self) -> f64 {
        match &self.injection {
            Injection::Line { current, .. } => *current,
            Injection::Raw(_) => 1.0,
        }
    }

    /// The injected current on the formulation's injection grid.
    pub fn discretized_injection(&mut self, simulation: &dyn Simulation) -> Result<Field> {
        let formulation = simulation.formulation();
        let mesh = simulation.mesh();
        match &self.injection {
            Injection::Raw(q) => {
                let expected = formulation.injection_len(mesh);
                if q.len() != expected {
                    return Err(Error::Core(tdem_core::Error::DimensionMismatch {
                        expected,
                        actual: q.len(),
                    }));
                }
                Ok(Field::Dense(q.clone()))
            }
            Injection::Line { path, current } => {
                let (geometry, _) = self.cache.bind(simulation);
                let unit = match &geometry.unit_injection {
                    Some(q) => q.clone(),
                    None => {
                        let q = formulation.galvanic_injection(mesh, path)?;
                        log::debug!(
                            "discretized {}-point line current ({} formulation)",
                            path.len(),
                            formulation.kind()
                        );
                        geometry.unit_injection = Some(q.clone());
                        q
                    }
                };
                Ok(unit * *current)
            }
        }
    }

    /// `Q·q`, the right-hand side of the DC problem.
    pub fn dc_rhs(&mut self, simulation: &dyn Simulation) -> Result<DVector<f64>> {
        let q = self.discretized_injection(simulation)?;
        simulation.formulation().dc_source(simulation.mesh(), &q)
    }

    /// Initial DC potential; zero without initial fields.
    pub fn phi_initial(&mut self, simulation: &dyn Simulation) -> Result<Field> {
        if !self.active(simulation, InitialQuantity::Phi)? {
            return Ok(Field::Zero);
        }
        Ok(Field::Dense(self.phi(simulation)?))
    }

    pub fn phi_initial_deriv(
        &mut self,
        simulation: &dyn Simulation,
        v: &DVector<f64>,
        adjoint: bool,
    ) -> Result<Field> {
        if !self.active(simulation, InitialQuantity::Phi)? {
            return Ok(Field::Zero);
        }
        Ok(Field::Dense(self.phi_deriv(simulation, v, adjoint)?))
    }

    /// Initial magnetostatic vector potential on faces (HJ only).
    pub fn a_initial(&mut self, simulation: &dyn Simulation) -> Result<Field> {
        if !self.active(simulation, InitialQuantity::A)? {
            return Ok(Field::Zero);
        }
        Ok(Field::Dense(self.a(simulation)?))
    }

    pub fn a_initial_deriv(
        &mut self,
        simulation: &dyn Simulation,
        v: &DVector<f64>,
        adjoint: bool,
    ) -> Result<Field> {
        if !self.active(simulation, InitialQuantity::A)? {
            return Ok(Field::Zero);
        }
        Ok(Field::Dense(self.a_deriv(simulation, v, adjoint)?))
    }

    /// Whether `quantity` has to be computed. Without initial fields nothing
    /// is, whatever the formulation. A raw injection carries no geometry to
    /// build a steady state from, so its initial fields are unsupported.
    fn active(&self, simulation: &dyn Simulation, quantity: InitialQuantity) -> Result<bool> {
        if !self.waveform.has_initial_fields() {
            return Ok(false);
        }
        if let Injection::Raw(_) = self.injection {
            return Err(Error::NotSupported(format!(
                "initial {quantity:?} of a raw injection"
            )));
        }
        simulation.formulation().check_galvanic(quantity)?;
        Ok(true)
    }

    fn phi(&mut self, simulation: &dyn Simulation) -> Result<DVector<f64>> {
        if let Some(phi) = &self.cache.bind(simulation).1.phi {
            return Ok(phi.clone());
        }
        let rhs = self.dc_rhs(simulation)?;
        let phi = simulation.dc_solve(&rhs)?;
        self.cache.bind(simulation).1.phi = Some(phi.clone());
        Ok(phi)
    }

    /// `dphi = −Adc⁻¹·(dAdc/dm·phi)·v`.
    fn phi_deriv(
        &mut self,
        simulation: &dyn Simulation,
        v: &DVector<f64>,
        adjoint: bool,
    ) -> Result<DVector<f64>> {
        let phi = self.phi(simulation)?;
        if adjoint {
            let w = simulation.dc_solve(v)?;
            Ok(-simulation.dc_operator_deriv(&phi, &w, true)?)
        } else {
            let w = simulation.dc_operator_deriv(&phi, v, false)?;
            Ok(-simulation.dc_solve(&w)?)
        }
    }

    fn e(&mut self, simulation: &dyn Simulation) -> Result<DVector<f64>> {
        let phi = self.phi(simulation)?;
        Ok(-simulation.mesh().nodal_grad().mul_vec(&phi)?)
    }

    fn e_deriv(
        &mut self,
        simulation: &dyn Simulation,
        v: &DVector<f64>,
        adjoint: bool,
    ) -> Result<DVector<f64>> {
        let grad = simulation.mesh().nodal_grad();
        if adjoint {
            let w = -grad.tr_mul_vec(v)?;
            self.phi_deriv(simulation, &w, true)
        } else {
            let dphi = self.phi_deriv(simulation, v, false)?;
            Ok(-grad.mul_vec(&dphi)?)
        }
    }

    fn j(&mut self, simulation: &dyn Simulation) -> Result<DVector<f64>> {
        let phi = self.phi(simulation)?;
        let qt_phi = simulation
            .formulation()
            .dc_source_transpose(simulation.mesh(), &phi)?;
        Ok(-simulation.mf_rho_i().mul_vec(&qt_phi)?)
    }

    fn j_deriv(
        &mut self,
        simulation: &dyn Simulation,
        v: &DVector<f64>,
        adjoint: bool,
    ) -> Result<DVector<f64>> {
        let formulation = simulation.formulation();
        let mesh = simulation.mesh();
        let phi = self.phi(simulation)?;
        let qt_phi = formulation.dc_source_transpose(mesh, &phi)?;

        if adjoint {
            let direct = simulation.mf_rho_i_deriv(&qt_phi, v, true)?;
            let back = simulation.mf_rho_i().tr_mul_vec(v)?;
            let w = formulation.dc_source(mesh, &Field::Dense(back))?;
            let through_phi = self.phi_deriv(simulation, &w, true)?;
            Ok(-(direct + through_phi))
        } else {
            let direct = simulation.mf_rho_i_deriv(&qt_phi, v, false)?;
            let dphi = self.phi_deriv(simulation, v, false)?;
            let through_phi = simulation
                .mf_rho_i()
                .mul_vec(&formulation.dc_source_transpose(mesh, &dphi)?)?;
            Ok(-(direct + through_phi))
        }
    }

    /// `Ammr⁻¹·rhs`, factoring `Ammr` once per model.
    fn ammr_solve(&mut self, simulation: &dyn Simulation, rhs: &DVector<f64>) -> Result<DVector<f64>> {
        let (_, model) = self.cache.bind(simulation);
        if model.ammr.is_none() {
            let ammr = simulation.formulation().ammr(simulation)?;
            log::debug!("factoring Ammr ({} unknowns)", ammr.nrows());
            model.ammr = Some(simulation.solver(&ammr)?);
        }
        match &model.ammr {
            Some(solver) => Ok(solver.solve(rhs)?),
            None => Err(Error::NotSupported(
                "magnetostatic vector-potential solve".to_string(),
            )),
        }
    }

    fn a(&mut self, simulation: &dyn Simulation) -> Result<DVector<f64>> {
        if let Some(a) = &self.cache.bind(simulation).1.a {
            return Ok(a.clone());
        }
        let n = simulation.formulation().injection_len(simulation.mesh());
        let s_e = self.s_e(simulation, 0.0)?.into_dense(n);
        let rhs = s_e - self.j(simulation)?;
        let a = self.ammr_solve(simulation, &rhs)?;
        self.cache.bind(simulation).1.a = Some(a.clone());
        Ok(a)
    }

    fn a_deriv(
        &mut self,
        simulation: &dyn Simulation,
        v: &DVector<f64>,
        adjoint: bool,
    ) -> Result<DVector<f64>> {
        if adjoint {
            let w = self.ammr_solve(simulation, v)?;
            Ok(-self.j_deriv(simulation, &w, true)?)
        } else {
            let dj = self.j_deriv(simulation, v, false)?;
            Ok(-self.ammr_solve(simulation, &dj)?)
        }
    }

    fn b(&mut self, simulation: &dyn Simulation) -> Result<DVector<f64>> {
        let a = self.a(simulation)?;
        Ok(simulation.mesh().edge_curl().tr_mul_vec(&a)?)
    }

    fn b_deriv(
        &mut self,
        simulation: &dyn Simulation,
        v: &DVector<f64>,
        adjoint: bool,
    ) -> Result<DVector<f64>> {
        let curl = simulation.mesh().edge_curl();
        if adjoint {
            self.a_deriv(simulation, &curl.mul_vec(v)?, true)
        } else {
            Ok(curl.tr_mul_vec(&self.a_deriv(simulation, v, false)?)?)
        }
    }

    fn h(&mut self, simulation: &dyn Simulation) -> Result<DVector<f64>> {
        let b = self.b(simulation)?;
        Ok(simulation.me_mu_i().mul_vec(&b)?)
    }

    fn h_deriv(
        &mut self,
        simulation: &dyn Simulation,
        v: &DVector<f64>,
        adjoint: bool,
    ) -> Result<DVector<f64>> {
        let me_mu_i = simulation.me_mu_i();
        if adjoint {
            self.b_deriv(simulation, &me_mu_i.tr_mul_vec(v)?, true)
        } else {
            Ok(me_mu_i.mul_vec(&self.b_deriv(simulation, v, false)?)?)
        }
    }
}

impl Source for GalvanicSource {
    fn source_type(&self) -> SourceType {
        SourceType::Galvanic
    }

    fn waveform(&self) -> &Waveform {
        &self.waveform
    }

    fn e_initial(&mut self, simulation: &dyn Simulation) -> Result<Field> {
        if !self.active(simulation, InitialQuantity::E)? {
            return Ok(Field::Zero);
        }
        Ok(Field::Dense(self.e(simulation)?))
    }

    fn j_initial(&mut self, simulation: &dyn Simulation) -> Result<Field> {
        if !self.active(simulation, InitialQuantity::J)? {
            return Ok(Field::Zero);
        }
        Ok(Field::Dense(self.j(simulation)?))
    }

    fn b_initial(&mut self, simulation: &dyn Simulation) -> Result<Field> {
        if !self.active(simulation, InitialQuantity::B)? {
            return Ok(Field::Zero);
        }
        Ok(Field::Dense(self.b(simulation)?))
    }

    fn h_initial(&mut self, simulation: &dyn Simulation) -> Result<Field> {
        if !self.active(simulation, InitialQuantity::H)? {
            return Ok(Field::Zero);
        }
        Ok(Field::Dense(self.h(simulation)?))
    }

    fn e_initial_deriv(
        &mut self,
        simulation: &dyn Simulation,
        v: &DVector<f64>,
        adjoint: bool,
    ) -> Result<Field> {
        if !self.active(simulation, InitialQuantity::E)? {
            return Ok(Field::Zero);
        }
        Ok(Field::Dense(self.e_deriv(simulation, v, adjoint)?))
    }

    fn j_initial_deriv(
        &mut self,
        simulation: &dyn Simulation,
        v: &DVector<f64>,
        adjoint: bool,
    ) -> Result<Field> {
        if !self.active(simulation, InitialQuantity::J)? {
            return Ok(Field::Zero);
        }
        Ok(Field::Dense(self.j_deriv(simulation, v, adjoint)?))
    }

    fn b_initial_deriv(
        &mut self,
        simulation: &dyn Simulation,
        v: &DVector<f64>,
        adjoint: bool,
    ) -> Result<Field> {
        if !self.active(simulation, InitialQuantity::B)? {
            return Ok(Field::Zero);
        }
        Ok(Field::Dense(self.b_deriv(simulation, v, adjoint)?))
    }

    fn h_initial_deriv(
        &mut self,
        simulation: &dyn Simulation,
        v: &DVector<f64>,
        adjoint: bool,
    ) -> Result<Field> {
        if !self.active(simulation, InitialQuantity::H)? {
            return Ok(Field::Zero);
        }
        Ok(Field::Dense(self.h_deriv(simulation, v, adjoint)?))
    }

    fn s_e(&mut self, simulation: &dyn Simulation, time: f64) -> Result<Field> {
        let amplitude = self.waveform.eval(time);
        log::trace!("galvanic s_e at t = {time:e}, amplitude {amplitude}");
        Ok(self.discretized_injection(simulation)? * amplitude)
    }

    fn invalidate(&mut self) {
        self.cache.clear();
    }
}
