//! The contract shared by every source.
//!
//! A source contributes a magnetic source term `s_m` and an electric source
//! term `s_e` at every time, and possibly initial fields at t = 0. Every
//! quantity defaults to [`Field::Zero`], so a source type only overrides what
//! it physically produces.

use std::fmt;

use nalgebra::DVector;
use tdem_core::{Field, MeshId};
use tdem_waveforms::Waveform;

use crate::error::Result;
use crate::formulation::FormulationKind;
use crate::simulation::Simulation;

/// Physical family of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceType {
    Inductive,
    Galvanic,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceType::Inductive => write!(f, "inductive"),
            SourceType::Galvanic => write!(f, "galvanic"),
        }
    }
}

/// A time-domain EM source.
///
/// Methods take `&mut self` because results are cached on the source. A
/// single source must not be evaluated from two threads at once; distinct
/// sources may be evaluated concurrently against one simulation.
///
/// Derivatives are with respect to the simulation's model. In forward mode
/// `v` is a model-space vector and the result lives where the quantity
/// lives; in adjoint mode it is the other way around.
pub trait Source: Send {
    fn source_type(&self) -> SourceType;

    fn waveform(&self) -> &Waveform;

    fn b_initial(&mut self, _simulation: &dyn Simulation) -> Result<Field> {
        Ok(Field::Zero)
    }

    fn e_initial(&mut self, _simulation: &dyn Simulation) -> Result<Field> {
        Ok(Field::Zero)
    }

    fn h_initial(&mut self, _simulation: &dyn Simulation) -> Result<Field> {
        Ok(Field::Zero)
    }

    fn j_initial(&mut self, _simulation: &dyn Simulation) -> Result<Field> {
        Ok(Field::Zero)
    }

    fn b_initial_deriv(
        &mut self,
        _simulation: &dyn Simulation,
        _v: &DVector<f64>,
        _adjoint: bool,
    ) -> Result<Field> {
        Ok(Field::Zero)
    }

    fn e_initial_deriv(
        &mut self,
        _simulation: &dyn Simulation,
        _v: &DVector<f64>,
        _adjoint: bool,
    ) -> Result<Field> {
        Ok(Field::Zero)
    }

    fn h_initial_deriv(
        &mut self,
        _simulation: &dyn Simulation,
        _v: &DVector<f64>,
        _adjoint: bool,
    ) -> Result<Field> {
        Ok(Field::Zero)
    }

    fn j_initial_deriv(
        &mut self,
        _simulation: &dyn Simulation,
        _v: &DVector<f64>,
        _adjoint: bool,
    ) -> Result<Field> {
        Ok(Field::Zero)
    }

    /// Magnetic source term at `time`.
    fn s_m(&mut self, _simulation: &dyn Simulation, _time: f64) -> Result<Field> {
        Ok(Field::Zero)
    }

    /// Electric source term at `time`.
    fn s_e(&mut self, _simulation: &dyn Simulation, _time: f64) -> Result<Field> {
        Ok(Field::Zero)
    }

    fn s_m_deriv(
        &mut self,
        _simulation: &dyn Simulation,
        _time: f64,
        _v: &DVector<f64>,
        _adjoint: bool,
    ) -> Result<Field> {
        Ok(Field::Zero)
    }

    fn s_e_deriv(
        &mut self,
        _simulation: &dyn Simulation,
        _time: f64,
        _v: &DVector<f64>,
        _adjoint: bool,
    ) -> Result<Field> {
        Ok(Field::Zero)
    }

    /// `(s_m, s_e)` at `time`.
    fn eval(&mut self, simulation: &dyn Simulation, time: f64) -> Result<(Field, Field)> {
        let s_m = self.s_m(simulation, time)?;
        let s_e = self.s_e(simulation, time)?;
        log::trace!("{} source evaluated at t = {time:e}", self.source_type());
        Ok((s_m, s_e))
    }

    /// Derivatives of `(s_m, s_e)` at `time` applied to `v`.
    fn eval_deriv(
        &mut self,
        simulation: &dyn Simulation,
        time: f64,
        v: &DVector<f64>,
        adjoint: bool,
    ) -> Result<(Field, Field)> {
        let s_m = self.s_m_deriv(simulation, time, v, adjoint)?;
        let s_e = self.s_e_deriv(simulation, time, v, adjoint)?;
        Ok((s_m, s_e))
    }

    /// Drop every cached value.
    fn invalidate(&mut self) {}
}

impl<'s> dyn Source + 's {
    /// Derivatives of `(s_m, s_e)` at `time` as a reusable operator.
    ///
    /// Available on trait objects so that heterogeneous survey lists can be
    /// walked; concrete sources use [`SourceDerivative::new`].
    pub fn deriv_operator<'a>(
        &'a mut self,
        simulation: &'a dyn Simulation,
        time: f64,
        adjoint: bool,
    ) -> SourceDerivative<'a> {
        SourceDerivative::new(self, simulation, time, adjoint)
    }
}

/// The source-term derivatives of one source at one time, applied lazily.
pub struct SourceDerivative<'a> {
    source: &'a mut dyn Source,
    simulation: &'a dyn Simulation,
    time: f64,
    adjoint: bool,
}

impl<'a> SourceDerivative<'a> {
    pub fn new(
        source: &'a mut dyn Source,
        simulation: &'a dyn Simulation,
        time: f64,
        adjoint: bool,
    ) -> Self {
        Self {
            source,
            simulation,
            time,
            adjoint,
        }
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn is_adjoint(&self) -> bool {
        self.adjoint
    }

    /// `(s_m', s_e')` applied to `v`.
    pub fn apply(&mut self, v: &DVector<f64>) -> Result<(Field, Field)> {
        self.source
            .eval_deriv(self.simulation, self.time, v, self.adjoint)
    }

    pub fn s_m(&mut self, v: &DVector<f64>) -> Result<Field> {
        self.source
            .s_m_deriv(self.simulation, self.time, v, self.adjoint)
    }

    pub fn s_e(&mut self, v: &DVector<f64>) -> Result<Field> {
        self.source
            .s_e_deriv(self.simulation, self.time, v, self.adjoint)
    }
}

/// Identity of the mesh and formulation cached values were computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub mesh: MeshId,
    pub formulation: FormulationKind,
}

impl CacheKey {
    pub fn of(simulation: &dyn Simulation) -> Self {
        Self {
            mesh: simulation.mesh().id(),
            formulation: simulation.formulation_kind(),
        }
    }
}

/// Two-tier cache of values derived from a simulation.
///
/// `G` holds values that depend only on the mesh and formulation; `M` holds
/// values that also depend on the physical properties and is dropped
/// whenever the simulation's model revision changes. Binding to a
/// simulation with a different [`CacheKey`] drops both.
#[derive(Debug, Default)]
pub(crate) struct SourceCache<G, M> {
    key: Option<CacheKey>,
    revision: Option<u64>,
    geometry: G,
    model: M,
}

impl<G: Default, M: Default> SourceCache<G, M> {
    /// The cache tiers valid for `simulation`.
    pub(crate) fn bind(&mut self, simulation: &dyn Simulation) -> (&mut G, &mut M) {
        let key = CacheKey::of(simulation);
        if self.key != Some(key) {
            if self.key.is_some() {
                log::debug!("source rebound to {key:?}, dropping cached values");
            }
            self.key = Some(key);
            self.revision = None;
            self.geometry = G::default();
        }

        let revision = simulation.model_revision();
        if self.revision != Some(revision) {
            if self.revision.is_some() {
                log::debug!("model revision {revision}, dropping model-dependent values");
            }
            self.revision = Some(revision);
            self.model = M::default();
        }

        (&mut self.geometry, &mut self.model)
    }

    pub(crate) fn clear(&mut self) {
        *self = Self {
            key: None,
            revision: None,
            geometry: G::default(),
            model: M::default(),
        };
    }
}
