//! Inductive transmitters: magnetic dipoles and circular loops.
//!
//! The source flux density is the discrete curl of the analytic vector
//! potential sampled on the mesh, so it is divergence-free by construction.
//! In a uniform medium matching the source's permeability that flux is the
//! initial magnetostatic field; otherwise it is corrected by a scalar
//! potential solve.

use nalgebra::{DVector, Point3, Vector3};
use tdem_core::{Field, MU_0};
use tdem_waveforms::Waveform;

use crate::analytic::InductiveGeometry;
use crate::error::{Error, Result};
use crate::simulation::Simulation;
use crate::source::{Source, SourceCache, SourceType};

/// Parameters of a point magnetic dipole.
#[derive(Debug, Clone)]
pub struct MagDipoleParams {
    pub location: Point3<f64>,
    /// Direction of the moment; normalised on construction.
    pub orientation: Vector3<f64>,
    /// (A·m²)
    pub moment: f64,
    /// (H/m) Permeability the analytic field is computed in.
    pub mu: f64,
    pub waveform: Waveform,
}

impl Default for MagDipoleParams {
    fn default() -> Self {
        Self {
            location: Point3::origin(),
            orientation: Vector3::z(),
            moment: 1.0,
            mu: MU_0,
            waveform: Waveform::step_off(),
        }
    }
}

impl MagDipoleParams {
    pub fn with_location(mut self, location: Point3<f64>) -> Self {
        self.location = location;
        self
    }

    pub fn with_orientation(mut self, orientation: Vector3<f64>) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn with_moment(mut self, moment: f64) -> Self {
        self.moment = moment;
        self
    }

    pub fn with_mu(mut self, mu: f64) -> Self {
        self.mu = mu;
        self
    }

    pub fn with_waveform(mut self, waveform: Waveform) -> Self {
        self.waveform = waveform;
        self
    }
}

/// Parameters of a circular loop.
#[derive(Debug, Clone)]
pub struct CircularLoopParams {
    pub location: Point3<f64>,
    /// Loop normal; normalised on construction.
    pub orientation: Vector3<f64>,
    /// (m)
    pub radius: f64,
    /// (A)
    pub current: f64,
    pub turns: f64,
    /// (H/m)
    pub mu: f64,
    pub waveform: Waveform,
}

impl Default for CircularLoopParams {
    fn default() -> Self {
        Self {
            location: Point3::origin(),
            orientation: Vector3::z(),
            radius: 1.0,
            current: 1.0,
            turns: 1.0,
            mu: MU_0,
            waveform: Waveform::step_off(),
        }
    }
}

impl CircularLoopParams {
    pub fn with_location(mut self, location: Point3<f64>) -> Self {
        self.location = location;
        self
    }

    pub fn with_orientation(mut self, orientation: Vector3<f64>) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn with_radius(mut self, radius: f64) -> Self {
        self.radius = radius;
        self
    }

    pub fn with_current(mut self, current: f64) -> Self {
        self.current = current;
        self
    }

    pub fn with_turns(mut self, turns: f64) -> Self {
        self.turns = turns;
        self
    }

    pub fn with_mu(mut self, mu: f64) -> Self {
        self.mu = mu;
        self
    }

    pub fn with_waveform(mut self, waveform: Waveform) -> Self {
        self.waveform = waveform;
        self
    }
}

fn invalid(msg: String) -> Error {
    Error::InvalidConfiguration(msg)
}

fn check_location(location: &Point3<f64>) -> Result<()> {
    if location.iter().all(|c| c.is_finite()) {
        Ok(())
    } else {
        Err(invalid(format!("location must be finite, got {location:?}")))
    }
}

fn unit_orientation(orientation: &Vector3<f64>) -> Result<Vector3<f64>> {
    let norm = orientation.norm();
    if !(norm.is_finite() && norm > 0.0) {
        return Err(invalid(format!(
            "orientation must be a finite non-zero vector, got {orientation:?}"
        )));
    }
    Ok(orientation / norm)
}

fn check_positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(format!("{name} must be positive and finite, got {value}")))
    }
}

#[derive(Debug, Default)]
struct GeometryCache {
    potential: Option<DVector<f64>>,
    b_source: Option<DVector<f64>>,
    injection: Option<DVector<f64>>,
}

#[derive(Debug, Default)]
struct ModelCache {
    b_initial: Option<DVector<f64>>,
}

/// A magnetic dipole or circular loop transmitter.
#[derive(Debug)]
pub struct InductiveSource {
    geometry: InductiveGeometry,
    location: Point3<f64>,
    orientation: Vector3<f64>,
    mu: f64,
    waveform: Waveform,
    cache: SourceCache<GeometryCache, ModelCache>,
}

impl InductiveSource {
    /// A point magnetic dipole.
    ///
    /// # Errors
    /// `InvalidConfiguration` for a negative or non-finite moment, a zero
    /// orientation, a non-positive permeability or a non-finite location.
    pub fn mag_dipole(params: MagDipoleParams) -> Result<Self> {
        if !(params.moment.is_finite() && params.moment >= 0.0) {
            return Err(invalid(format!(
                "moment must be non-negative and finite, got {}",
                params.moment
            )));
        }
        Self::new(
            InductiveGeometry::Dipole {
                moment: params.moment,
            },
            params.location,
            params.orientation,
            params.mu,
            params.waveform,
        )
    }

    /// A circular loop of `turns` windings.
    ///
    /// # Errors
    /// `InvalidConfiguration` for a non-positive radius or turn count, a
    /// non-finite current, or the same geometry errors as a dipole.
    pub fn circular_loop(params: CircularLoopParams) -> Result<Self> {
        check_positive("radius", params.radius)?;
        check_positive("turns", params.turns)?;
        if !params.current.is_finite() {
            return Err(invalid(format!("current must be finite, got {}", params.current)));
        }
        Self::new(
            InductiveGeometry::Loop {
                radius: params.radius,
                current: params.current,
                turns: params.turns,
            },
            params.location,
            params.orientation,
            params.mu,
            params.waveform,
        )
    }

    fn new(
        geometry: InductiveGeometry,
        location: Point3<f64>,
        orientation: Vector3<f64>,
        mu: f64,
        waveform: Waveform,
    ) -> Result<Self> {
        check_location(&location)?;
        check_positive("mu", mu)?;
        Ok(Self {
            geometry,
            location,
            orientation: unit_orientation(&orientation)?,
            mu,
            waveform,
            cache: SourceCache::default(),
        })
    }

    pub fn geometry(&self) -> &InductiveGeometry {
        &self.geometry
    }

    pub fn location(&self) -> &Point3<f64> {
        &self.location
    }

    /// Unit orientation.
    pub fn orientation(&self) -> &Vector3<f64> {
        &self.orientation
    }

    pub fn mu(&self) -> f64 {
        self.mu
    }

    /// Magnetic moment; `π·r²·I·N` for a loop.
    pub fn moment(&self) -> f64 {
        self.geometry.moment()
    }

    /// Analytic vector potential at `points` given in `coordinates`.
    pub fn vector_potential_at(
        &self,
        points: &[Point3<f64>],
        coordinates: tdem_core::CoordinateSystem,
    ) -> Vec<Vector3<f64>> {
        self.geometry
            .potential_at(self.mu, &self.location, &self.orientation, points, coordinates)
    }

    /// The vector potential sampled on the formulation's potential grids,
    /// one component per grid.
    pub fn sampled_potential(&mut self, simulation: &dyn Simulation) -> Result<DVector<f64>> {
        let (geometry, _) = self.cache.bind(simulation);
        if let Some(a) = &geometry.potential {
            return Ok(a.clone());
        }

        let mesh = simulation.mesh();
        let coordinates = mesh.coordinate_system();
        let mut values = Vec::with_capacity(simulation.formulation().potential_len(mesh));
        for (axis, grid) in simulation.formulation().potential_grids(mesh) {
            let a = self
                .geometry
                .potential_at(self.mu, &self.location, &self.orientation, grid, coordinates);
            values.extend(a.iter().map(|v| v[axis.index()]));
        }
        let a = DVector::from_vec(values);
        log::debug!("sampled source vector potential on {} locations", a.len());

        let (geometry, _) = self.cache.bind(simulation);
        geometry.potential = Some(a.clone());
        Ok(a)
    }

    /// Curl of the sampled vector potential: faces in EB, edges in HJ.
    pub fn source_b_field(&mut self, simulation: &dyn Simulation) -> Result<DVector<f64>> {
        if let Some(b) = &self.cache.bind(simulation).0.b_source {
            return Ok(b.clone());
        }
        let a = self.sampled_potential(simulation)?;
        let b = simulation.formulation().curl_potential(simulation.mesh(), &a)?;
        self.cache.bind(simulation).0.b_source = Some(b.clone());
        Ok(b)
    }

    /// Spatial part of `s_e`.
    fn injection(&mut self, simulation: &dyn Simulation) -> Result<DVector<f64>> {
        if let Some(s) = &self.cache.bind(simulation).0.injection {
            return Ok(s.clone());
        }
        let b = self.source_b_field(simulation)?;
        let s = simulation
            .formulation()
            .inductive_injection(simulation.mesh(), &b, self.mu)?;
        self.cache.bind(simulation).0.injection = Some(s.clone());
        Ok(s)
    }

    /// Initial flux in a permeability model differing from the source's:
    /// `b = MfMuiI·(h_p + Dᵀ·phi)` with `D·MfMuiI·Dᵀ·phi = −D·(MfMuiI − MfMuipI)·h_p`.
    fn magnetostatic_b(&mut self, simulation: &dyn Simulation) -> Result<DVector<f64>> {
        let a = simulation.formulation().magnetostatic_operator(simulation)?;
        let b_primary = self.source_b_field(simulation)?;

        let mesh = simulation.mesh();
        let mui_p = DVector::from_element(mesh.n_cells(), 1.0 / self.mu);
        let mf_muip = mesh.face_inner_product(&mui_p, false)?;
        let mf_muip_i = mesh.face_inner_product(&mui_p, true)?;
        let mf_mui_i = simulation.mf_mui_i();
        let div = mesh.face_div();

        let h_primary = mf_muip.mul_vec(&b_primary)?;
        let discrepancy = mf_mui_i.mul_vec(&h_primary)? - mf_muip_i.mul_vec(&h_primary)?;
        let rhs = -div.mul_vec(&discrepancy)?;

        let phi = {
            let solver = simulation.solver(&a)?;
            solver.solve(&rhs)?
        };
        log::debug!("magnetostatic correction solved on {} cells", phi.len());

        Ok(mf_mui_i.mul_vec(&(h_primary + div.tr_mul_vec(&phi)?))?)
    }
}

impl Source for InductiveSource {
    fn source_type(&self) -> SourceType {
        SourceType::Inductive
    }

    fn waveform(&self) -> &Waveform {
        &self.waveform
    }

    fn b_initial(&mut self, simulation: &dyn Simulation) -> Result<Field> {
        if !self.waveform.has_initial_fields() {
            return Ok(Field::Zero);
        }
        if let Some(b) = &self.cache.bind(simulation).1.b_initial {
            return Ok(Field::Dense(b.clone()));
        }

        let uniform = simulation.permeability().iter().all(|&mu| mu == self.mu);
        let b = if uniform {
            self.source_b_field(simulation)?
        } else {
            self.magnetostatic_b(simulation)?
        };

        self.cache.bind(simulation).1.b_initial = Some(b.clone());
        Ok(Field::Dense(b))
    }

    fn h_initial(&mut self, simulation: &dyn Simulation) -> Result<Field> {
        Ok(self.b_initial(simulation)? * (1.0 / self.mu))
    }

    fn s_e(&mut self, simulation: &dyn Simulation, time: f64) -> Result<Field> {
        let time_steps = simulation.time_steps();
        let Some(&first_step) = time_steps.get(1) else {
            return Err(invalid(format!(
                "inductive sources need at least two time steps, got {}",
                time_steps.len()
            )));
        };

        let injection = self.injection(simulation)?;
        if self.waveform.has_initial_fields() && time < first_step {
            let formulation = simulation.formulation();
            if simulation.field_type() == formulation.magnetic_field_type() {
                return Ok(Field::Zero);
            }
            return Ok(Field::Dense(injection));
        }

        let amplitude = self.waveform.eval(time);
        log::trace!("inductive s_e at t = {time:e}, amplitude {amplitude}");
        Ok(Field::Dense(injection * amplitude))
    }

    fn invalidate(&mut self) {
        self.cache.clear();
    }
}
