//! Transmitter waveform shapes.
//!
//! Every waveform is immutable after construction and [`Waveform::eval`] is a
//! pure, total function of time. Breakpoint comparisons are inclusive on the
//! side nearer the plateau, so `eval(ramp_on[1]) == 1` exactly. The
//! `epsilon` window only matters for the step-off and ramp-off shapes, where
//! it keeps floating-point times close to zero from being treated as "off".

use std::f64::consts::FRAC_PI_2;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Default width of the "on" window around t = 0.
pub const DEFAULT_EPSILON: f64 = 1e-9;

/// A scalar function of time.
pub type TimeFn = Arc<dyn Fn(f64) -> f64 + Send + Sync>;

/// A user-supplied waveform.
#[derive(Clone)]
pub struct RawWaveform {
    function: TimeFn,
    derivative: Option<TimeFn>,
    has_initial_fields: bool,
}

impl RawWaveform {
    /// Wrap an amplitude function. No initial fields are assumed.
    pub fn new(function: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Self {
        Self {
            function: Arc::new(function),
            derivative: None,
            has_initial_fields: false,
        }
    }

    /// Supply d(amplitude)/dt, enabling [`Waveform::eval_deriv`].
    pub fn with_derivative(mut self, derivative: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Self {
        self.derivative = Some(Arc::new(derivative));
        self
    }

    /// Declare that the transmitter is on before t = 0.
    pub fn with_initial_fields(mut self, has_initial_fields: bool) -> Self {
        self.has_initial_fields = has_initial_fields;
        self
    }
}

impl fmt::Debug for RawWaveform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawWaveform")
            .field("has_derivative", &self.derivative.is_some())
            .field("has_initial_fields", &self.has_initial_fields)
            .finish_non_exhaustive()
    }
}

/// Parameters of a VTEM-style waveform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VtemParams {
    /// End of the linear ramp-off (s).
    pub off_time: f64,
    /// End of the exponential ramp-on (s).
    pub peak_time: f64,
    /// Exponential rate of the ramp-on.
    pub ramp_on_rate: f64,
}

impl Default for VtemParams {
    fn default() -> Self {
        Self {
            off_time: 4.2e-3,
            peak_time: 2.73e-3,
            ramp_on_rate: 3.0,
        }
    }
}

impl VtemParams {
    pub fn with_off_time(mut self, off_time: f64) -> Self {
        self.off_time = off_time;
        self
    }

    pub fn with_peak_time(mut self, peak_time: f64) -> Self {
        self.peak_time = peak_time;
        self
    }

    pub fn with_ramp_on_rate(mut self, ramp_on_rate: f64) -> Self {
        self.ramp_on_rate = ramp_on_rate;
        self
    }
}

/// Shape of a waveform.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Shape {
    /// 1 within `epsilon` of t = 0, else 0.
    StepOff,

    /// On until t = 0, then a linear decay reaching 0 at `off_time`.
    RampOff,

    /// Amplitude delegated to a user function.
    Raw(RawWaveform),

    /// Exponential ramp-on to `peak_time`, linear ramp-off to `off_time`.
    Vtem { peak_time: f64, ramp_on_rate: f64 },

    /// Linear ramp-on over `ramp_on`, plateau at 1, linear ramp-off over `ramp_off`.
    Trapezoid { ramp_on: [f64; 2], ramp_off: [f64; 2] },

    /// Trapezoid without a plateau: on over `[0, peak_time]`, off over
    /// `[peak_time, off_time]`.
    Triangular { peak_time: f64 },

    /// Quarter-sine ramp-on, linear ramp-off.
    QuarterSineRampOn { ramp_on: [f64; 2], ramp_off: [f64; 2] },

    /// Quarter-sine ramp-on, quarter-cosine ramp-off.
    HalfSine { ramp_on: [f64; 2], ramp_off: [f64; 2] },
}

/// A transmitter waveform.
#[derive(Debug, Clone)]
pub struct Waveform {
    shape: Shape,
    off_time: f64,
    epsilon: f64,
}

impl Default for Waveform {
    fn default() -> Self {
        Waveform::step_off()
    }
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::InvalidConfiguration(msg.into())
}

fn check_off_time(off_time: f64) -> Result<()> {
    if !(off_time.is_finite() && off_time >= 0.0) {
        return Err(invalid(format!("off_time must be finite and >= 0, got {off_time}")));
    }
    Ok(())
}

fn interval(name: &str, values: &[f64]) -> Result<[f64; 2]> {
    match values {
        &[a, b] if a.is_finite() && b.is_finite() && a <= b => Ok([a, b]),
        &[a, b] => Err(invalid(format!("{name} must be an ordered finite interval, got [{a}, {b}]"))),
        _ => Err(invalid(format!(
            "{name} must be length 2 [start, end], got length {}",
            values.len()
        ))),
    }
}

fn ramps(ramp_on: &[f64], ramp_off: &[f64]) -> Result<([f64; 2], [f64; 2])> {
    let on = interval("ramp_on", ramp_on)?;
    let off = interval("ramp_off", ramp_off)?;
    if on[1] > off[0] {
        return Err(invalid(format!(
            "ramp_on must end before ramp_off starts ({} > {})",
            on[1], off[0]
        )));
    }
    Ok((on, off))
}

fn check_peak(peak_time: f64, off_time: f64) -> Result<()> {
    check_off_time(off_time)?;
    if !(peak_time.is_finite() && peak_time > 0.0 && peak_time < off_time) {
        return Err(invalid(format!(
            "peak_time must satisfy 0 < peak_time < off_time ({off_time}), got {peak_time}"
        )));
    }
    Ok(())
}

impl Waveform {
    fn with_shape(shape: Shape, off_time: f64) -> Self {
        Self {
            shape,
            off_time,
            epsilon: DEFAULT_EPSILON,
        }
    }

    /// Instantaneous shut-off at t = 0.
    pub fn step_off() -> Self {
        Self::with_shape(Shape::StepOff, 0.0)
    }

    /// Linear shut-off from t = 0 to `off_time`.
    pub fn ramp_off(off_time: f64) -> Result<Self> {
        check_off_time(off_time)?;
        if off_time == 0.0 {
            return Err(invalid("ramp-off waveform needs off_time > 0"));
        }
        Ok(Self::with_shape(Shape::RampOff, off_time))
    }

    /// User-supplied amplitude function.
    pub fn raw(raw: RawWaveform) -> Self {
        Self::with_shape(Shape::Raw(raw), 0.0)
    }

    /// VTEM-style exponential ramp-on and linear ramp-off.
    pub fn vtem(params: VtemParams) -> Result<Self> {
        check_peak(params.peak_time, params.off_time)?;
        if !(params.ramp_on_rate.is_finite() && params.ramp_on_rate != 0.0) {
            return Err(invalid(format!(
                "ramp_on_rate must be finite and non-zero, got {}",
                params.ramp_on_rate
            )));
        }
        Ok(Self::with_shape(
            Shape::Vtem {
                peak_time: params.peak_time,
                ramp_on_rate: params.ramp_on_rate,
            },
            params.off_time,
        ))
    }

    /// Linear ramp-on and ramp-off; `off_time` defaults to `ramp_off[1]`.
    pub fn trapezoid(ramp_on: &[f64], ramp_off: &[f64], off_time: Option<f64>) -> Result<Self> {
        let (ramp_on, ramp_off) = ramps(ramp_on, ramp_off)?;
        let off_time = off_time.unwrap_or(ramp_off[1]);
        check_off_time(off_time)?;
        Ok(Self::with_shape(Shape::Trapezoid { ramp_on, ramp_off }, off_time))
    }

    /// Linear ramp-on over `[0, peak_time]` and ramp-off over `[peak_time, off_time]`.
    pub fn triangular(peak_time: f64, off_time: f64) -> Result<Self> {
        check_peak(peak_time, off_time)?;
        Ok(Self::with_shape(Shape::Triangular { peak_time }, off_time))
    }

    /// Quarter-sine ramp-on and linear ramp-off.
    pub fn quarter_sine_ramp_on(ramp_on: &[f64], ramp_off: &[f64]) -> Result<Self> {
        let (ramp_on, ramp_off) = ramps(ramp_on, ramp_off)?;
        Ok(Self::with_shape(
            Shape::QuarterSineRampOn { ramp_on, ramp_off },
            ramp_off[1],
        ))
    }

    /// Quarter-sine ramp-on and quarter-cosine ramp-off.
    pub fn half_sine(ramp_on: &[f64], ramp_off: &[f64]) -> Result<Self> {
        let (ramp_on, ramp_off) = ramps(ramp_on, ramp_off)?;
        Ok(Self::with_shape(Shape::HalfSine { ramp_on, ramp_off }, ramp_off[1]))
    }

    /// Replace the tolerance window around t = 0.
    pub fn with_epsilon(mut self, epsilon: f64) -> Result<Self> {
        if !(epsilon.is_finite() && epsilon >= 0.0) {
            return Err(invalid(format!("epsilon must be finite and >= 0, got {epsilon}")));
        }
        self.epsilon = epsilon;
        Ok(self)
    }

    /// Replace the nominal off time, re-checking shape constraints.
    pub fn with_off_time(mut self, off_time: f64) -> Result<Self> {
        check_off_time(off_time)?;
        match &self.shape {
            Shape::RampOff if off_time == 0.0 => {
                return Err(invalid("ramp-off waveform needs off_time > 0"));
            }
            Shape::Vtem { peak_time, .. } | Shape::Triangular { peak_time } => {
                check_peak(*peak_time, off_time)?;
            }
            _ => {}
        }
        self.off_time = off_time;
        Ok(self)
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn off_time(&self) -> f64 {
        self.off_time
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Whether the transmitter has been on since t = -∞, leaving nonzero
    /// fields at t = 0.
    pub fn has_initial_fields(&self) -> bool {
        match &self.shape {
            Shape::StepOff | Shape::RampOff => true,
            Shape::Raw(raw) => raw.has_initial_fields,
            _ => false,
        }
    }

    /// Evaluate the amplitude at `time`.
    pub fn eval(&self, time: f64) -> f64 {
        match &self.shape {
            Shape::StepOff => {
                if time.abs() < self.epsilon {
                    1.0
                } else {
                    0.0
                }
            }
            Shape::RampOff => eval_ramp_off(self.off_time, self.epsilon, time),
            Shape::Raw(raw) => (raw.function)(time),
            Shape::Vtem {
                peak_time,
                ramp_on_rate,
            } => eval_vtem(*peak_time, *ramp_on_rate, self.off_time, time),
            Shape::Trapezoid { ramp_on, ramp_off } => {
                eval_pulse(*ramp_on, *ramp_off, Edge::Linear, Edge::Linear, time)
            }
            Shape::Triangular { peak_time } => eval_pulse(
                [0.0, *peak_time],
                [*peak_time, self.off_time],
                Edge::Linear,
                Edge::Linear,
                time,
            ),
            Shape::QuarterSineRampOn { ramp_on, ramp_off } => {
                eval_pulse(*ramp_on, *ramp_off, Edge::Sine, Edge::Linear, time)
            }
            Shape::HalfSine { ramp_on, ramp_off } => {
                eval_pulse(*ramp_on, *ramp_off, Edge::Sine, Edge::Sine, time)
            }
        }
    }

    /// Evaluate d(amplitude)/dt at `time`.
    ///
    /// At a breakpoint the one-sided derivative on the plateau side is
    /// returned. Zero-width ramps contribute no derivative.
    ///
    /// # Errors
    /// `NotSupported` for the step-off waveform (its derivative is impulsive)
    /// and for raw waveforms built without a derivative function.
    pub fn eval_deriv(&self, time: f64) -> Result<f64> {
        Ok(match &self.shape {
            Shape::StepOff => {
                return Err(Error::NotSupported(
                    "derivative of the step-off waveform".to_string(),
                ));
            }
            Shape::RampOff => {
                if time >= self.epsilon && time < self.off_time {
                    -1.0 / self.off_time
                } else {
                    0.0
                }
            }
            Shape::Raw(raw) => match &raw.derivative {
                Some(derivative) => derivative(time),
                None => {
                    return Err(Error::NotSupported(
                        "derivative of a raw waveform without a derivative function".to_string(),
                    ));
                }
            },
            Shape::Vtem {
                peak_time,
                ramp_on_rate,
            } => deriv_vtem(*peak_time, *ramp_on_rate, self.off_time, time),
            Shape::Trapezoid { ramp_on, ramp_off } => {
                deriv_pulse(*ramp_on, *ramp_off, Edge::Linear, Edge::Linear, time)
            }
            Shape::Triangular { peak_time } => deriv_pulse(
                [0.0, *peak_time],
                [*peak_time, self.off_time],
                Edge::Linear,
                Edge::Linear,
                time,
            ),
            Shape::QuarterSineRampOn { ramp_on, ramp_off } => {
                deriv_pulse(*ramp_on, *ramp_off, Edge::Sine, Edge::Linear, time)
            }
            Shape::HalfSine { ramp_on, ramp_off } => {
                deriv_pulse(*ramp_on, *ramp_off, Edge::Sine, Edge::Sine, time)
            }
        })
    }
}

/// Profile of a ramp: linear, or a quarter period of sine (on) / cosine (off).
#[derive(Debug, Clone, Copy)]
enum Edge {
    Linear,
    Sine,
}

impl Edge {
    /// Amplitude after a fraction `x` of a ramp-on.
    fn rise(self, x: f64) -> f64 {
        match self {
            Edge::Linear => x,
            Edge::Sine => (FRAC_PI_2 * x).sin(),
        }
    }

    /// Amplitude after a fraction `x` of a ramp-off.
    fn fall(self, x: f64) -> f64 {
        match self {
            Edge::Linear => 1.0 - x,
            Edge::Sine => (FRAC_PI_2 * x).cos(),
        }
    }

    fn rise_deriv(self, x: f64) -> f64 {
        match self {
            Edge::Linear => 1.0,
            Edge::Sine => FRAC_PI_2 * (FRAC_PI_2 * x).cos(),
        }
    }

    fn fall_deriv(self, x: f64) -> f64 {
        match self {
            Edge::Linear => -1.0,
            Edge::Sine => -FRAC_PI_2 * (FRAC_PI_2 * x).sin(),
        }
    }
}

/// Evaluate a ramp-off waveform at time t.
fn eval_ramp_off(off_time: f64, epsilon: f64, t: f64) -> f64 {
    if t.abs() < epsilon || t < 0.0 {
        1.0
    } else if t < off_time {
        (off_time - t) / off_time
    } else {
        0.0
    }
}

/// Evaluate a VTEM waveform at time t.
fn eval_vtem(peak_time: f64, rate: f64, off_time: f64, t: f64) -> f64 {
    if t < 0.0 {
        0.0
    } else if t <= peak_time {
        (1.0 - (-rate * t / peak_time).exp()) / (1.0 - (-rate).exp())
    } else if t < off_time {
        (off_time - t) / (off_time - peak_time)
    } else {
        0.0
    }
}

fn deriv_vtem(peak_time: f64, rate: f64, off_time: f64, t: f64) -> f64 {
    if t >= 0.0 && t <= peak_time {
        rate / peak_time * (-rate * t / peak_time).exp() / (1.0 - (-rate).exp())
    } else if t > peak_time && t < off_time {
        -1.0 / (off_time - peak_time)
    } else {
        0.0
    }
}

/// Evaluate a ramp-on / plateau / ramp-off pulse at time t.
///
/// Ramp end points belong to the ramp, so the value at `on[1]` and `off[0]`
/// is the plateau value. Zero-width ramps jump straight to the plateau.
fn eval_pulse(on: [f64; 2], off: [f64; 2], rise: Edge, fall: Edge, t: f64) -> f64 {
    if t < on[0] {
        0.0
    } else if t <= on[1] {
        let width = on[1] - on[0];
        if width > 0.0 {
            rise.rise((t - on[0]) / width)
        } else {
            1.0
        }
    } else if t < off[0] {
        1.0
    } else if t <= off[1] {
        let width = off[1] - off[0];
        if width > 0.0 {
            fall.fall((t - off[0]) / width)
        } else {
            1.0
        }
    } else {
        0.0
    }
}

fn deriv_pulse(on: [f64; 2], off: [f64; 2], rise: Edge, fall: Edge, t: f64) -> f64 {
    if t >= on[0] && t < on[1] {
        let width = on[1] - on[0];
        rise.rise_deriv((t - on[0]) / width) / width
    } else if t > off[0] && t <= off[1] {
        let width = off[1] - off[0];
        fall.fall_deriv((t - off[0]) / width) / width
    } else {
        0.0
    }
}
