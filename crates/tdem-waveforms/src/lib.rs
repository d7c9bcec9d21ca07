//! Transmitter waveforms for time-domain EM.
//!
//! A [`Waveform`] is a pure function of time giving the normalised amplitude
//! of a transmitter's excitation, together with a flag saying whether the
//! transmitter has been on since t = -∞ and therefore deposits fields at
//! t = 0.

pub mod error;
pub mod waveform;

pub use error::{Error, Result};
pub use waveform::{DEFAULT_EPSILON, RawWaveform, Shape, VtemParams, Waveform};
