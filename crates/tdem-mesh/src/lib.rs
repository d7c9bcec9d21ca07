//! Rectilinear tensor mesh for time-domain EM simulations.
//!
//! [`TensorMesh`] implements [`tdem_core::Mesh`] for a 3D grid defined by
//! per-axis cell widths. Quantities are ordered with x varying fastest;
//! edges are stacked `[Ex, Ey, Ez]` and faces `[Fx, Fy, Fz]`.
//!
//! The gradient, curl and divergence form an exact discrete sequence
//! (`curl * grad == 0`, `div * curl == 0`), and inner products use the
//! diagonal (lumped) approximation, which is exact for this mesh type's
//! isotropic properties.

mod lines;
pub mod tensor;

pub use tensor::TensorMesh;
