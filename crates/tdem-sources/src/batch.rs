//! Evaluating many sources at one time.
//!
//! Distinct sources own disjoint caches, so with the `parallel` feature they
//! are evaluated concurrently against one shared simulation.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use tdem_core::Field;

use crate::error::Result;
use crate::simulation::Simulation;
use crate::source::Source;

/// `(s_m, s_e)` of every source at `time`, in order.
///
/// Stops at the first error.
pub fn eval_all(
    sources: &mut [Box<dyn Source>],
    simulation: &dyn Simulation,
    time: f64,
) -> Result<Vec<(Field, Field)>> {
    log::trace!("evaluating {} sources at t = {time:e}", sources.len());

    #[cfg(feature = "parallel")]
    {
        sources
            .par_iter_mut()
            .map(|source| source.eval(simulation, time))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        sources
            .iter_mut()
            .map(|source| source.eval(simulation, time))
            .collect()
    }
}

/// Sum of the source terms of every source at `time`.
pub fn eval_total(
    sources: &mut [Box<dyn Source>],
    simulation: &dyn Simulation,
    time: f64,
) -> Result<(Field, Field)> {
    let terms = eval_all(sources, simulation, time)?;
    let mut s_m = Field::Zero;
    let mut s_e = Field::Zero;
    for (m, e) in &terms {
        s_m = s_m.checked_add(m)?;
        s_e = s_e.checked_add(e)?;
    }
    Ok((s_m, s_e))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use nalgebra::Point3;
    use tdem_mesh::TensorMesh;

    use super::*;
    use crate::formulation::{FieldType, FormulationKind};
    use crate::galvanic::{GalvanicSource, LineCurrentParams};
    use crate::inductive::{InductiveSource, MagDipoleParams};
    use crate::simulation::TensorSimulation;

    fn sources() -> Vec<Box<dyn Source>> {
        let dipole = InductiveSource::mag_dipole(
            MagDipoleParams::default().with_location(Point3::new(0.1, 0.2, -1.3)),
        )
        .unwrap();
        let wire = GalvanicSource::line_current(LineCurrentParams::new(vec![
            Point3::new(-1.5, 0.5, -0.5),
            Point3::new(1.5, -0.5, -0.5),
        ]))
        .unwrap();
        vec![Box::new(dipole), Box::new(wire)]
    }

    #[test]
    fn eval_all_matches_individual_evaluation() {
        let mesh =
            Arc::new(TensorMesh::uniform([4, 4, 4], [1.0; 3], Point3::new(-2.0, -2.0, -3.0)).unwrap());
        let sim = TensorSimulation::builder(mesh)
            .with_formulation(FormulationKind::Eb)
            .with_field_type(FieldType::E)
            .with_time_steps(vec![1e-5; 3])
            .build()
            .unwrap();

        let mut batch = sources();
        let all = eval_all(&mut batch, &sim, 0.0).unwrap();
        assert_eq!(all.len(), 2);

        let mut single = sources();
        for (source, expected) in single.iter_mut().zip(&all) {
            assert_eq!(&source.eval(&sim, 0.0).unwrap(), expected);
        }

        let (s_m, s_e) = eval_total(&mut batch, &sim, 0.0).unwrap();
        assert!(s_m.is_zero());
        let n = sim.mesh().n_edges();
        let sum = all[0].1.to_dense(n) + all[1].1.to_dense(n);
        assert!((s_e.into_dense(n) - sum).amax() < 1e-15);
    }
}
