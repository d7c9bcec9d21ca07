//! End-to-end scenarios for sources evaluated against a tensor-mesh simulation.
//!
//! Test naming convention:
//! - `test_waveform_*` - waveform evaluation seen through a source
//! - `test_inductive_*` - magnetic dipoles and loops
//! - `test_galvanic_*` - grounded wires

use std::f64::consts::PI;
use std::sync::Arc;

use nalgebra::{DVector, Point3, Vector3};
use tdem_core::{Axis, Field, MU_0, Mesh};
use tdem_mesh::TensorMesh;
use tdem_sources::{
    CircularLoopParams, FieldType, FormulationKind, GalvanicSource, InductiveSource,
    LineCurrentParams, MagDipoleParams, Simulation, Source, SourceType, TensorSimulation, eval_all,
};
use tdem_waveforms::{RawWaveform, Waveform};

/// Tolerance for comparing fields computed along different paths.
const FIELD_TOL: f64 = 1e-12;

fn mesh() -> Arc<TensorMesh> {
    Arc::new(
        TensorMesh::new(
            vec![2.0, 1.0, 1.0, 1.0, 1.0, 2.0],
            vec![2.0, 1.0, 1.0, 1.0, 1.0, 2.0],
            vec![2.0, 1.0, 1.0, 1.0, 2.0],
            Point3::new(-4.0, -4.0, -5.0),
        )
        .unwrap(),
    )
}

fn simulation(kind: FormulationKind, field_type: FieldType, time_steps: Vec<f64>) -> TensorSimulation {
    TensorSimulation::builder(mesh())
        .with_formulation(kind)
        .with_field_type(field_type)
        .with_time_steps(time_steps)
        .build()
        .unwrap()
}

fn dipole(waveform: Waveform) -> InductiveSource {
    let params = MagDipoleParams::default()
        .with_location(Point3::new(0.11, -0.23, -1.37))
        .with_moment(1.0)
        .with_waveform(waveform);
    InductiveSource::mag_dipole(params).unwrap()
}

// ============================================================================
// Waveforms
// ============================================================================

/// Test: half-sine pulse with ramp_on = [0, 1], ramp_off = [1, 2]
#[test]
fn test_waveform_half_sine_pulse() {
    let w = Waveform::half_sine(&[0.0, 1.0], &[1.0, 2.0]).unwrap();
    assert!((w.eval(0.5) - (PI / 4.0).sin()).abs() < 1e-12);
    assert!((w.eval(1.5) - (PI / 4.0).cos()).abs() < 1e-12);
    assert_eq!(w.eval(2.5), 0.0);
}

/// Test: a raw waveform drives a galvanic source's s_e
#[test]
fn test_waveform_raw_scales_injection() {
    let sim = simulation(FormulationKind::Hj, FieldType::J, vec![1e-5; 3]);
    let waveform = Waveform::raw(RawWaveform::new(|t| (-t / 1e-3).exp()));
    let mut wire = GalvanicSource::line_current(
        LineCurrentParams::new(vec![Point3::new(-1.5, 0.2, -0.5), Point3::new(1.5, 0.2, -0.5)])
            .with_waveform(waveform),
    )
    .unwrap();

    let n = sim.mesh().n_faces();
    let q = wire.discretized_injection(&sim).unwrap().into_dense(n);
    let s = wire.s_e(&sim, 1e-3).unwrap().into_dense(n);
    assert!((s - q * (-1.0f64).exp()).amax() < FIELD_TOL);
    // Raw waveforms default to no initial fields
    assert!(wire.phi_initial(&sim).unwrap().is_zero());
}

// ============================================================================
// Inductive sources
// ============================================================================

/// Test: step-off dipole of unit moment in a uniform medium
///
/// b_initial is the source flux regardless of the time discretization, and
/// after the first step s_e is the injection scaled by eval(t) = 0.
#[test]
fn test_inductive_step_off_dipole() {
    let short = simulation(FormulationKind::Eb, FieldType::E, vec![1e-6; 5]);
    let long = simulation(FormulationKind::Eb, FieldType::E, vec![1e-4; 20]);

    let mut src = dipole(Waveform::step_off());
    assert_eq!(src.source_type(), SourceType::Inductive);

    let b_short = src.b_initial(&short).unwrap();
    let b_long = src.b_initial(&long).unwrap();
    assert!(!b_short.is_zero());
    assert!(b_short.norm() > 0.0);
    let n = short.mesh().n_faces();
    assert!((b_short.to_dense(n) - b_long.to_dense(n)).amax() <= FIELD_TOL * b_short.norm());

    let first = src.s_e(&short, 0.0).unwrap();
    assert!(first.norm() > 0.0, "injection inside the first step");

    let t = short.time_steps()[1] + 1e-9;
    let later = src.s_e(&short, t).unwrap();
    let expected = first.clone() * src.waveform().eval(t);
    assert_eq!(src.waveform().eval(t), 0.0);
    assert_eq!(later, expected);
    assert_eq!(later.norm(), 0.0);
}

/// Test: inside the first step the primary field type gets no source term
#[test]
fn test_inductive_jump_condition_per_field_type() {
    for (kind, primary, dual) in [
        (FormulationKind::Eb, FieldType::B, FieldType::E),
        (FormulationKind::Hj, FieldType::H, FieldType::J),
    ] {
        let mut src = dipole(Waveform::step_off());
        let primary_sim = simulation(kind, primary, vec![1e-5; 3]);
        let dual_sim = simulation(kind, dual, vec![1e-5; 3]);

        assert!(src.s_e(&primary_sim, 0.0).unwrap().is_zero(), "{kind} {primary}");
        let s = src.s_e(&dual_sim, 0.0).unwrap();
        assert!(s.norm() > 0.0, "{kind} {dual}");
        assert!(src.s_m(&dual_sim, 0.0).unwrap().is_zero());
    }
}

/// Test: b_initial equals the source flux exactly in a matching uniform medium
#[test]
fn test_inductive_uniform_medium_skips_correction() {
    let sim = simulation(FormulationKind::Eb, FieldType::B, vec![1e-5; 3]);
    let loop_params = CircularLoopParams::default()
        .with_location(Point3::new(0.07, 0.13, -1.41))
        .with_radius(1.3)
        .with_orientation(Vector3::new(0.2, 0.0, 1.0));
    let mut lp = InductiveSource::circular_loop(loop_params).unwrap();

    let b0 = lp.b_initial(&sim).unwrap();
    let bs = lp.source_b_field(&sim).unwrap();
    assert_eq!(b0, Field::Dense(bs));
    assert_eq!(sim.factorization_count(), 0);
}

/// Test: a permeable body triggers one magnetostatic solve, then is cached
#[test]
fn test_inductive_permeable_body() {
    let m = mesh();
    // Permeable half-space below z = -2
    let [nx, ny, _] = m.shape_cells();
    let cz = m.cell_center_coordinates(Axis::Z).to_vec();
    let mu = DVector::from_fn(m.n_cells(), |i, _| {
        if cz[i / (nx * ny)] < -2.0 { 10.0 * MU_0 } else { MU_0 }
    });
    let sim = TensorSimulation::builder(m)
        .with_time_steps(vec![1e-5; 3])
        .with_permeability(mu)
        .build()
        .unwrap();

    let mut src = dipole(Waveform::step_off());
    let b = src.b_initial(&sim).unwrap();
    let bs = src.source_b_field(&sim).unwrap();
    let n = sim.mesh().n_faces();
    assert!((b.to_dense(n) - &bs).norm() > 1e-3 * bs.norm());
    src.b_initial(&sim).unwrap();
    src.h_initial(&sim).unwrap();
    assert_eq!(sim.factorization_count(), 1);
}

/// Test: a small loop looks like a dipole of the same moment
#[test]
fn test_inductive_small_loop_matches_dipole() {
    let location = Point3::new(0.31, -0.17, -1.21);
    let orientation = Vector3::new(0.0, 1.0, 1.0);
    let radius = 0.01;
    let current = 2.0;
    let mut lp = InductiveSource::circular_loop(
        CircularLoopParams::default()
            .with_location(location)
            .with_orientation(orientation)
            .with_radius(radius)
            .with_current(current),
    )
    .unwrap();
    let mut dp = InductiveSource::mag_dipole(
        MagDipoleParams::default()
            .with_location(location)
            .with_orientation(orientation)
            .with_moment(PI * radius * radius * current),
    )
    .unwrap();
    assert!((lp.moment() - dp.moment()).abs() < 1e-15);

    let sim = simulation(FormulationKind::Hj, FieldType::H, vec![1e-5; 3]);
    let a = lp.source_b_field(&sim).unwrap();
    let b = dp.source_b_field(&sim).unwrap();
    let rel = (&a - &b).norm() / b.norm();
    assert!(rel < 1e-2, "loop and dipole source fields differ by {rel:e}");
}

/// Test: sources without initial fields return the zero sentinel everywhere
#[test]
fn test_inductive_without_initial_fields() {
    let sim = simulation(FormulationKind::Eb, FieldType::B, vec![1e-5; 3]);
    let waveform = Waveform::trapezoid(&[0.0, 1e-3], &[2e-3, 3e-3], None).unwrap();
    let mut src = dipole(waveform);
    let v = DVector::from_element(sim.mesh().n_cells(), 1.0);

    for field in [
        src.b_initial(&sim).unwrap(),
        src.e_initial(&sim).unwrap(),
        src.h_initial(&sim).unwrap(),
        src.j_initial(&sim).unwrap(),
        src.b_initial_deriv(&sim, &v, false).unwrap(),
        src.e_initial_deriv(&sim, &v, true).unwrap(),
    ] {
        assert!(field.is_zero());
    }
    // No jump condition: s_e follows the waveform from t = 0
    assert!(src.s_e(&sim, 0.0).unwrap().norm() == 0.0);
}

// ============================================================================
// Galvanic sources
// ============================================================================

/// Test: line current without initial fields never solves anything
#[test]
fn test_galvanic_no_initial_fields_no_solves() {
    for kind in [FormulationKind::Eb, FormulationKind::Hj] {
        let sim = TensorSimulation::builder(mesh())
            .with_formulation(kind)
            .with_time_steps(vec![1e-5; 3])
            .build()
            .unwrap();
        let waveform = Waveform::triangular(1e-3, 2e-3).unwrap();
        let mut wire = GalvanicSource::line_current(
            LineCurrentParams::new(vec![
                Point3::new(-2.5, -0.4, -0.5),
                Point3::new(0.0, 0.6, -0.5),
                Point3::new(2.5, -0.4, -0.5),
            ])
            .with_waveform(waveform),
        )
        .unwrap();

        assert!(wire.phi_initial(&sim).unwrap().is_zero());
        assert!(wire.e_initial(&sim).unwrap().is_zero());
        assert!(wire.j_initial(&sim).unwrap().is_zero());
        assert!(wire.b_initial(&sim).unwrap().is_zero());
        assert_eq!(sim.factorization_count(), 0, "{kind}");
    }
}

/// Test: DC fields of a wire are shared between sources on one simulation
#[test]
fn test_galvanic_dc_factorization_is_shared() {
    let sim = simulation(FormulationKind::Eb, FieldType::E, vec![1e-5; 3]);
    let mut a = GalvanicSource::line_current(LineCurrentParams::new(vec![
        Point3::new(-2.5, 0.3, -0.5),
        Point3::new(2.5, 0.3, -0.5),
    ]))
    .unwrap();
    let mut b = GalvanicSource::line_current(LineCurrentParams::new(vec![
        Point3::new(0.3, -2.5, -0.5),
        Point3::new(0.3, 2.5, -0.5),
    ]))
    .unwrap();

    assert!(a.e_initial(&sim).unwrap().norm() > 0.0);
    assert!(b.e_initial(&sim).unwrap().norm() > 0.0);
    assert_eq!(sim.factorization_count(), 1);
}

/// Test: reversing the wire reverses every initial field
#[test]
fn test_galvanic_reversed_wire() {
    let sim = simulation(FormulationKind::Hj, FieldType::J, vec![1e-5; 3]);
    let path = vec![
        Point3::new(-2.2, 0.3, -0.6),
        Point3::new(0.4, -0.7, -1.6),
        Point3::new(2.3, 0.2, -0.6),
    ];
    let reversed: Vec<_> = path.iter().rev().copied().collect();
    let mut forward = GalvanicSource::line_current(LineCurrentParams::new(path)).unwrap();
    let mut backward = GalvanicSource::line_current(LineCurrentParams::new(reversed)).unwrap();

    let n = sim.mesh().n_edges();
    let h1 = forward.h_initial(&sim).unwrap().into_dense(n);
    let h2 = backward.h_initial(&sim).unwrap().into_dense(n);
    assert!((&h1 + &h2).amax() <= 1e-9 * h1.amax());
}

/// Test: evaluating a mixed survey in one call
#[test]
fn test_galvanic_and_inductive_batch() {
    let sim = simulation(FormulationKind::Eb, FieldType::E, vec![1e-5; 3]);
    let wire = GalvanicSource::line_current(LineCurrentParams::new(vec![
        Point3::new(-2.5, 0.3, -0.5),
        Point3::new(2.5, 0.3, -0.5),
    ]))
    .unwrap();
    let mut sources: Vec<Box<dyn Source>> =
        vec![Box::new(dipole(Waveform::step_off())), Box::new(wire)];

    let terms = eval_all(&mut sources, &sim, 0.0).unwrap();
    assert_eq!(terms.len(), 2);
    for (s_m, s_e) in &terms {
        assert!(s_m.is_zero());
        assert_eq!(s_e.len(), Some(sim.mesh().n_edges()));
    }
}
