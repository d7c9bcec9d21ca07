//! Whole-space magnetic vector potentials of inductive transmitters.

use std::f64::consts::PI;

use nalgebra::{Point3, Vector3};
use tdem_core::CoordinateSystem;

/// Below this elliptic parameter the loop potential uses its series
/// expansion; `(1 − m/2)K − E` loses all precision to cancellation as m → 0.
const SERIES_THRESHOLD: f64 = 1e-3;

/// Largest elliptic parameter evaluated; keeps K(m) finite on the wire.
const MAX_PARAMETER: f64 = 1.0 - 1e-12;

/// Complete elliptic integrals of the first and second kind, `K(m)` and
/// `E(m)`, for parameter `0 <= m < 1`, by the arithmetic-geometric mean.
pub fn elliptic_ke(m: f64) -> (f64, f64) {
    let mut a = 1.0;
    let mut b = (1.0 - m).sqrt();
    let mut c = m.sqrt();
    let mut weight = 0.5;
    let mut sum = weight * c * c;

    for _ in 0..64 {
        if c.abs() <= f64::EPSILON * a {
            break;
        }
        let next_a = 0.5 * (a + b);
        let next_b = (a * b).sqrt();
        c = 0.5 * (a - b);
        weight *= 2.0;
        sum += weight * c * c;
        a = next_a;
        b = next_b;
    }

    let k = PI / (2.0 * a);
    (k, k * (1.0 - sum))
}

/// Vector potential of a point dipole of moment `moment` along the unit
/// vector `orientation`, at offset `r` from the dipole:
/// `A = μ·m/(4π) · (ô × r)/|r|³`.
fn dipole(mu: f64, moment: f64, orientation: &Vector3<f64>, r: &Vector3<f64>) -> Vector3<f64> {
    let dist = r.norm();
    if dist == 0.0 {
        return Vector3::zeros();
    }
    orientation.cross(r) * (mu * moment / (4.0 * PI * dist.powi(3)))
}

/// Vector potential of a circular loop of radius `radius` carrying `current`
/// (turns included) with unit normal `normal`, at offset `r` from its centre.
///
/// The potential is azimuthal about the normal with magnitude
/// `μI/(π√m)·√(a/ρ)·[(1 − m/2)K(m) − E(m)]`, `m = 4aρ/((a + ρ)² + z²)`.
fn circular_loop(
    mu: f64,
    radius: f64,
    current: f64,
    normal: &Vector3<f64>,
    r: &Vector3<f64>,
) -> Vector3<f64> {
    let z = r.dot(normal);
    let azimuth = normal.cross(r);
    let rho = azimuth.norm();
    if rho == 0.0 {
        return Vector3::zeros();
    }

    let m = (4.0 * radius * rho / ((radius + rho).powi(2) + z * z)).min(MAX_PARAMETER);
    let bracket = if m < SERIES_THRESHOLD {
        PI * m * m / 32.0 * (1.0 + 0.75 * m + 75.0 / 128.0 * m * m)
    } else {
        let (k, e) = elliptic_ke(m);
        (1.0 - 0.5 * m) * k - e
    };
    let a_phi = mu * current / (PI * m.sqrt()) * (radius / rho).sqrt() * bracket;

    azimuth * (a_phi / rho)
}

/// The field geometry of an inductive transmitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InductiveGeometry {
    /// Point magnetic dipole.
    Dipole { moment: f64 },
    /// Finite circular loop of `turns` windings.
    Loop {
        radius: f64,
        current: f64,
        turns: f64,
    },
}

impl InductiveGeometry {
    /// Magnetic moment of the transmitter.
    pub fn moment(&self) -> f64 {
        match *self {
            InductiveGeometry::Dipole { moment } => moment,
            InductiveGeometry::Loop {
                radius,
                current,
                turns,
            } => PI * radius * radius * current * turns,
        }
    }

    /// Cartesian vector potential at offset `r` from the transmitter centre.
    pub fn potential(&self, mu: f64, orientation: &Vector3<f64>, r: &Vector3<f64>) -> Vector3<f64> {
        match *self {
            InductiveGeometry::Dipole { moment } => dipole(mu, moment, orientation, r),
            InductiveGeometry::Loop {
                radius,
                current,
                turns,
            } => circular_loop(mu, radius, current * turns, orientation, r),
        }
    }

    /// Vector potential at `points` expressed in `coordinates`.
    ///
    /// Cylindrical points are `(r, θ, z)`; the returned vectors are then
    /// `(A_r, A_θ, A_z)`. `location` is always Cartesian.
    pub fn potential_at(
        &self,
        mu: f64,
        location: &Point3<f64>,
        orientation: &Vector3<f64>,
        points: &[Point3<f64>],
        coordinates: CoordinateSystem,
    ) -> Vec<Vector3<f64>> {
        points
            .iter()
            .map(|p| match coordinates {
                CoordinateSystem::Cartesian => self.potential(mu, orientation, &(p - location)),
                CoordinateSystem::Cylindrical { .. } => {
                    let (sin, cos) = p.y.sin_cos();
                    let cartesian = Point3::new(p.x * cos, p.x * sin, p.z);
                    let a = self.potential(mu, orientation, &(cartesian - location));
                    Vector3::new(a.x * cos + a.y * sin, -a.x * sin + a.y * cos, a.z)
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use tdem_core::MU_0;

    use super::*;

    #[test]
    fn elliptic_integrals_at_one_half() {
        let (k, e) = elliptic_ke(0.5);
        assert!((k - 1.854_074_677_301_371_9).abs() < 1e-14, "K(0.5) = {k}");
        assert!((e - 1.350_643_881_047_675_5).abs() < 1e-14, "E(0.5) = {e}");
    }

    #[test]
    fn elliptic_integrals_at_zero() {
        let (k, e) = elliptic_ke(0.0);
        assert!((k - PI / 2.0).abs() < 1e-15);
        assert!((e - PI / 2.0).abs() < 1e-15);
    }

    #[test]
    fn dipole_potential_is_azimuthal() {
        let g = InductiveGeometry::Dipole { moment: 2.0 };
        let z = Vector3::z();
        let a = g.potential(MU_0, &z, &Vector3::new(3.0, 0.0, 0.0));
        assert!(a.x.abs() < 1e-30 && a.z.abs() < 1e-30);
        let expected = MU_0 * 2.0 / (4.0 * PI * 9.0);
        assert!((a.y - expected).abs() < 1e-12 * expected);
    }

    #[test]
    fn dipole_potential_at_centre_is_zero() {
        let g = InductiveGeometry::Dipole { moment: 1.0 };
        assert_eq!(g.potential(MU_0, &Vector3::z(), &Vector3::zeros()), Vector3::zeros());
    }

    #[test]
    fn loop_moment() {
        let g = InductiveGeometry::Loop {
            radius: 2.0,
            current: 3.0,
            turns: 4.0,
        };
        assert!((g.moment() - PI * 4.0 * 12.0).abs() < 1e-12);
    }

    #[test]
    fn loop_far_field_matches_dipole() {
        let (radius, current) = (0.5, 2.0);
        let lp = InductiveGeometry::Loop {
            radius,
            current,
            turns: 1.0,
        };
        let dp = InductiveGeometry::Dipole { moment: lp.moment() };
        let n = Vector3::new(1.0, 1.0, 0.5).normalize();

        for r in [
            Vector3::new(200.0, -50.0, 30.0),
            Vector3::new(-10.0, 400.0, 100.0),
        ] {
            let a = lp.potential(MU_0, &n, &r);
            let b = dp.potential(MU_0, &n, &r);
            let rel = (a - b).norm() / b.norm();
            assert!(rel < 1e-4, "loop and dipole differ by {rel:e} at {r:?}");
        }
    }

    #[test]
    fn loop_small_parameter_branch_is_continuous() {
        let lp = InductiveGeometry::Loop {
            radius: 1.0,
            current: 1.0,
            turns: 1.0,
        };
        let dp = InductiveGeometry::Dipole { moment: lp.moment() };
        // m crosses the series threshold between these two radii
        for rho in [3.9e3, 4.1e3] {
            let r = Vector3::new(rho, 0.0, 0.0);
            let a = lp.potential(MU_0, &Vector3::z(), &r);
            let b = dp.potential(MU_0, &Vector3::z(), &r);
            let rel = (a.y - b.y).abs() / b.y;
            assert!(rel < 1e-6, "loop differs from dipole by {rel:e} at rho = {rho}");
        }
    }

    #[test]
    fn loop_on_wire_is_finite() {
        let lp = InductiveGeometry::Loop {
            radius: 1.0,
            current: 1.0,
            turns: 1.0,
        };
        let a = lp.potential(MU_0, &Vector3::z(), &Vector3::new(1.0, 0.0, 0.0));
        assert!(a.norm().is_finite());
    }

    #[test]
    fn cylindrical_components() {
        let g = InductiveGeometry::Dipole { moment: 1.0 };
        let origin = Point3::origin();
        let theta = 0.7;
        let cyl = g.potential_at(
            MU_0,
            &origin,
            &Vector3::z(),
            &[Point3::new(2.0, theta, 0.5)],
            CoordinateSystem::Cylindrical { symmetric: false },
        );
        let cart = g.potential_at(
            MU_0,
            &origin,
            &Vector3::z(),
            &[Point3::new(2.0, 0.0, 0.5)],
            CoordinateSystem::Cartesian,
        );
        // Azimuthal symmetry: A_θ at any angle equals A_y on the x axis
        assert!(cyl[0].x.abs() < 1e-20);
        assert!((cyl[0].y - cart[0].y).abs() < 1e-12 * cart[0].y.abs());
    }
}
