// Kepler Solver - Two-body orbits
// Orbital elements, Kepler's equation, and the analytic two-body drift used by WHFast

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::physics_engine::Vector3;

/// Newton-Raphson stops once the anomaly update is below this (relative to max(1, |x|))
pub const KEPLER_TOLERANCE: f64 = 1e-14;

/// Iteration cap for every Kepler solve
pub const KEPLER_MAX_ITERATIONS: usize = 32;

/// Below this |1/a| (relative to 1/r) the orbit is treated as parabolic
const PARABOLIC_LIMIT: f64 = 1e-12;

/// Leapfrog sub-steps used when the analytic drift cannot be trusted
const FALLBACK_SUBSTEPS: usize = 64;

// =============================================================================
// KEPLERIAN ORBITAL ELEMENTS
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrbitalElements {
    pub semi_major_axis: f64,
    /// Eccentricity (0-1 for elliptical)
    pub eccentricity: f64,
    /// Inclination (radians)
    pub inclination: f64,
    /// Longitude of ascending node (radians)
    pub longitude_ascending_node: f64,
    /// Argument of periapsis (radians)
    pub argument_periapsis: f64,
    /// Mean anomaly (radians)
    pub mean_anomaly: f64,
}

impl OrbitalElements {
    /// Convert elliptic orbital elements to a relative position and velocity
    /// around a body with gravitational parameter `mu`.
    pub fn to_state_vector(&self, mu: f64) -> (Vector3, Vector3) {
        let a = self.semi_major_axis;
        let e = self.eccentricity;

        let eccentric_anomaly = solve_kepler_equation(self.mean_anomaly, e).anomaly;

        let true_anomaly = 2.0
            * ((1.0 + e).sqrt() * (eccentric_anomaly / 2.0).sin())
                .atan2((1.0 - e).sqrt() * (eccentric_anomaly / 2.0).cos());

        // Distance from focus
        let r = a * (1.0 - e * eccentric_anomaly.cos());

        // Position and velocity in the perifocal frame
        let cos_nu = true_anomaly.cos();
        let sin_nu = true_anomaly.sin();
        let x_orb = r * cos_nu;
        let y_orb = r * sin_nu;

        let sqrt_mu_p = (mu / (a * (1.0 - e * e))).sqrt();
        let vx_orb = -sqrt_mu_p * sin_nu;
        let vy_orb = sqrt_mu_p * (e + cos_nu);

        let (cos_o, sin_o) = (
            self.longitude_ascending_node.cos(),
            self.longitude_ascending_node.sin(),
        );
        let (cos_w, sin_w) = (self.argument_periapsis.cos(), self.argument_periapsis.sin());
        let (cos_i, sin_i) = (self.inclination.cos(), self.inclination.sin());

        // Perifocal -> reference frame rotation
        let r11 = cos_o * cos_w - sin_o * sin_w * cos_i;
        let r12 = -cos_o * sin_w - sin_o * cos_w * cos_i;
        let r21 = sin_o * cos_w + cos_o * sin_w * cos_i;
        let r22 = -sin_o * sin_w + cos_o * cos_w * cos_i;
        let r31 = sin_w * sin_i;
        let r32 = cos_w * sin_i;

        let position = Vector3::new(
            r11 * x_orb + r12 * y_orb,
            r21 * x_orb + r22 * y_orb,
            r31 * x_orb + r32 * y_orb,
        );
        let velocity = Vector3::new(
            r11 * vx_orb + r12 * vy_orb,
            r21 * vx_orb + r22 * vy_orb,
            r31 * vx_orb + r32 * vy_orb,
        );

        (position, velocity)
    }

    /// Recover elements from a relative state. Returns None for unbound or
    /// degenerate (radial, zero-distance) orbits.
    pub fn from_state_vector(mu: f64, position: Vector3, velocity: Vector3) -> Option<Self> {
        let r = position.magnitude();
        let v2 = velocity.magnitude_squared();
        if r <= 0.0 || mu <= 0.0 {
            return None;
        }

        let inv_a = 2.0 / r - v2 / mu;
        if inv_a <= 0.0 {
            return None;
        }
        let a = 1.0 / inv_a;

        let h = position.cross(&velocity);
        let h_mag = h.magnitude();
        if h_mag <= 0.0 {
            return None;
        }

        let e_vec = velocity.cross(&h) * (1.0 / mu) - position * (1.0 / r);
        let e = e_vec.magnitude();
        let inclination = (h.z / h_mag).clamp(-1.0, 1.0).acos();

        // Node vector; undefined for planar orbits, where Ω = 0 by convention
        let node = Vector3::new(-h.y, h.x, 0.0);
        let node_mag = node.magnitude();
        let longitude_ascending_node = if node_mag > 1e-15 * h_mag {
            let omega = (node.x / node_mag).clamp(-1.0, 1.0).acos();
            if node.y < 0.0 {
                2.0 * PI - omega
            } else {
                omega
            }
        } else {
            0.0
        };

        // Argument of periapsis measured from the node (or the x axis if planar)
        let reference = if node_mag > 1e-15 * h_mag {
            node * (1.0 / node_mag)
        } else {
            Vector3::new(1.0, 0.0, 0.0)
        };
        let in_plane = h.cross(&reference) * (1.0 / h_mag);
        let argument_periapsis = if e > 1e-12 {
            e_vec.dot(&in_plane).atan2(e_vec.dot(&reference)).rem_euclid(2.0 * PI)
        } else {
            0.0
        };

        // True anomaly measured from periapsis (or the reference direction if circular)
        let periapsis_dir = if e > 1e-12 {
            e_vec * (1.0 / e)
        } else {
            reference
        };
        let q_dir = h.cross(&periapsis_dir) * (1.0 / h_mag);
        let true_anomaly = position.dot(&q_dir).atan2(position.dot(&periapsis_dir));

        let eccentric_anomaly = 2.0
            * ((1.0 - e).sqrt() * (true_anomaly / 2.0).sin())
                .atan2((1.0 + e).sqrt() * (true_anomaly / 2.0).cos());
        let mean_anomaly = (eccentric_anomaly - e * eccentric_anomaly.sin()).rem_euclid(2.0 * PI);

        Some(Self {
            semi_major_axis: a,
            eccentricity: e,
            inclination,
            longitude_ascending_node,
            argument_periapsis,
            mean_anomaly,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct KeplerSolution {
    pub anomaly: f64,
    pub converged: bool,
}

/// Solve Kepler's equation M = E - e*sin(E) using Newton-Raphson
pub fn solve_kepler_equation(mean_anomaly: f64, eccentricity: f64) -> KeplerSolution {
    // Starting at π for high eccentricity avoids the flat region near E = 0
    let mut e_anom = if eccentricity > 0.8 {
        // ±π on the same revolution as M
        let wrapped = (mean_anomaly + PI).rem_euclid(2.0 * PI) - PI;
        mean_anomaly - wrapped + PI.copysign(wrapped)
    } else {
        mean_anomaly
    };

    for _ in 0..KEPLER_MAX_ITERATIONS {
        let f = e_anom - eccentricity * e_anom.sin() - mean_anomaly;
        let f_prime = 1.0 - eccentricity * e_anom.cos();
        let delta = f / f_prime;
        e_anom -= delta;

        if delta.abs() < KEPLER_TOLERANCE * e_anom.abs().max(1.0) {
            return KeplerSolution {
                anomaly: e_anom,
                converged: true,
            };
        }
    }

    KeplerSolution {
        anomaly: e_anom,
        converged: false,
    }
}

// =============================================================================
// TWO-BODY DRIFT (Gauss f and g functions)
// =============================================================================

#[derive(Debug, Clone, Copy)]
pub struct DriftOutcome {
    pub position: Vector3,
    pub velocity: Vector3,
    /// False when the anomaly solve hit its cap and the fallback was used
    pub converged: bool,
}

/// Advance a relative two-body state by `dt` under central parameter `mu`.
///
/// The change in eccentric (or hyperbolic) anomaly is found with Newton-Raphson.
/// Near-parabolic orbits and failed solves fall back to a finely sub-stepped
/// leapfrog of the same two-body problem and are reported as not converged.
pub fn kepler_drift(position: Vector3, velocity: Vector3, mu: f64, dt: f64) -> DriftOutcome {
    if mu <= 0.0 || dt == 0.0 {
        return DriftOutcome {
            position: position + velocity * dt,
            velocity,
            converged: true,
        };
    }

    let r0 = position.magnitude();
    if r0 <= 0.0 {
        return fallback_drift(position, velocity, mu, dt);
    }

    let v2 = velocity.magnitude_squared();
    let rv = position.dot(&velocity);
    let alpha = 2.0 / r0 - v2 / mu; // 1/a

    if alpha.abs() < PARABOLIC_LIMIT / r0 {
        return fallback_drift(position, velocity, mu, dt);
    }

    let solved = if alpha > 0.0 {
        elliptic_drift(position, velocity, mu, dt, r0, rv, alpha)
    } else {
        hyperbolic_drift(position, velocity, mu, dt, r0, rv, alpha)
    };

    match solved {
        Some((p, v)) if p.is_finite() && v.is_finite() => DriftOutcome {
            position: p,
            velocity: v,
            converged: true,
        },
        _ => fallback_drift(position, velocity, mu, dt),
    }
}

fn elliptic_drift(
    position: Vector3,
    velocity: Vector3,
    mu: f64,
    dt: f64,
    r0: f64,
    rv: f64,
    alpha: f64,
) -> Option<(Vector3, Vector3)> {
    let a = 1.0 / alpha;
    let n = (mu * alpha * alpha * alpha).sqrt();
    let ec = 1.0 - r0 * alpha; // e cos E0
    let es = rv / (n * a * a); // e sin E0
    let mean_motion = n * dt;

    // Solve x - ec sin x + es (1 - cos x) = n dt for x = E - E0
    let mut x = mean_motion;
    let mut converged = false;
    for _ in 0..KEPLER_MAX_ITERATIONS {
        let (s, c) = x.sin_cos();
        let f = x - ec * s + es * (1.0 - c) - mean_motion;
        let fp = 1.0 - ec * c + es * s;
        let delta = f / fp;
        x -= delta;
        if delta.abs() < KEPLER_TOLERANCE * x.abs().max(1.0) {
            converged = true;
            break;
        }
    }
    if !converged {
        return None;
    }

    let (s, c) = x.sin_cos();
    let r = a * (1.0 - ec * c + es * s);
    let f = 1.0 - (a / r0) * (1.0 - c);
    let g = dt - (x - s) / n;
    let fdot = -(mu * a).sqrt() * s / (r * r0);
    let gdot = 1.0 - (a / r) * (1.0 - c);

    Some((position * f + velocity * g, position * fdot + velocity * gdot))
}

fn hyperbolic_drift(
    position: Vector3,
    velocity: Vector3,
    mu: f64,
    dt: f64,
    r0: f64,
    rv: f64,
    alpha: f64,
) -> Option<(Vector3, Vector3)> {
    let a = -1.0 / alpha; // |a|
    let n = (mu * (-alpha).powi(3)).sqrt();
    let ech = 1.0 + r0 / a; // e cosh F0
    let esh = rv / (n * a * a); // e sinh F0
    let mean_motion = n * dt;

    // Solve ech sinh x + esh (cosh x - 1) - x = n dt for x = F - F0
    let mut x = mean_motion * a / r0;
    let mut converged = false;
    for _ in 0..KEPLER_MAX_ITERATIONS {
        let (s, c) = (x.sinh(), x.cosh());
        let f = ech * s + esh * (c - 1.0) - x - mean_motion;
        let fp = ech * c + esh * s - 1.0;
        let delta = f / fp;
        x -= delta;
        if delta.abs() < KEPLER_TOLERANCE * x.abs().max(1.0) {
            converged = true;
            break;
        }
    }
    if !converged {
        return None;
    }

    let (s, c) = (x.sinh(), x.cosh());
    let r = a * (ech * c + esh * s - 1.0);
    let f = 1.0 - (a / r0) * (c - 1.0);
    let g = dt - (s - x) / n;
    let fdot = -(mu * a).sqrt() * s / (r * r0);
    let gdot = 1.0 - (a / r) * (c - 1.0);

    Some((position * f + velocity * g, position * fdot + velocity * gdot))
}

/// Best available estimate when the anomaly solve is unusable
fn fallback_drift(position: Vector3, velocity: Vector3, mu: f64, dt: f64) -> DriftOutcome {
    let h = dt / FALLBACK_SUBSTEPS as f64;
    let accel = |p: Vector3| {
        let r2 = p.magnitude_squared();
        p * (-mu / (r2 * r2.sqrt()))
    };

    let mut p = position;
    let mut v = velocity;
    for _ in 0..FALLBACK_SUBSTEPS {
        v += accel(p) * (0.5 * h);
        p += v * h;
        v += accel(p) * (0.5 * h);
    }

    DriftOutcome {
        position: p,
        velocity: v,
        converged: false,
    }
}

// =============================================================================
// TESTS
// =============================================================================
