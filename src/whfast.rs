// WHFast - Wisdom-Holman symplectic mapping in democratic heliocentric coordinates
// Particle 0 is the central body; every other particle follows a Kepler orbit about it
// perturbed by planet-planet interaction kicks

use crate::diagnostics::{ConvergenceFailure, Diagnostics};
use crate::integrator::{fixed_substeps, Leapfrog};
use crate::kepler::kepler_drift;
use crate::physics_engine::{GravityModel, ParticleSystem, Vector3};

// =============================================================================
// DEMOCRATIC HELIOCENTRIC COORDINATES
// =============================================================================

/// Phase space split into heliocentric positions, barycentric velocities and
/// the uniformly moving barycenter. Slot 0 of `q` and `u` is unused.
#[derive(Debug, Clone)]
pub(crate) struct DemocraticHeliocentric {
    pub masses: Vec<f64>,
    pub q: Vec<Vector3>,
    pub u: Vec<Vector3>,
    pub r_cm: Vector3,
    pub v_cm: Vector3,
    pub total_mass: f64,
}

impl DemocraticHeliocentric {
    /// None when the central body cannot anchor Kepler orbits (no particles or m0 = 0)
    pub fn from_system(system: &ParticleSystem) -> Option<Self> {
        let particles = system.particles();
        let central = particles.first()?;
        if !(central.mass > 0.0) {
            return None;
        }

        let total_mass = system.total_mass();
        let (mr, mv) = system.mass_moments();
        let r_cm = mr * (1.0 / total_mass);
        let v_cm = mv * (1.0 / total_mass);

        let mut q = Vec::with_capacity(particles.len());
        let mut u = Vec::with_capacity(particles.len());
        q.push(Vector3::zero());
        u.push(Vector3::zero());
        for p in &particles[1..] {
            q.push(p.position - central.position);
            u.push(p.velocity - v_cm);
        }

        Some(Self {
            masses: system.masses(),
            q,
            u,
            r_cm,
            v_cm,
            total_mass,
        })
    }

    pub fn central_mass(&self) -> f64 {
        self.masses[0]
    }

    /// Rebuild inertial positions and velocities and store them in `system`
    pub fn write_back(&self, system: &mut ParticleSystem) {
        let m0 = self.central_mass();
        let mut mq = Vector3::zero();
        let mut mu = Vector3::zero();
        for i in 1..self.masses.len() {
            mq += self.q[i] * self.masses[i];
            mu += self.u[i] * self.masses[i];
        }

        let r0 = self.r_cm - mq * (1.0 / self.total_mass);
        let v0 = self.v_cm - mu * (1.0 / m0);

        let mut positions = Vec::with_capacity(self.masses.len());
        let mut velocities = Vec::with_capacity(self.masses.len());
        positions.push(r0);
        velocities.push(v0);
        for i in 1..self.masses.len() {
            positions.push(self.q[i] + r0);
            velocities.push(self.u[i] + self.v_cm);
        }
        system.set_phase_space(&positions, &velocities);
    }

    /// Planet-planet kick over `dt` for every pair accepted by `include`
    pub fn interaction_kick<F>(&mut self, gravity: &GravityModel, dt: f64, include: F)
    where
        F: Fn(usize, usize) -> bool,
    {
        let mut accelerations = vec![Vector3::zero(); self.q.len()];
        // i < j, so i > 0 excludes every pair involving the central body
        gravity.accumulate(&self.masses, &self.q, &mut accelerations, |i, j| {
            i > 0 && include(i, j)
        });
        for (u, a) in self.u.iter_mut().zip(accelerations.iter()).skip(1) {
            *u += *a * dt;
        }
    }

    /// Linear drift of heliocentric positions from the central body's momentum
    pub fn jump(&mut self, dt: f64) {
        let mut momentum = Vector3::zero();
        for i in 1..self.masses.len() {
            momentum += self.u[i] * self.masses[i];
        }
        let shift = momentum * (dt / self.central_mass());
        for q in self.q.iter_mut().skip(1) {
            *q += shift;
        }
    }

    /// Kepler drift about the central body for every particle not in `skip`
    pub fn kepler_drift<F>(
        &mut self,
        g: f64,
        dt: f64,
        time: f64,
        diagnostics: &mut Diagnostics,
        skip: F,
    ) where
        F: Fn(usize) -> bool,
    {
        let mu = g * self.central_mass();
        for i in 1..self.q.len() {
            if skip(i) {
                continue;
            }
            let outcome = kepler_drift(self.q[i], self.u[i], mu, dt);
            if !outcome.converged {
                diagnostics.report(
                    ConvergenceFailure::KeplerSolve,
                    time,
                    format!("particle {} drift used the sub-stepped fallback", i),
                );
            }
            self.q[i] = outcome.position;
            self.u[i] = outcome.velocity;
        }
    }

    pub fn advance_barycenter(&mut self, dt: f64) {
        self.r_cm += self.v_cm * dt;
    }
}

/// Leapfrog stand-in used when the central body is massless
pub(crate) fn reference_mass_fallback(
    system: &mut ParticleSystem,
    from: f64,
    to: f64,
    dt: f64,
    gravity: &GravityModel,
    diagnostics: &mut Diagnostics,
) {
    if system.total_mass() > 0.0 {
        diagnostics.report(
            ConvergenceFailure::ReferenceMass,
            from,
            "particle 0 is massless; integrated with leapfrog instead",
        );
    }
    Leapfrog::new(dt).advance(system, from, to, gravity);
}

// =============================================================================
// WHFAST
// =============================================================================

/// Fixed-step kick-drift-kick Wisdom-Holman integrator
pub struct WhFast {
    pub dt: f64,
}

impl WhFast {
    pub fn new(dt: f64) -> Self {
        Self { dt }
    }

    pub fn advance(
        &mut self,
        system: &mut ParticleSystem,
        from: f64,
        to: f64,
        gravity: &GravityModel,
        diagnostics: &mut Diagnostics,
    ) {
        if system.is_empty() {
            return;
        }
        let Some(mut dh) = DemocraticHeliocentric::from_system(system) else {
            reference_mass_fallback(system, from, to, self.dt, gravity, diagnostics);
            return;
        };

        let (n_steps, dt) = fixed_substeps(to - from, self.dt);
        let half_dt = 0.5 * dt;

        for step in 0..n_steps {
            let t = from + step as f64 * dt;
            dh.interaction_kick(gravity, half_dt, |_, _| true);
            dh.jump(half_dt);
            dh.kepler_drift(gravity.g, dt, t, diagnostics, |_| false);
            dh.jump(half_dt);
            dh.interaction_kick(gravity, half_dt, |_, _| true);
            dh.advance_barycenter(dt);
        }

        dh.write_back(system);
    }
}
