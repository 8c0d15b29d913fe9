// Physics Engine - Particle state and Newtonian gravity
// Implements the particle system, pairwise gravity, and conserved quantities

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

use crate::error::{Result, SimulationError};

// =============================================================================
// UNITS
// =============================================================================

/// Gravitational constant in natural units (AU, solar masses, year/2π).
/// One circular orbit at 1 AU around one solar mass takes 2π time units.
pub const G_NATURAL: f64 = 1.0;

// =============================================================================
// 3D VECTOR MATHEMATICS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub const fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn magnitude(&self) -> f64 {
        self.magnitude_squared().sqrt()
    }

    pub fn magnitude_squared(&self) -> f64 {
        self.x * self.x + self.y * self.y + self.z * self.z
    }

    pub fn dot(&self, other: &Vector3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(&self, other: &Vector3) -> Vector3 {
        Vector3 {
            x: self.y * other.z - self.z * other.y,
            y: self.z * other.x - self.x * other.z,
            z: self.x * other.y - self.y * other.x,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

impl From<[f64; 3]> for Vector3 {
    fn from(c: [f64; 3]) -> Self {
        Self::new(c[0], c[1], c[2])
    }
}

impl Add for Vector3 {
    type Output = Vector3;
    fn add(self, o: Vector3) -> Vector3 {
        Vector3::new(self.x + o.x, self.y + o.y, self.z + o.z)
    }
}

impl Sub for Vector3 {
    type Output = Vector3;
    fn sub(self, o: Vector3) -> Vector3 {
        Vector3::new(self.x - o.x, self.y - o.y, self.z - o.z)
    }
}

impl Mul<f64> for Vector3 {
    type Output = Vector3;
    fn mul(self, s: f64) -> Vector3 {
        Vector3::new(self.x * s, self.y * s, self.z * s)
    }
}

impl Neg for Vector3 {
    type Output = Vector3;
    fn neg(self) -> Vector3 {
        Vector3::new(-self.x, -self.y, -self.z)
    }
}

impl AddAssign for Vector3 {
    fn add_assign(&mut self, o: Vector3) {
        self.x += o.x;
        self.y += o.y;
        self.z += o.z;
    }
}

impl SubAssign for Vector3 {
    fn sub_assign(&mut self, o: Vector3) {
        self.x -= o.x;
        self.y -= o.y;
        self.z -= o.z;
    }
}

// =============================================================================
// PARTICLES
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Particle {
    /// Position in the system; stable for the lifetime of the system
    pub index: usize,
    pub mass: f64,
    pub position: Vector3,
    pub velocity: Vector3,
}

/// Ordered collection of particles. Indices are assigned on insertion and
/// never reused, so they line up with every array the engine produces.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParticleSystem {
    particles: Vec<Particle>,
}

impl ParticleSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a particle and return its index
    pub fn add(&mut self, mass: f64, position: Vector3, velocity: Vector3) -> Result<usize> {
        if !mass.is_finite() || mass < 0.0 {
            return Err(SimulationError::InvalidParticle(format!(
                "mass must be finite and non-negative, got {}",
                mass
            )));
        }
        if !position.is_finite() || !velocity.is_finite() {
            return Err(SimulationError::InvalidParticle(
                "position and velocity must be finite".to_string(),
            ));
        }

        let index = self.particles.len();
        self.particles.push(Particle {
            index,
            mass,
            position,
            velocity,
        });
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn particles_mut(&mut self) -> &mut [Particle] {
        &mut self.particles
    }

    pub fn masses(&self) -> Vec<f64> {
        self.particles.iter().map(|p| p.mass).collect()
    }

    pub fn positions(&self) -> Vec<Vector3> {
        self.particles.iter().map(|p| p.position).collect()
    }

    pub fn velocities(&self) -> Vec<Vector3> {
        self.particles.iter().map(|p| p.velocity).collect()
    }

    /// Overwrite positions and velocities, keeping masses and order
    pub fn set_phase_space(&mut self, positions: &[Vector3], velocities: &[Vector3]) {
        for ((p, x), v) in self
            .particles
            .iter_mut()
            .zip(positions.iter())
            .zip(velocities.iter())
        {
            p.position = *x;
            p.velocity = *v;
        }
    }

    pub fn total_mass(&self) -> f64 {
        self.particles.iter().map(|p| p.mass).sum()
    }

    /// Mass-weighted position and velocity sums (Σ m r, Σ m v)
    pub fn mass_moments(&self) -> (Vector3, Vector3) {
        self.particles
            .iter()
            .fold((Vector3::zero(), Vector3::zero()), |(r, v), p| {
                (r + p.position * p.mass, v + p.velocity * p.mass)
            })
    }

    /// Fail with NumericalDivergence on the first particle with a non-finite coordinate
    pub fn ensure_finite(&self, time: f64) -> Result<()> {
        match self
            .particles
            .iter()
            .find(|p| !p.position.is_finite() || !p.velocity.is_finite())
        {
            Some(p) => Err(SimulationError::NumericalDivergence {
                time,
                particle: p.index,
            }),
            None => Ok(()),
        }
    }
}

/// Shift the system into its barycentric frame: Σ m r = 0 and Σ m v = 0.
/// A system without mass has no barycenter and is left untouched.
pub fn move_to_center_of_momentum(system: &mut ParticleSystem) {
    let total_mass = system.total_mass();
    if total_mass <= 0.0 {
        return;
    }

    let (mr, mv) = system.mass_moments();
    let r_cm = mr * (1.0 / total_mass);
    let v_cm = mv * (1.0 / total_mass);

    for p in system.particles_mut() {
        p.position -= r_cm;
        p.velocity -= v_cm;
    }
}

// =============================================================================
// GRAVITY
// =============================================================================

/// Pairwise Newtonian gravity with optional Plummer softening.
/// Pairs are visited in index order (i < j) so sums are reproducible.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GravityModel {
    pub g: f64,
    pub softening: f64,
}

impl GravityModel {
    pub fn new(g: f64, softening: f64) -> Self {
        Self { g, softening }
    }

    /// Accelerations of all particles at the given positions
    pub fn accelerations(&self, masses: &[f64], positions: &[Vector3]) -> Vec<Vector3> {
        let mut out = vec![Vector3::zero(); positions.len()];
        self.accumulate(masses, positions, &mut out, |_, _| true);
        out
    }

    /// Add pairwise accelerations into `out` for every pair (i, j), i < j,
    /// accepted by `include`. `out` is not cleared.
    pub fn accumulate<F>(&self, masses: &[f64], positions: &[Vector3], out: &mut [Vector3], include: F)
    where
        F: Fn(usize, usize) -> bool,
    {
        let n = positions.len();
        let eps2 = self.softening * self.softening;

        for i in 0..n {
            for j in (i + 1)..n {
                if !include(i, j) {
                    continue;
                }
                let d = positions[j] - positions[i];
                let r2 = d.magnitude_squared() + eps2;
                let inv_r3 = 1.0 / (r2 * r2.sqrt());
                out[i] += d * (self.g * masses[j] * inv_r3);
                out[j] -= d * (self.g * masses[i] * inv_r3);
            }
        }
    }

    /// Softened potential energy -G Σ m_i m_j / sqrt(r² + ε²)
    pub fn potential_energy(&self, particles: &[Particle]) -> f64 {
        let eps2 = self.softening * self.softening;
        let mut potential = 0.0;
        for i in 0..particles.len() {
            for j in (i + 1)..particles.len() {
                let d = particles[j].position - particles[i].position;
                let r = (d.magnitude_squared() + eps2).sqrt();
                if r > 0.0 {
                    potential -= self.g * particles[i].mass * particles[j].mass / r;
                }
            }
        }
        potential
    }
}

// =============================================================================
// CONSERVED QUANTITIES (for drift monitoring)
// =============================================================================

pub fn kinetic_energy(particles: &[Particle]) -> f64 {
    particles
        .iter()
        .map(|p| 0.5 * p.mass * p.velocity.magnitude_squared())
        .sum()
}

/// Calculate total mechanical energy of the system
pub fn total_energy(particles: &[Particle], gravity: &GravityModel) -> f64 {
    kinetic_energy(particles) + gravity.potential_energy(particles)
}

/// Total angular momentum Σ m (r × v) about the origin
pub fn angular_momentum(particles: &[Particle]) -> Vector3 {
    particles
        .iter()
        .fold(Vector3::zero(), |acc, p| {
            acc + p.position.cross(&p.velocity) * p.mass
        })
}

// =============================================================================
// TESTS
// =============================================================================
