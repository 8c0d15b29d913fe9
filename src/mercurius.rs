// Mercurius - Hybrid symplectic integrator with close-encounter switching
// WHFast evolves every pair in the Nominal state; pairs inside a multiple of their
// mutual Hill radius are handed to an IAS15 sub-integrator until they separate

use crate::diagnostics::Diagnostics;
use crate::error::{Result, SimulationError};
use crate::ias15::Ias15;
use crate::integrator::fixed_substeps;
use crate::physics_engine::{GravityModel, ParticleSystem, Vector3};
use crate::whfast::{reference_mass_fallback, DemocraticHeliocentric};

/// Per-pair switching state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncounterState {
    Nominal,
    InEncounter,
}

impl EncounterState {
    /// Next state for a pair, given its current separation, the closest approach
    /// predicted over the coming step, and the enter/exit distances.
    ///
    /// Entering only needs the predicted approach to come inside `enter`; leaving
    /// needs both the current and predicted distance beyond the larger `exit`.
    pub fn transition(self, separation: f64, closest_approach: f64, enter: f64, exit: f64) -> Self {
        match self {
            EncounterState::Nominal if closest_approach < enter => EncounterState::InEncounter,
            EncounterState::InEncounter if separation > exit && closest_approach > exit => {
                EncounterState::Nominal
            }
            state => state,
        }
    }
}

/// Index of pair (i, j), i < j, in the packed upper triangle of an n x n matrix
fn pair_index(i: usize, j: usize, n: usize) -> usize {
    i * n - i * (i + 1) / 2 + (j - i - 1)
}

/// Mutual Hill radius of two bodies orbiting a central mass
pub fn mutual_hill_radius(m_i: f64, m_j: f64, central_mass: f64, r_i: f64, r_j: f64) -> f64 {
    ((m_i + m_j) / (3.0 * central_mass)).cbrt() * 0.5 * (r_i + r_j)
}

/// Minimum of |d + w s| for s in [0, dt]
fn closest_approach(separation: Vector3, relative_velocity: Vector3, dt: f64) -> f64 {
    let w2 = relative_velocity.magnitude_squared();
    if w2 == 0.0 {
        return separation.magnitude();
    }
    let s = (-separation.dot(&relative_velocity) / w2).clamp(0.0, dt);
    (separation + relative_velocity * s).magnitude()
}

pub struct Mercurius {
    pub dt: f64,
    /// Enter an encounter inside this many mutual Hill radii
    pub hill_enter: f64,
    /// Leave an encounter beyond this many mutual Hill radii
    pub hill_exit: f64,
    pairs: Vec<EncounterState>,
    particle_count: usize,
    encounter_integrator: Ias15,
    active: Vec<usize>,
    encounters_started: usize,
}

impl Mercurius {
    pub fn new(dt: f64, hill_enter: f64, hill_exit: f64, epsilon: f64) -> Self {
        Self {
            dt,
            hill_enter,
            hill_exit,
            pairs: Vec::new(),
            particle_count: 0,
            encounter_integrator: Ias15::new(epsilon, 0.0, dt),
            active: Vec::new(),
            encounters_started: 0,
        }
    }

    pub fn encounters_started(&self) -> usize {
        self.encounters_started
    }

    pub fn pair_state(&self, i: usize, j: usize) -> EncounterState {
        let (i, j) = if i < j { (i, j) } else { (j, i) };
        if i == j || j >= self.particle_count {
            return EncounterState::Nominal;
        }
        self.pairs[pair_index(i, j, self.particle_count)]
    }

    pub fn advance(
        &mut self,
        system: &mut ParticleSystem,
        from: f64,
        to: f64,
        gravity: &GravityModel,
        diagnostics: &mut Diagnostics,
    ) -> Result<()> {
        if system.is_empty() {
            return Ok(());
        }
        let Some(mut dh) = DemocraticHeliocentric::from_system(system) else {
            reference_mass_fallback(system, from, to, self.dt, gravity, diagnostics);
            return Ok(());
        };

        let n = system.len();
        if self.particle_count != n {
            self.particle_count = n;
            self.pairs = vec![EncounterState::Nominal; n * n.saturating_sub(1) / 2];
        }

        let (n_steps, dt) = fixed_substeps(to - from, self.dt);
        let half_dt = 0.5 * dt;

        for step in 0..n_steps {
            let t = from + step as f64 * dt;
            self.update_encounters(&dh, dt, t);

            // States are frozen for the whole step so both kicks exclude the same pairs
            let states = self.pairs.clone();
            let nominal = |i: usize, j: usize| states[pair_index(i, j, n)] == EncounterState::Nominal;

            let active: Vec<usize> = (1..n)
                .filter(|&i| {
                    (1..n).any(|j| {
                        j != i && states[pair_index(i.min(j), i.max(j), n)] == EncounterState::InEncounter
                    })
                })
                .collect();
            if active != self.active {
                self.encounter_integrator.reset(dt);
                self.active = active.clone();
            }

            dh.interaction_kick(gravity, half_dt, nominal);
            dh.jump(half_dt);
            dh.kepler_drift(gravity.g, dt, t, diagnostics, |i| active.binary_search(&i).is_ok());
            if !active.is_empty() {
                self.encounter_drift(&mut dh, &active, &states, gravity, t, dt, diagnostics)?;
            }
            dh.jump(half_dt);
            dh.interaction_kick(gravity, half_dt, nominal);
            dh.advance_barycenter(dt);
        }

        dh.write_back(system);
        Ok(())
    }

    fn update_encounters(&mut self, dh: &DemocraticHeliocentric, dt: f64, t: f64) {
        let n = self.particle_count;
        let m0 = dh.central_mass();

        for i in 1..n {
            for j in (i + 1)..n {
                let d = dh.q[j] - dh.q[i];
                let separation = d.magnitude();
                let closest = closest_approach(d, dh.u[j] - dh.u[i], dt);
                let hill = mutual_hill_radius(
                    dh.masses[i],
                    dh.masses[j],
                    m0,
                    dh.q[i].magnitude(),
                    dh.q[j].magnitude(),
                );

                let index = pair_index(i, j, n);
                let previous = self.pairs[index];
                let next = previous.transition(
                    separation,
                    closest,
                    self.hill_enter * hill,
                    self.hill_exit * hill,
                );
                if next != previous {
                    log::debug!(
                        "t = {}: pair ({}, {}) {:?} -> {:?} at separation {:.3e} ({:.2} Hill radii)",
                        t,
                        i,
                        j,
                        previous,
                        next,
                        separation,
                        separation / hill
                    );
                    if next == EncounterState::InEncounter {
                        self.encounters_started += 1;
                    }
                    self.pairs[index] = next;
                }
            }
        }
    }

    /// Kepler motion plus encounter-pair forces for the particles in `active`,
    /// integrated together with IAS15 over one drift
    #[allow(clippy::too_many_arguments)]
    fn encounter_drift(
        &mut self,
        dh: &mut DemocraticHeliocentric,
        active: &[usize],
        states: &[EncounterState],
        gravity: &GravityModel,
        t: f64,
        dt: f64,
        diagnostics: &mut Diagnostics,
    ) -> Result<()> {
        let n = self.particle_count;
        let mu = gravity.g * dh.central_mass();
        let masses: Vec<f64> = active.iter().map(|&i| dh.masses[i]).collect();
        let mut q: Vec<Vector3> = active.iter().map(|&i| dh.q[i]).collect();
        let mut u: Vec<Vector3> = active.iter().map(|&i| dh.u[i]).collect();

        self.encounter_integrator
            .integrate(&mut q, &mut u, t, t + dt, diagnostics, |x| {
                let mut accelerations: Vec<Vector3> = x
                    .iter()
                    .map(|p| {
                        let r2 = p.magnitude_squared();
                        *p * (-mu / (r2 * r2.sqrt()))
                    })
                    .collect();
                // `active` is sorted, so a < b maps to active[a] < active[b]
                gravity.accumulate(&masses, x, &mut accelerations, |a, b| {
                    states[pair_index(active[a], active[b], n)] == EncounterState::InEncounter
                });
                accelerations
            })
            .map_err(|err| match err {
                SimulationError::NumericalDivergence { time, particle } => {
                    SimulationError::NumericalDivergence {
                        time,
                        particle: active[particle],
                    }
                }
                other => other,
            })?;

        for (k, &i) in active.iter().enumerate() {
            dh.q[i] = q[k];
            dh.u[i] = u[k];
        }
        Ok(())
    }
}
