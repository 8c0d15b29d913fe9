// Bulirsch-Stoer - Gragg modified midpoint with Richardson extrapolation
// Each step is repeated with 2, 4, 6, ... sub-steps and extrapolated to zero step size

use crate::diagnostics::{ConvergenceFailure, Diagnostics};
use crate::error::{Result, SimulationError};
use crate::physics_engine::{GravityModel, ParticleSystem, Vector3};

/// Times a failing step may be halved before the best estimate is accepted
const MAX_STEP_REDUCTIONS: usize = 30;
const STEP_GROWTH: f64 = 1.5;
const STEP_SHRINK: f64 = 0.7;

#[derive(Debug, Clone)]
struct PhaseState {
    positions: Vec<Vector3>,
    velocities: Vec<Vector3>,
}

impl PhaseState {
    /// self + (self - previous) / factor, componentwise
    fn extrapolate(&self, previous: &PhaseState, factor: f64) -> PhaseState {
        PhaseState {
            positions: blend(&self.positions, &previous.positions, factor),
            velocities: blend(&self.velocities, &previous.velocities, factor),
        }
    }
}

fn blend(current: &[Vector3], previous: &[Vector3], factor: f64) -> Vec<Vector3> {
    current
        .iter()
        .zip(previous.iter())
        .map(|(x, y)| *x + (*x - *y) * (1.0 / factor))
        .collect()
}

/// Largest magnitude across both sets, or 1 when everything is zero
fn magnitude_scale(a: &[Vector3], b: &[Vector3]) -> f64 {
    let s = a
        .iter()
        .chain(b.iter())
        .map(|v| v.magnitude())
        .fold(0.0, f64::max);
    if s > 0.0 {
        s
    } else {
        1.0
    }
}

struct Extrapolated {
    state: PhaseState,
    error: f64,
    rows: usize,
}

pub struct BulirschStoer {
    /// Relative tolerance on the extrapolation error
    pub tolerance: f64,
    /// Rows in the extrapolation table
    pub max_order: usize,
    dt: f64,
}

impl BulirschStoer {
    pub fn new(tolerance: f64, max_order: usize, initial_dt: f64) -> Self {
        Self {
            tolerance,
            max_order: max_order.max(2),
            dt: initial_dt,
        }
    }

    pub fn advance(
        &mut self,
        system: &mut ParticleSystem,
        from: f64,
        to: f64,
        gravity: &GravityModel,
        diagnostics: &mut Diagnostics,
    ) -> Result<()> {
        let masses = system.masses();
        let mut state = PhaseState {
            positions: system.positions(),
            velocities: system.velocities(),
        };

        let mut t = from;
        while t < to {
            let remaining = to - t;
            if !(self.dt > 0.0) || !self.dt.is_finite() {
                self.dt = remaining;
            }
            let mut clamped = self.dt >= remaining;
            let mut big_step = if clamped { remaining } else { self.dt };
            let floor = 4.0 * f64::EPSILON * t.abs().max(1.0);
            let mut reductions = 0;

            let accepted = loop {
                let result = self.extrapolate(&state, big_step, &masses, gravity);
                if result.error <= 1.0 {
                    break result;
                }
                if reductions >= MAX_STEP_REDUCTIONS || big_step * 0.5 < floor {
                    diagnostics.report(
                        ConvergenceFailure::Extrapolation,
                        t,
                        format!(
                            "scaled error {:e} after {} step reductions (dt = {})",
                            result.error, reductions, big_step
                        ),
                    );
                    break result;
                }
                big_step *= 0.5;
                clamped = false;
                reductions += 1;
            };

            state = accepted.state;
            t = if clamped { to } else { t + big_step };

            if let Some(index) = state
                .positions
                .iter()
                .zip(state.velocities.iter())
                .position(|(x, v)| !x.is_finite() || !v.is_finite())
            {
                return Err(SimulationError::NumericalDivergence {
                    time: t,
                    particle: index,
                });
            }

            // Fast convergence grows the step, needing the whole table shrinks it
            let proposal = if accepted.rows <= self.max_order / 2 {
                big_step * STEP_GROWTH
            } else if accepted.rows >= self.max_order {
                big_step * STEP_SHRINK
            } else {
                big_step
            };
            // A shortened final step keeps the controller's step unless it had to shrink
            self.dt = if !clamped {
                proposal
            } else if accepted.rows >= self.max_order {
                self.dt.min(proposal)
            } else {
                self.dt
            };
        }

        system.set_phase_space(&state.positions, &state.velocities);
        Ok(())
    }

    /// Build the extrapolation table row by row until two successive diagonal
    /// entries agree to within tolerance, or the table is full.
    fn extrapolate(
        &self,
        start: &PhaseState,
        big_step: f64,
        masses: &[f64],
        gravity: &GravityModel,
    ) -> Extrapolated {
        let mut previous_row: Vec<PhaseState> = Vec::new();
        let mut error = f64::INFINITY;

        for k in 0..self.max_order {
            let substeps = 2 * (k + 1);
            let mut row = Vec::with_capacity(k + 1);
            row.push(modified_midpoint(start, big_step, substeps, masses, gravity));

            for j in 1..=k {
                let ratio = substeps as f64 / (2 * (k + 1 - j)) as f64;
                let next = row[j - 1].extrapolate(&previous_row[j - 1], ratio * ratio - 1.0);
                row.push(next);
            }

            if k > 0 {
                error = self.scaled_error(start, &row[k], &row[k - 1]);
                if error <= 1.0 {
                    return Extrapolated {
                        state: row.swap_remove(k),
                        error,
                        rows: k + 1,
                    };
                }
            }
            previous_row = row;
        }

        let rows = previous_row.len();
        Extrapolated {
            state: previous_row.swap_remove(rows - 1),
            error,
            rows,
        }
    }

    /// Largest componentwise difference relative to tolerance times the system scale
    fn scaled_error(&self, start: &PhaseState, best: &PhaseState, other: &PhaseState) -> f64 {
        let position_scale = self.tolerance * magnitude_scale(&start.positions, &best.positions);
        let velocity_scale = self.tolerance * magnitude_scale(&start.velocities, &best.velocities);

        let position_error = best
            .positions
            .iter()
            .zip(other.positions.iter())
            .map(|(a, b)| (*a - *b).magnitude() / position_scale)
            .fold(0.0, f64::max);
        let velocity_error = best
            .velocities
            .iter()
            .zip(other.velocities.iter())
            .map(|(a, b)| (*a - *b).magnitude() / velocity_scale)
            .fold(0.0, f64::max);

        let error = position_error.max(velocity_error);
        if error.is_nan() {
            f64::INFINITY
        } else {
            error
        }
    }
}

/// Gragg's modified midpoint over `big_step` with `substeps` equal sub-steps
fn modified_midpoint(
    start: &PhaseState,
    big_step: f64,
    substeps: usize,
    masses: &[f64],
    gravity: &GravityModel,
) -> PhaseState {
    let h = big_step / substeps as f64;
    let two_h = 2.0 * h;

    let a0 = gravity.accelerations(masses, &start.positions);
    let mut x_prev = start.positions.clone();
    let mut v_prev = start.velocities.clone();
    let mut x_curr: Vec<Vector3> = x_prev
        .iter()
        .zip(v_prev.iter())
        .map(|(x, v)| *x + *v * h)
        .collect();
    let mut v_curr: Vec<Vector3> = v_prev
        .iter()
        .zip(a0.iter())
        .map(|(v, a)| *v + *a * h)
        .collect();

    for _ in 1..substeps {
        let a = gravity.accelerations(masses, &x_curr);
        let x_next: Vec<Vector3> = x_prev
            .iter()
            .zip(v_curr.iter())
            .map(|(x, v)| *x + *v * two_h)
            .collect();
        let v_next: Vec<Vector3> = v_prev
            .iter()
            .zip(a.iter())
            .map(|(v, a)| *v + *a * two_h)
            .collect();
        x_prev = std::mem::replace(&mut x_curr, x_next);
        v_prev = std::mem::replace(&mut v_curr, v_next);
    }

    // Smoothing step
    let a_end = gravity.accelerations(masses, &x_curr);
    let positions = x_curr
        .iter()
        .zip(x_prev.iter())
        .zip(v_curr.iter())
        .map(|((xn, xp), vn)| (*xn + *xp + *vn * h) * 0.5)
        .collect();
    let velocities = v_curr
        .iter()
        .zip(v_prev.iter())
        .zip(a_end.iter())
        .map(|((vn, vp), an)| (*vn + *vp + *an * h) * 0.5)
        .collect();

    PhaseState {
        positions,
        velocities,
    }
}
