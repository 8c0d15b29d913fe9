// IAS15 - 15th order adaptive integrator on Gauss-Radau spacings
// Predictor-corrector on a 7-term acceleration polynomial with step control
// from the shortest per-particle timescale of that polynomial (Pham, Rein & Spiegel 2024)

use crate::diagnostics::{ConvergenceFailure, Diagnostics};
use crate::error::{Result, SimulationError};
use crate::physics_engine::{GravityModel, ParticleSystem, Vector3};

/// Accept a step unless the proposed next step shrinks below this fraction of it
const SAFETY_FACTOR: f64 = 0.25;
/// Predictor-corrector iterations before the step is taken as-is
const MAX_ITERATIONS: usize = 12;
const PREDICTOR_CORRECTOR_TOLERANCE: f64 = 1e-16;
/// Larger step ratios make the polynomial extrapolation worthless
const MAX_PREDICTION_RATIO: f64 = 20.0;
/// Smallest step as a fraction of the interval passed to `integrate`
const MIN_RELATIVE_STEP: f64 = 1e-12;
/// Consecutive steps pinned at the floor before the floor is raised
const MAX_FLOOR_STEPS: usize = 100;
const FLOOR_GROWTH: f64 = 10.0;

/// Gauss-Radau spacings on [0, 1]
const RADAU_SPACINGS: [f64; 8] = [
    0.0,
    0.0562625605369221464656521910318,
    0.180240691736892364987579942780,
    0.352624717113169637373907769648,
    0.547153626330555383001448554766,
    0.734210177215410531523210605558,
    0.885320946839095768090359771030,
    0.977520613561287501891174488626,
];

/// Change-of-basis matrices between the divided differences g and the
/// polynomial coefficients b: b_k = Σ_j c[j][k] g_j and g_j = Σ_k d[k][j] b_k
#[derive(Debug, Clone, Copy)]
struct RadauCoefficients {
    c: [[f64; 7]; 7],
    d: [[f64; 7]; 7],
}

impl RadauCoefficients {
    fn new() -> Self {
        let h = RADAU_SPACINGS;
        let mut c = [[0.0; 7]; 7];
        let mut d = [[0.0; 7]; 7];
        c[0][0] = 1.0;
        d[0][0] = 1.0;

        for j in 1..7 {
            c[j][j] = 1.0;
            d[j][j] = 1.0;
            c[j][0] = -h[j] * c[j - 1][0];
            d[j][0] = h[1] * d[j - 1][0];
            for k in 1..j {
                c[j][k] = c[j - 1][k - 1] - h[j] * c[j - 1][k];
                d[j][k] = d[j - 1][k - 1] + h[k + 1] * d[j - 1][k];
            }
        }

        Self { c, d }
    }
}

enum StepOutcome {
    /// `at_floor` is set when the controller wanted a step below the floor
    Accepted { dt_next: f64, at_floor: bool },
    Rejected { dt_next: f64 },
}

pub struct Ias15 {
    /// Accuracy parameter; steps scale as epsilon^(1/7) times the shortest timescale
    pub epsilon: f64,
    /// Absolute floor for the adaptive step. The effective floor is never below
    /// a small fraction of the integrated interval.
    pub min_dt: f64,
    dt: f64,
    dt_last_done: f64,
    coefficients: RadauCoefficients,
    b: Vec<[f64; 7]>,
    g: Vec<[f64; 7]>,
    e: Vec<[f64; 7]>,
    // Copies of b and e from the last accepted step, used after rejections
    br: Vec<[f64; 7]>,
    er: Vec<[f64; 7]>,
    // Compensated summation residuals
    csx: Vec<f64>,
    csv: Vec<f64>,
}

impl Ias15 {
    pub fn new(epsilon: f64, min_dt: f64, initial_dt: f64) -> Self {
        Self {
            epsilon,
            min_dt,
            dt: initial_dt,
            dt_last_done: 0.0,
            coefficients: RadauCoefficients::new(),
            b: Vec::new(),
            g: Vec::new(),
            e: Vec::new(),
            br: Vec::new(),
            er: Vec::new(),
            csx: Vec::new(),
            csv: Vec::new(),
        }
    }

    /// Next step size the controller will try
    pub fn step_size(&self) -> f64 {
        self.dt
    }

    /// Forget all predictor state, e.g. when the integrated set of bodies changes
    pub fn reset(&mut self, initial_dt: f64) {
        self.dt = initial_dt;
        self.dt_last_done = 0.0;
        self.b.clear();
        self.g.clear();
        self.e.clear();
        self.br.clear();
        self.er.clear();
        self.csx.clear();
        self.csv.clear();
    }

    fn ensure_dimension(&mut self, n3: usize) {
        if self.b.len() == n3 {
            return;
        }
        let dt = self.dt;
        self.reset(dt);
        self.b = vec![[0.0; 7]; n3];
        self.g = vec![[0.0; 7]; n3];
        self.e = vec![[0.0; 7]; n3];
        self.br = vec![[0.0; 7]; n3];
        self.er = vec![[0.0; 7]; n3];
        self.csx = vec![0.0; n3];
        self.csv = vec![0.0; n3];
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
        let mut positions = system.positions();
        let mut velocities = system.velocities();

        self.integrate(&mut positions, &mut velocities, from, to, diagnostics, |x| {
            gravity.accelerations(&masses, x)
        })?;

        system.set_phase_space(&positions, &velocities);
        Ok(())
    }

    /// Integrate a velocity-independent force field from `from` to exactly `to`.
    ///
    /// `accelerations` maps positions to accelerations. Particle indices in a
    /// NumericalDivergence error refer to the slices passed in.
    pub fn integrate<F>(
        &mut self,
        positions: &mut [Vector3],
        velocities: &mut [Vector3],
        from: f64,
        to: f64,
        diagnostics: &mut Diagnostics,
        mut accelerations: F,
    ) -> Result<()>
    where
        F: FnMut(&[Vector3]) -> Vec<Vector3>,
    {
        let mut x = flatten(positions);
        let mut v = flatten(velocities);
        self.ensure_dimension(x.len());

        let mut floor = self.min_dt.max(MIN_RELATIVE_STEP * (to - from));
        let mut floor_steps = 0;

        let mut t = from;
        while t < to {
            let remaining = to - t;
            if !(self.dt > 0.0) || !self.dt.is_finite() {
                self.dt = remaining;
            }
            let clamped = self.dt >= remaining;
            let dt = if clamped { remaining } else { self.dt };
            let step_floor = floor.max(4.0 * f64::EPSILON * t.abs().max(1.0));

            match self.try_step(&mut x, &mut v, dt, t, step_floor, diagnostics, &mut accelerations) {
                StepOutcome::Accepted { dt_next, at_floor } => {
                    t = if clamped { to } else { t + dt };

                    // A controller pinned at the floor would never reach `to`
                    floor_steps = if at_floor { floor_steps + 1 } else { 0 };
                    if floor_steps >= MAX_FLOOR_STEPS {
                        floor *= FLOOR_GROWTH;
                        floor_steps = 0;
                        diagnostics.report(
                            ConvergenceFailure::StepSizeFloor,
                            t,
                            format!(
                                "{} consecutive steps at the floor, raised it to {:e}",
                                MAX_FLOOR_STEPS, floor
                            ),
                        );
                    }

                    // A shortened final step only informs the controller when it had to shrink
                    self.dt = if clamped && dt_next >= dt {
                        self.dt.max(dt_next)
                    } else {
                        dt_next
                    };

                    if let Some(index) = first_non_finite(&x, &v) {
                        return Err(SimulationError::NumericalDivergence {
                            time: t,
                            particle: index / 3,
                        });
                    }
                }
                StepOutcome::Rejected { dt_next } => {
                    log::trace!("IAS15 rejected step {} at t = {}, retrying with {}", dt, t, dt_next);
                    self.dt = dt_next;
                }
            }
        }

        write_vectors(&x, positions);
        write_vectors(&v, velocities);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn try_step<F>(
        &mut self,
        x0: &mut [f64],
        v0: &mut [f64],
        dt: f64,
        t: f64,
        floor: f64,
        diagnostics: &mut Diagnostics,
        accelerations: &mut F,
    ) -> StepOutcome
    where
        F: FnMut(&[Vector3]) -> Vec<Vector3>,
    {
        let n3 = x0.len();
        let h = RADAU_SPACINGS;
        let RadauCoefficients { c, d } = self.coefficients;

        let a0 = flatten(&accelerations(&unflatten(x0)));

        // Divided differences consistent with the predicted coefficients
        for i in 0..n3 {
            let b = self.b[i];
            for j in 0..7 {
                self.g[i][j] = (j..7).map(|k| d[k][j] * b[k]).sum();
            }
        }

        let mut xs = vec![0.0; n3];
        let mut pc_error = f64::INFINITY;
        let mut pc_error_last = 2.0;
        let mut iterations = 0;

        loop {
            if pc_error < PREDICTOR_CORRECTOR_TOLERANCE {
                break;
            }
            if iterations > 2 && pc_error_last <= pc_error {
                break;
            }
            if iterations >= MAX_ITERATIONS {
                diagnostics.report(
                    ConvergenceFailure::PredictorCorrector,
                    t,
                    format!("no convergence after {} iterations (dt = {})", MAX_ITERATIONS, dt),
                );
                break;
            }
            pc_error_last = pc_error;
            iterations += 1;

            let mut max_delta: f64 = 0.0;
            let mut max_accel: f64 = 0.0;

            for n in 1..8 {
                let s = h[n];
                let sdt = s * dt;
                for i in 0..n3 {
                    let b = &self.b[i];
                    xs[i] = x0[i]
                        + sdt * v0[i]
                        + sdt
                            * sdt
                            * (a0[i] / 2.0
                                + s * (b[0] / 6.0
                                    + s * (b[1] / 12.0
                                        + s * (b[2] / 20.0
                                            + s * (b[3] / 30.0
                                                + s * (b[4] / 42.0
                                                    + s * (b[5] / 56.0 + s * b[6] / 72.0)))))));
                }

                let at = flatten(&accelerations(&unflatten(&xs)));

                for i in 0..n3 {
                    let mut g_new = at[i] - a0[i];
                    for k in 0..(n - 1) {
                        g_new = g_new / (h[n] - h[k]) - self.g[i][k];
                    }
                    g_new /= h[n] - h[n - 1];

                    let delta = g_new - self.g[i][n - 1];
                    self.g[i][n - 1] = g_new;
                    for k in 0..n {
                        self.b[i][k] += c[n - 1][k] * delta;
                    }

                    if n == 7 {
                        max_delta = max_delta.max(delta.abs());
                        if at[i].is_normal() {
                            max_accel = max_accel.max(at[i].abs());
                        }
                    }
                }
            }

            pc_error = if max_accel > 0.0 {
                max_delta / max_accel
            } else {
                0.0
            };
        }

        // Shortest timescale (in units of dt) of any particle's acceleration
        // polynomial, from its value and first two derivatives at the step end.
        // Low order terms keep this estimate clear of round-off noise in b6.
        let timescale = min_timescale(&a0, &self.b);
        let mut dt_next = match timescale {
            Some(tau) if self.epsilon > 0.0 => tau * dt * (self.epsilon * 5040.0).powf(1.0 / 7.0),
            _ => dt / SAFETY_FACTOR,
        };

        let at_floor = dt_next <= floor;
        if dt_next / dt < SAFETY_FACTOR {
            if dt > floor {
                self.restore_predictions(dt_next);
                return StepOutcome::Rejected {
                    dt_next: dt_next.max(floor),
                };
            }
            diagnostics.report(
                ConvergenceFailure::StepSizeFloor,
                t,
                format!("step {} accepted at the floor (controller wanted {:e})", dt, dt_next),
            );
        }
        dt_next = dt_next.max(floor);
        if dt_next / dt > 1.0 / SAFETY_FACTOR {
            dt_next = dt / SAFETY_FACTOR;
        }

        for i in 0..n3 {
            let b = self.b[i];
            let dx = dt * v0[i]
                + dt * dt
                    * (a0[i] / 2.0
                        + b[0] / 6.0
                        + b[1] / 12.0
                        + b[2] / 20.0
                        + b[3] / 30.0
                        + b[4] / 42.0
                        + b[5] / 56.0
                        + b[6] / 72.0);
            add_compensated(&mut x0[i], &mut self.csx[i], dx);

            let dv = dt
                * (a0[i]
                    + b[0] / 2.0
                    + b[1] / 3.0
                    + b[2] / 4.0
                    + b[3] / 5.0
                    + b[4] / 6.0
                    + b[5] / 7.0
                    + b[6] / 8.0);
            add_compensated(&mut v0[i], &mut self.csv[i], dv);
        }

        self.dt_last_done = dt;
        self.er.copy_from_slice(&self.e);
        self.br.copy_from_slice(&self.b);
        self.predict_next_step(dt_next / dt, false);

        StepOutcome::Accepted { dt_next, at_floor }
    }

    /// After a rejection, extrapolate again from the last accepted step
    fn restore_predictions(&mut self, dt_next: f64) {
        if self.dt_last_done != 0.0 {
            self.predict_next_step(dt_next / self.dt_last_done, true);
        } else {
            for i in 0..self.b.len() {
                self.b[i] = [0.0; 7];
                self.e[i] = [0.0; 7];
            }
        }
    }

    /// Extrapolate the acceleration polynomial to a step `ratio` times longer.
    /// `from_saved` selects the copies taken at the last accepted step.
    fn predict_next_step(&mut self, ratio: f64, from_saved: bool) {
        if ratio > MAX_PREDICTION_RATIO {
            for i in 0..self.b.len() {
                self.b[i] = [0.0; 7];
                self.e[i] = [0.0; 7];
            }
            return;
        }

        let mut q = [0.0; 7];
        q[0] = ratio;
        for j in 1..7 {
            q[j] = q[j - 1] * ratio;
        }

        for i in 0..self.b.len() {
            let (b_src, e_src) = if from_saved {
                (self.br[i], self.er[i])
            } else {
                (self.b[i], self.e[i])
            };

            for j in 0..7 {
                let predicted: f64 = (j..7).map(|k| binomial(k + 1, j + 1) * b_src[k]).sum();
                let e_new = q[j] * predicted;
                self.b[i][j] = e_new + (b_src[j] - e_src[j]);
                self.e[i][j] = e_new;
            }
        }
    }
}

/// Minimum over particles of sqrt(2 y2 / (y3 + sqrt(y2 y4))), where y2, y3 and
/// y4 are the squared norms of the acceleration and its first and second
/// derivatives at the end of the step. Particles without acceleration are skipped.
fn min_timescale(a0: &[f64], b: &[[f64; 7]]) -> Option<f64> {
    let mut min_tau2 = f64::INFINITY;

    for (a, coefficients) in a0.chunks_exact(3).zip(b.chunks_exact(3)) {
        let (mut a0_2, mut y2, mut y3, mut y4) = (0.0_f64, 0.0_f64, 0.0_f64, 0.0_f64);
        for (&a_k, p) in a.iter().zip(coefficients.iter()) {
            a0_2 += a_k * a_k;
            let value = a_k + p[0] + p[1] + p[2] + p[3] + p[4] + p[5] + p[6];
            let first = p[0]
                + 2.0 * p[1]
                + 3.0 * p[2]
                + 4.0 * p[3]
                + 5.0 * p[4]
                + 6.0 * p[5]
                + 7.0 * p[6];
            let second =
                2.0 * p[1] + 6.0 * p[2] + 12.0 * p[3] + 20.0 * p[4] + 30.0 * p[5] + 42.0 * p[6];
            y2 += value * value;
            y3 += first * first;
            y4 += second * second;
        }
        if !a0_2.is_normal() {
            continue;
        }
        let tau2 = 2.0 * y2 / (y3 + (y2 * y4).sqrt());
        if tau2.is_normal() && tau2 < min_tau2 {
            min_tau2 = tau2;
        }
    }

    if min_tau2.is_finite() {
        Some(min_tau2.sqrt())
    } else {
        None
    }
}

fn binomial(n: usize, k: usize) -> f64 {
    (0..k).fold(1.0, |acc, i| acc * (n - i) as f64 / (i + 1) as f64)
}

/// Kahan summation of `increment` into `value`
fn add_compensated(value: &mut f64, residual: &mut f64, increment: f64) {
    let y = increment - *residual;
    let t = *value + y;
    *residual = (t - *value) - y;
    *value = t;
}

fn flatten(vectors: &[Vector3]) -> Vec<f64> {
    vectors.iter().flat_map(|v| v.to_array()).collect()
}

fn unflatten(values: &[f64]) -> Vec<Vector3> {
    values
        .chunks_exact(3)
        .map(|c| Vector3::new(c[0], c[1], c[2]))
        .collect()
}

fn write_vectors(values: &[f64], out: &mut [Vector3]) {
    for (v, c) in out.iter_mut().zip(values.chunks_exact(3)) {
        *v = Vector3::new(c[0], c[1], c[2]);
    }
}

fn first_non_finite(x: &[f64], v: &[f64]) -> Option<usize> {
    x.iter()
        .zip(v.iter())
        .position(|(a, b)| !a.is_finite() || !b.is_finite())
}
