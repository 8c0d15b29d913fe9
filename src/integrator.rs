// Integrators - Closed set of time-stepping strategies
// Every strategy advances a ParticleSystem from one sample time to the next

use crate::bulirsch_stoer::BulirschStoer;
use crate::config::{IntegratorKind, SimulationConfig};
use crate::diagnostics::Diagnostics;
use crate::error::Result;
use crate::ias15::Ias15;
use crate::mercurius::Mercurius;
use crate::physics_engine::{GravityModel, ParticleSystem, Vector3};
use crate::whfast::WhFast;

/// The strategy chosen once at driver construction
pub enum Integrator {
    Leapfrog(Leapfrog),
    WhFast(WhFast),
    Ias15(Ias15),
    BulirschStoer(BulirschStoer),
    Mercurius(Mercurius),
    None,
}

impl Integrator {
    pub fn from_config(config: &SimulationConfig) -> Self {
        let dt = config.base_dt();
        match config.integrator {
            IntegratorKind::Leapfrog => Integrator::Leapfrog(Leapfrog::new(dt)),
            IntegratorKind::WhFast => Integrator::WhFast(WhFast::new(dt)),
            IntegratorKind::Ias15 => {
                Integrator::Ias15(Ias15::new(config.ias15_epsilon, config.ias15_min_dt, dt))
            }
            IntegratorKind::BulirschStoer => Integrator::BulirschStoer(BulirschStoer::new(
                config.bs_tolerance,
                config.bs_max_order,
                dt,
            )),
            IntegratorKind::Mercurius => Integrator::Mercurius(Mercurius::new(
                dt,
                config.mercurius_hill_enter,
                config.mercurius_hill_exit,
                config.ias15_epsilon,
            )),
            IntegratorKind::None => Integrator::None,
        }
    }

    pub fn kind(&self) -> IntegratorKind {
        match self {
            Integrator::Leapfrog(_) => IntegratorKind::Leapfrog,
            Integrator::WhFast(_) => IntegratorKind::WhFast,
            Integrator::Ias15(_) => IntegratorKind::Ias15,
            Integrator::BulirschStoer(_) => IntegratorKind::BulirschStoer,
            Integrator::Mercurius(_) => IntegratorKind::Mercurius,
            Integrator::None => IntegratorKind::None,
        }
    }

    /// Mutate `system` from its state at `from` to its state at `to`.
    ///
    /// Strategies may sub-step internally. Fails with NumericalDivergence if any
    /// coordinate comes out non-finite; recoverable convergence problems are
    /// reported to `diagnostics` instead.
    pub fn advance(
        &mut self,
        system: &mut ParticleSystem,
        from: f64,
        to: f64,
        gravity: &GravityModel,
        diagnostics: &mut Diagnostics,
    ) -> Result<()> {
        if to <= from {
            return Ok(());
        }

        match self {
            Integrator::Leapfrog(lf) => lf.advance(system, from, to, gravity),
            Integrator::WhFast(wh) => wh.advance(system, from, to, gravity, diagnostics),
            Integrator::Ias15(ias) => ias.advance(system, from, to, gravity, diagnostics)?,
            Integrator::BulirschStoer(bs) => bs.advance(system, from, to, gravity, diagnostics)?,
            Integrator::Mercurius(merc) => merc.advance(system, from, to, gravity, diagnostics)?,
            Integrator::None => {}
        }

        system.ensure_finite(to)
    }

    /// Close encounters entered so far (Mercurius only)
    pub fn encounter_count(&self) -> Option<usize> {
        match self {
            Integrator::Mercurius(merc) => Some(merc.encounters_started()),
            _ => None,
        }
    }
}

/// Split `span` into the fewest equal sub-steps no longer than `dt`
pub(crate) fn fixed_substeps(span: f64, dt: f64) -> (usize, f64) {
    if !(dt > 0.0) || !dt.is_finite() {
        return (1, span);
    }
    // The small offset keeps exact multiples from gaining an extra step to rounding
    let n = ((span / dt) * (1.0 - 1e-12)).ceil().max(1.0) as usize;
    (n, span / n as f64)
}

// =============================================================================
// LEAPFROG (kick-drift-kick, symplectic)
// =============================================================================

/// Fixed-step second order symplectic integrator.
///
/// 1. Kick: v(t + dt/2) = v(t) + a(t) * dt/2
/// 2. Drift: x(t + dt) = x(t) + v(t + dt/2) * dt
/// 3. Kick: v(t + dt) = v(t + dt/2) + a(t + dt) * dt/2
pub struct Leapfrog {
    /// Nominal step; each sample interval is split into equal steps no longer than this
    pub dt: f64,
}

impl Leapfrog {
    pub fn new(dt: f64) -> Self {
        Self { dt }
    }

    pub fn advance(&self, system: &mut ParticleSystem, from: f64, to: f64, gravity: &GravityModel) {
        let masses = system.masses();
        let mut positions = system.positions();
        let mut velocities = system.velocities();

        self.step_span(&masses, &mut positions, &mut velocities, to - from, gravity);

        system.set_phase_space(&positions, &velocities);
    }

    pub(crate) fn step_span(
        &self,
        masses: &[f64],
        positions: &mut [Vector3],
        velocities: &mut [Vector3],
        span: f64,
        gravity: &GravityModel,
    ) {
        let (n_steps, dt) = fixed_substeps(span, self.dt);
        let half_dt = 0.5 * dt;

        // a(t) is reused from the end of the previous step
        let mut accelerations = gravity.accelerations(masses, positions);

        for _ in 0..n_steps {
            for (v, a) in velocities.iter_mut().zip(accelerations.iter()) {
                *v += *a * half_dt;
            }
            for (x, v) in positions.iter_mut().zip(velocities.iter()) {
                *x += *v * dt;
            }
            accelerations = gravity.accelerations(masses, positions);
            for (v, a) in velocities.iter_mut().zip(accelerations.iter()) {
                *v += *a * half_dt;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics_engine::{angular_momentum, total_energy};

    fn kepler_pair() -> ParticleSystem {
        let mut system = ParticleSystem::new();
        system.add(1.0, Vector3::zero(), Vector3::zero()).unwrap();
        system
            .add(1e-6, Vector3::new(1.0, 0.0, 0.0), Vector3::new(0.0, 1.0, 0.0))
            .unwrap();
        system
    }

    #[test]
    fn test_fixed_substeps_lands_on_interval() {
        let (n, h) = fixed_substeps(1.0, 0.3);
        assert_eq!(n, 4);
        assert!((h * n as f64 - 1.0).abs() < 1e-15);

        // Exact multiples do not gain a spurious extra step
        let (n, _) = fixed_substeps(1.0, 0.1);
        assert_eq!(n, 10);
    }

    #[test]
    fn test_substeps_follow_sample_interval() {
        let config = SimulationConfig::new(10.0, 5, IntegratorKind::Leapfrog, false);
        let interval = config.sample_times()[1];
        let (n, h) = fixed_substeps(interval, config.base_dt());
        assert_eq!(config.base_dt(), 2.0);
        assert_eq!(n, 2);
        assert_eq!(h, 1.25);
    }

    #[test]
    fn test_leapfrog_conserves_energy() {
        let mut system = kepler_pair();
        let gravity = GravityModel::new(1.0, 0.0);
        let initial_energy = total_energy(system.particles(), &gravity);
        let initial_l = angular_momentum(system.particles());

        let integrator = Leapfrog::new(0.01);
        integrator.advance(&mut system, 0.0, 10.0, &gravity);

        let drift = ((total_energy(system.particles(), &gravity) - initial_energy)
            / initial_energy)
            .abs();
        assert!(drift < 1e-4, "Energy drift too high: {}", drift);

        // Central pairwise forces conserve angular momentum to round-off
        let l = angular_momentum(system.particles());
        assert!((l - initial_l).magnitude() < 1e-15);
    }

    #[test]
    fn test_none_leaves_system_untouched() {
        let mut system = kepler_pair();
        let before = system.positions();
        let mut integrator = Integrator::None;
        let mut diagnostics = Diagnostics::new();

        integrator
            .advance(&mut system, 0.0, 5.0, &GravityModel::new(1.0, 0.0), &mut diagnostics)
            .unwrap();
        assert_eq!(system.positions(), before);
    }

    #[test]
    fn test_advance_detects_divergence() {
        // Two coincident massive particles produce infinite accelerations
        let mut system = ParticleSystem::new();
        system.add(1.0, Vector3::zero(), Vector3::zero()).unwrap();
        system.add(1.0, Vector3::zero(), Vector3::zero()).unwrap();

        let mut integrator = Integrator::Leapfrog(Leapfrog::new(0.1));
        let mut diagnostics = Diagnostics::new();
        let result = integrator.advance(
            &mut system,
            0.0,
            1.0,
            &GravityModel::new(1.0, 0.0),
            &mut diagnostics,
        );
        assert!(matches!(
            result,
            Err(crate::error::SimulationError::NumericalDivergence { .. })
        ));
    }
}
