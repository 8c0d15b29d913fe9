// Simulation Driver - Configure once, add particles, run once
// Walks the particle system through evenly spaced sample times with the chosen integrator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{IntegratorKind, Scenario, SimulationConfig};
use crate::diagnostics::{AccuracyWarning, Diagnostics};
use crate::error::{Result, SimulationError};
use crate::integrator::Integrator;
use crate::physics_engine::{
    move_to_center_of_momentum, total_energy, GravityModel, ParticleSystem, Vector3,
};
use crate::state_manager::{CancelFlag, RunProgress};
use crate::trajectory::{Trajectory, TrajectoryRecorder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunPhase {
    /// Particles may still be added
    Setup,
    Running,
    /// The run ended (completed, cancelled or diverged); state is frozen
    Finished,
}

/// Summary of a finished run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub integrator: IntegratorKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub final_time: f64,
    pub initial_energy: f64,
    pub final_energy: f64,
    /// |E - E0| / |E0|, or absolute when E0 = 0
    pub energy_error: f64,
    /// Close encounters entered (Mercurius only)
    pub close_encounters: Option<usize>,
    pub degraded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationOutput {
    pub trajectory: Trajectory,
    pub particle_count: usize,
    pub warnings: Vec<AccuracyWarning>,
    pub report: RunReport,
}

pub struct NBodySimulation {
    config: SimulationConfig,
    system: ParticleSystem,
    integrator: Integrator,
    gravity: GravityModel,
    diagnostics: Diagnostics,
    phase: RunPhase,
    time: f64,
}

impl NBodySimulation {
    /// Validate `config` and set up an empty system. Fails with InvalidConfig.
    pub fn initialize(config: SimulationConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            integrator: Integrator::from_config(&config),
            gravity: config.gravity(),
            config,
            system: ParticleSystem::new(),
            diagnostics: Diagnostics::new(),
            phase: RunPhase::Setup,
            time: 0.0,
        })
    }

    pub fn from_scenario(scenario: Scenario) -> Result<Self> {
        let mut simulation = Self::initialize(scenario.config)?;
        for p in &scenario.particles {
            let [x, y, z] = p.position;
            let [vx, vy, vz] = p.velocity;
            simulation.add_particle(p.mass, x, y, z, vx, vy, vz)?;
        }
        Ok(simulation)
    }

    /// Append a particle and return its index. Only allowed before the run starts.
    #[allow(clippy::too_many_arguments)]
    pub fn add_particle(
        &mut self,
        mass: f64,
        x: f64,
        y: f64,
        z: f64,
        vx: f64,
        vy: f64,
        vz: f64,
    ) -> Result<usize> {
        if self.phase != RunPhase::Setup {
            return Err(SimulationError::InvalidState(
                "particles cannot be added once a run has started".to_string(),
            ));
        }
        self.system
            .add(mass, Vector3::new(x, y, z), Vector3::new(vx, vy, vz))
    }

    pub fn particle_count(&self) -> usize {
        self.system.len()
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn system(&self) -> &ParticleSystem {
        &self.system
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Simulation time of the current system state
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn warnings(&self) -> Vec<AccuracyWarning> {
        self.diagnostics.clone().into_warnings()
    }

    /// Sample `steps` evenly spaced positions over [0, duration]
    pub fn run(&mut self) -> Result<SimulationOutput> {
        self.run_with(&CancelFlag::new(), |_| {})
    }

    /// Like `run`, checking `cancel` before each advance and reporting every
    /// recorded sample to `on_sample`
    pub fn run_with<F>(&mut self, cancel: &CancelFlag, mut on_sample: F) -> Result<SimulationOutput>
    where
        F: FnMut(RunProgress),
    {
        let started_at = Utc::now();
        let initial_energy = self.begin()?;

        let sampled = self.sample(cancel, &mut on_sample);
        self.phase = RunPhase::Finished;
        let trajectory = sampled?;

        Ok(SimulationOutput {
            trajectory,
            particle_count: self.system.len(),
            warnings: self.warnings(),
            report: self.report(started_at, initial_energy),
        })
    }

    /// Integrate straight to `duration` without recording samples
    pub fn simulate(&mut self) -> Result<RunReport> {
        let started_at = Utc::now();
        let initial_energy = self.begin()?;

        let duration = self.config.duration;
        let advanced = self.integrator.advance(
            &mut self.system,
            0.0,
            duration,
            &self.gravity,
            &mut self.diagnostics,
        );
        self.phase = RunPhase::Finished;
        advanced?;
        self.time = duration;

        Ok(self.report(started_at, initial_energy))
    }

    /// Lock the system, apply the barycentric shift and return the initial energy
    fn begin(&mut self) -> Result<f64> {
        if self.phase != RunPhase::Setup {
            return Err(SimulationError::InvalidState(
                "a simulation can only be run once".to_string(),
            ));
        }
        self.phase = RunPhase::Running;

        if self.config.center {
            move_to_center_of_momentum(&mut self.system);
        }

        log::info!(
            "Starting {} run: N = {}, duration = {}, steps = {}",
            self.integrator.kind(),
            self.system.len(),
            self.config.duration,
            self.config.steps
        );
        Ok(total_energy(self.system.particles(), &self.gravity))
    }

    fn sample<F>(&mut self, cancel: &CancelFlag, on_sample: &mut F) -> Result<Trajectory>
    where
        F: FnMut(RunProgress),
    {
        let times = self.config.sample_times();
        let total = times.len();
        let mut recorder = TrajectoryRecorder::new(self.system.len(), total);

        if let Some(&first) = times.first() {
            recorder.record(first, &self.system);
            on_sample(RunProgress {
                completed: 1,
                total,
                time: first,
            });
        }

        for window in times.windows(2) {
            let completed = recorder.recorded();
            if cancel.is_cancelled() {
                log::info!("Run cancelled after {} of {} samples", completed, total);
                return Err(SimulationError::Cancelled { completed, total });
            }

            let (from, to) = (window[0], window[1]);
            self.integrator.advance(
                &mut self.system,
                from,
                to,
                &self.gravity,
                &mut self.diagnostics,
            )?;
            self.time = to;

            recorder.record(to, &self.system);
            on_sample(RunProgress {
                completed: completed + 1,
                total,
                time: to,
            });
        }

        recorder.finish()
    }

    fn report(&self, started_at: DateTime<Utc>, initial_energy: f64) -> RunReport {
        let final_energy = total_energy(self.system.particles(), &self.gravity);
        let energy_error = if initial_energy != 0.0 {
            ((final_energy - initial_energy) / initial_energy).abs()
        } else {
            (final_energy - initial_energy).abs()
        };

        log::info!(
            "{} run finished at t = {} (relative energy error {:.3e})",
            self.integrator.kind(),
            self.time,
            energy_error
        );

        RunReport {
            integrator: self.integrator.kind(),
            started_at,
            finished_at: Utc::now(),
            final_time: self.time,
            initial_energy,
            final_energy,
            energy_error,
            close_encounters: self.integrator.encounter_count(),
            degraded: self.diagnostics.is_degraded(),
        }
    }

    /// Human-readable summary of the current state
    pub fn status(&self) -> String {
        let rule = "---------------------------------".to_string();
        let mut lines = vec![
            rule.clone(),
            format!("orbitsim version:    \t{}", env!("CARGO_PKG_VERSION")),
            format!("Number of particles: \t{}", self.system.len()),
            format!("Selected integrator: \t{}", self.integrator.kind()),
            format!("Simulation time:     \t{:.16}", self.time),
            format!("Nominal timestep:    \t{}", self.config.base_dt()),
            format!("G, softening:        \t{}, {}", self.gravity.g, self.gravity.softening),
            format!(
                "Total energy:        \t{:.16e}",
                total_energy(self.system.particles(), &self.gravity)
            ),
            format!("Run phase:           \t{:?}", self.phase),
            rule.clone(),
        ];
        for p in self.system.particles() {
            lines.push(format!(
                "particle {}: m={} x={} y={} z={} vx={} vy={} vz={}",
                p.index,
                p.mass,
                p.position.x,
                p.position.y,
                p.position.z,
                p.velocity.x,
                p.velocity.y,
                p.velocity.z
            ));
        }
        lines.push(rule);
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(integrator: IntegratorKind) -> SimulationConfig {
        SimulationConfig::new(1.0, 5, integrator, false)
    }

    #[test]
    fn test_initialize_rejects_bad_config() {
        let result = NBodySimulation::initialize(SimulationConfig::new(
            -1.0,
            10,
            IntegratorKind::Ias15,
            false,
        ));
        assert!(matches!(result, Err(SimulationError::InvalidConfig(_))));
    }

    #[test]
    fn test_add_particle_returns_indices() {
        let mut sim = NBodySimulation::initialize(config(IntegratorKind::None)).unwrap();
        assert_eq!(sim.add_particle(1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0).unwrap(), 0);
        assert_eq!(sim.add_particle(0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0).unwrap(), 1);
        assert!(matches!(
            sim.add_particle(-1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0),
            Err(SimulationError::InvalidParticle(_))
        ));
        assert_eq!(sim.particle_count(), 2);
    }

    #[test]
    fn test_system_is_locked_after_run() {
        let mut sim = NBodySimulation::initialize(config(IntegratorKind::Leapfrog)).unwrap();
        sim.add_particle(1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0).unwrap();
        sim.run().unwrap();

        assert_eq!(sim.phase(), RunPhase::Finished);
        assert!(matches!(
            sim.add_particle(1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0),
            Err(SimulationError::InvalidState(_))
        ));
        assert!(matches!(sim.run(), Err(SimulationError::InvalidState(_))));
        assert_eq!(sim.particle_count(), 1);
    }

    #[test]
    fn test_run_shapes_and_times() {
        let mut sim = NBodySimulation::initialize(config(IntegratorKind::Ias15)).unwrap();
        sim.add_particle(1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0).unwrap();
        sim.add_particle(1e-6, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0).unwrap();

        let mut seen = Vec::new();
        let output = sim
            .run_with(&CancelFlag::new(), |progress| seen.push(progress.completed))
            .unwrap();

        assert_eq!(output.particle_count, 2);
        assert_eq!(output.trajectory.times, vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        for track in [&output.trajectory.x, &output.trajectory.y, &output.trajectory.z] {
            assert_eq!(track.len(), 2);
            assert!(track.iter().all(|samples| samples.len() == 5));
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
        assert_eq!(output.trajectory.x[1][0], 1.0);
        assert_eq!(output.report.final_time, 1.0);
        assert!(output.report.close_encounters.is_none());
        assert!(output.report.energy_error < 1e-12);
    }

    #[test]
    fn test_simulate_reaches_duration() {
        let mut sim = NBodySimulation::initialize(SimulationConfig::new(
            std::f64::consts::PI,
            10,
            IntegratorKind::WhFast,
            false,
        ))
        .unwrap();
        sim.add_particle(1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0).unwrap();
        sim.add_particle(0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0).unwrap();

        let report = sim.simulate().unwrap();
        assert_eq!(report.final_time, std::f64::consts::PI);
        // Half a circular orbit
        let p = sim.system().particles()[1].position;
        assert!((p - Vector3::new(-1.0, 0.0, 0.0)).magnitude() < 1e-10);
        assert!(matches!(sim.simulate(), Err(SimulationError::InvalidState(_))));
    }

    #[test]
    fn test_status_lists_particles() {
        let mut sim = NBodySimulation::initialize(config(IntegratorKind::Mercurius)).unwrap();
        sim.add_particle(1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0).unwrap();
        let status = sim.status();
        assert!(status.contains("Number of particles: \t1"));
        assert!(status.contains("Mercurius"));
        assert!(status.contains("particle 0: m=1"));
    }
}
