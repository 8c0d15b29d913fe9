// orbitsim - N-body gravitational trajectory engine
// Library entry point: particle state, gravity, integrators and the run driver

pub mod bulirsch_stoer;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod ias15;
pub mod integrator;
pub mod kepler;
pub mod mercurius;
pub mod physics_engine;
pub mod presets;
pub mod simulation;
pub mod state_manager;
pub mod trajectory;
pub mod whfast;

pub use config::{IntegratorKind, ParticleSpec, Scenario, SimulationConfig};
pub use diagnostics::{AccuracyWarning, ConvergenceFailure, Diagnostics};
pub use error::{Result, SimulationError};
pub use integrator::Integrator;
pub use kepler::{kepler_drift, solve_kepler_equation, OrbitalElements};
pub use mercurius::EncounterState;
pub use physics_engine::{
    angular_momentum, kinetic_energy, move_to_center_of_momentum, total_energy, GravityModel,
    Particle, ParticleSystem, Vector3, G_NATURAL,
};
pub use simulation::{NBodySimulation, RunPhase, RunReport, SimulationOutput};
pub use state_manager::{run_async, spawn_run, CancelFlag, RunHandle, RunProgress};
pub use trajectory::{Trajectory, TrajectoryRecorder};
