// State Manager - Thread-safe run handling for host applications
// Runs a simulation off the caller's thread with shared progress and cancellation

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread;

use crate::error::{Result, SimulationError};
use crate::simulation::{NBodySimulation, SimulationOutput};

// =============================================================================
// SHARED RUN STATE
// =============================================================================

/// Cancellation request shared between a host and a running simulation.
/// The run checks it only between output samples.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<RwLock<bool>>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        *self.cancelled.write() = true;
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.read()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunProgress {
    /// Samples recorded so far
    pub completed: usize,
    pub total: usize,
    /// Simulation time of the latest sample
    pub time: f64,
}

impl RunProgress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

// =============================================================================
// BACKGROUND RUNS
// =============================================================================

pub struct RunHandle {
    progress: Arc<RwLock<RunProgress>>,
    cancel: CancelFlag,
    worker: thread::JoinHandle<Result<SimulationOutput>>,
}

impl RunHandle {
    pub fn progress(&self) -> RunProgress {
        *self.progress.read()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Wait for the run to end and take its output
    pub fn join(self) -> Result<SimulationOutput> {
        self.worker
            .join()
            .map_err(|_| SimulationError::Worker("simulation thread panicked".to_string()))?
    }
}

/// Start `simulation.run()` on a dedicated thread
pub fn spawn_run(mut simulation: NBodySimulation) -> Result<RunHandle> {
    let progress = Arc::new(RwLock::new(RunProgress {
        completed: 0,
        total: simulation.config().steps,
        time: 0.0,
    }));
    let cancel = CancelFlag::new();

    let shared_progress = progress.clone();
    let worker_cancel = cancel.clone();
    let worker = thread::Builder::new()
        .name("orbitsim-run".to_string())
        .spawn(move || {
            simulation.run_with(&worker_cancel, |update| {
                *shared_progress.write() = update;
            })
        })?;

    Ok(RunHandle {
        progress,
        cancel,
        worker,
    })
}

/// Run on tokio's blocking pool so async hosts never stall their executor
pub async fn run_async(simulation: NBodySimulation, cancel: CancelFlag) -> Result<SimulationOutput> {
    tokio::task::spawn_blocking(move || {
        let mut simulation = simulation;
        simulation.run_with(&cancel, |_| {})
    })
    .await
    .map_err(|e| SimulationError::Worker(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IntegratorKind, SimulationConfig};

    fn two_body(integrator: IntegratorKind, steps: usize) -> NBodySimulation {
        let config = SimulationConfig::new(6.0, steps, integrator, false);
        let mut sim = NBodySimulation::initialize(config).unwrap();
        sim.add_particle(1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0).unwrap();
        sim.add_particle(1e-6, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0).unwrap();
        sim
    }

    #[test]
    fn test_cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        assert!(!other.is_cancelled());
        flag.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn test_spawned_run_returns_output() {
        let handle = spawn_run(two_body(IntegratorKind::WhFast, 50)).unwrap();
        let output = handle.join().unwrap();
        assert_eq!(output.particle_count, 2);
        assert_eq!(output.trajectory.sample_count(), 50);
    }

    #[test]
    fn test_progress_after_completion() {
        let handle = spawn_run(two_body(IntegratorKind::Leapfrog, 20)).unwrap();
        while !handle.is_finished() {
            thread::yield_now();
        }
        let progress = handle.progress();
        assert_eq!(progress.completed, 20);
        assert_eq!(progress.fraction(), 1.0);
        assert!(handle.join().is_ok());
    }

    #[test]
    fn test_cancelled_before_start_returns_no_trajectory() {
        let mut sim = two_body(IntegratorKind::Ias15, 100);
        let cancel = CancelFlag::new();
        cancel.cancel();

        let result = sim.run_with(&cancel, |_| {});
        assert!(matches!(
            result,
            Err(SimulationError::Cancelled { completed: 1, total: 100 })
        ));
    }

    #[tokio::test]
    async fn test_run_async() {
        let output = run_async(two_body(IntegratorKind::Ias15, 10), CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(output.trajectory.sample_count(), 10);
        assert_eq!(output.report.integrator, IntegratorKind::Ias15);
    }
}
