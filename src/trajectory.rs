// Trajectory Recorder - Sampled positions per particle
// Builds the [particle][sample] coordinate arrays a run hands back to the caller

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimulationError};
use crate::physics_engine::{ParticleSystem, Vector3};

/// Position samples indexed [particle][sample], plus the sample times
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub times: Vec<f64>,
    pub x: Vec<Vec<f64>>,
    pub y: Vec<Vec<f64>>,
    pub z: Vec<Vec<f64>>,
}

impl Trajectory {
    pub fn particle_count(&self) -> usize {
        self.x.len()
    }

    pub fn sample_count(&self) -> usize {
        self.times.len()
    }

    pub fn position(&self, particle: usize, sample: usize) -> Option<Vector3> {
        Some(Vector3::new(
            *self.x.get(particle)?.get(sample)?,
            *self.y.get(particle)?.get(sample)?,
            *self.z.get(particle)?.get(sample)?,
        ))
    }

    /// Split into the three coordinate arrays
    pub fn into_arrays(self) -> (Vec<Vec<f64>>, Vec<Vec<f64>>, Vec<Vec<f64>>) {
        (self.x, self.y, self.z)
    }
}

pub struct TrajectoryRecorder {
    expected_samples: usize,
    trajectory: Trajectory,
}

impl TrajectoryRecorder {
    pub fn new(particle_count: usize, expected_samples: usize) -> Self {
        let track = || vec![Vec::with_capacity(expected_samples); particle_count];
        Self {
            expected_samples,
            trajectory: Trajectory {
                times: Vec::with_capacity(expected_samples),
                x: track(),
                y: track(),
                z: track(),
            },
        }
    }

    /// Append the current position of every particle as one sample
    pub fn record(&mut self, time: f64, system: &ParticleSystem) {
        self.trajectory.times.push(time);
        for (i, p) in system.particles().iter().enumerate() {
            self.trajectory.x[i].push(p.position.x);
            self.trajectory.y[i].push(p.position.y);
            self.trajectory.z[i].push(p.position.z);
        }
    }

    pub fn recorded(&self) -> usize {
        self.trajectory.times.len()
    }

    /// Hand the trajectory over; every requested sample must have been recorded
    pub fn finish(self) -> Result<Trajectory> {
        if self.recorded() != self.expected_samples {
            return Err(SimulationError::InvalidState(format!(
                "trajectory has {} of {} samples",
                self.recorded(),
                self.expected_samples
            )));
        }
        Ok(self.trajectory)
    }
}
