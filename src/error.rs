// Error Types - Failure modes of the simulation engine
// Everything the engine can refuse or abort with is a SimulationError

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimulationError {
    /// Rejected before any particle state is touched
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid particle: {0}")]
    InvalidParticle(String),

    /// The system is locked once a run has started
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("numerical divergence at t = {time}: particle {particle} has a non-finite coordinate")]
    NumericalDivergence { time: f64, particle: usize },

    #[error("run cancelled after {completed} of {total} samples")]
    Cancelled { completed: usize, total: usize },

    #[error("background run failed: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SimulationError>;
