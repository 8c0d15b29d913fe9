// Diagnostics - Degraded-accuracy warnings collected during a run
// Integrators recover from convergence failures locally and report them here

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which bounded numerical procedure gave up and fell back to its best estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConvergenceFailure {
    /// Kepler's equation did not converge within the Newton-Raphson iteration cap
    KeplerSolve,
    /// IAS15 predictor-corrector loop hit its iteration cap
    PredictorCorrector,
    /// Adaptive step size reached its floor and the step was accepted anyway
    StepSizeFloor,
    /// Bulirsch-Stoer ran out of extrapolation orders and interval reductions
    Extrapolation,
    /// WHFast/Mercurius reference body has no mass; fell back to leapfrog
    ReferenceMass,
}

/// Aggregated record of one kind of convergence failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccuracyWarning {
    pub kind: ConvergenceFailure,
    /// How many times the failure occurred during the run
    pub count: usize,
    /// Simulation time of the first occurrence
    pub first_time: f64,
    pub detail: String,
}

#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    warnings: BTreeMap<ConvergenceFailure, AccuracyWarning>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one occurrence. The first occurrence of each kind is logged.
    pub fn report(&mut self, kind: ConvergenceFailure, time: f64, detail: impl Into<String>) {
        let detail = detail.into();
        match self.warnings.get_mut(&kind) {
            Some(existing) => {
                existing.count += 1;
                existing.detail = detail;
            }
            None => {
                log::warn!("{:?} at t = {}: {} (accuracy degraded)", kind, time, detail);
                self.warnings.insert(
                    kind,
                    AccuracyWarning {
                        kind,
                        count: 1,
                        first_time: time,
                        detail,
                    },
                );
            }
        }
    }

    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn count(&self, kind: ConvergenceFailure) -> usize {
        self.warnings.get(&kind).map(|w| w.count).unwrap_or(0)
    }

    pub fn into_warnings(self) -> Vec<AccuracyWarning> {
        self.warnings.into_values().collect()
    }
}
