// Configuration - Run parameters and scenario files
// A scenario is a SimulationConfig plus the initial particle list, stored as JSON:
//
// {
//   "config": { "duration": 6.283185307179586, "steps": 1000, "integrator": "WHFast" },
//   "particles": [
//     { "name": "Sun",   "mass": 1.0,  "position": [0, 0, 0], "velocity": [0, 0, 0] },
//     { "name": "Earth", "mass": 3e-6, "position": [1, 0, 0], "velocity": [0, 1, 0] }
//   ]
// }

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Result, SimulationError};
use crate::physics_engine::{GravityModel, G_NATURAL};

/// Which time-stepping strategy drives the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum IntegratorKind {
    #[default]
    Ias15,
    WhFast,
    BulirschStoer,
    Mercurius,
    Leapfrog,
    None,
}

impl IntegratorKind {
    pub const ALL: [IntegratorKind; 6] = [
        IntegratorKind::Ias15,
        IntegratorKind::WhFast,
        IntegratorKind::BulirschStoer,
        IntegratorKind::Mercurius,
        IntegratorKind::Leapfrog,
        IntegratorKind::None,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            IntegratorKind::Ias15 => "IAS15",
            IntegratorKind::WhFast => "WHFast",
            IntegratorKind::BulirschStoer => "BS",
            IntegratorKind::Mercurius => "Mercurius",
            IntegratorKind::Leapfrog => "Leapfrog",
            IntegratorKind::None => "None",
        }
    }
}

impl fmt::Display for IntegratorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for IntegratorKind {
    type Err = SimulationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ias15" => Ok(IntegratorKind::Ias15),
            "whfast" => Ok(IntegratorKind::WhFast),
            "bs" | "bulirschstoer" | "bulirsch-stoer" => Ok(IntegratorKind::BulirschStoer),
            "mercurius" => Ok(IntegratorKind::Mercurius),
            "leapfrog" => Ok(IntegratorKind::Leapfrog),
            "none" => Ok(IntegratorKind::None),
            _ => Err(SimulationError::InvalidConfig(format!(
                "unknown integrator '{}'",
                s
            ))),
        }
    }
}

impl TryFrom<String> for IntegratorKind {
    type Error = SimulationError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<IntegratorKind> for String {
    fn from(kind: IntegratorKind) -> Self {
        kind.name().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Total simulated time in natural units (2π = one year)
    pub duration: f64,
    /// Number of output samples, including t = 0
    pub steps: usize,
    pub integrator: IntegratorKind,
    /// Shift to the barycentric frame before the first sample
    pub center: bool,
    /// Gravitational constant
    pub g: f64,
    /// Plummer softening length
    pub softening: f64,
    /// Fixed or initial internal step; duration / steps when unset
    pub dt: Option<f64>,
    pub ias15_epsilon: f64,
    pub ias15_min_dt: f64,
    pub bs_tolerance: f64,
    pub bs_max_order: usize,
    /// Mutual Hill radii at which a pair enters an encounter
    pub mercurius_hill_enter: f64,
    /// Mutual Hill radii at which a pair leaves an encounter
    pub mercurius_hill_exit: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            duration: 1000.0,
            steps: 5000,
            integrator: IntegratorKind::Ias15,
            center: false,
            g: G_NATURAL,
            softening: 0.0,
            dt: None,
            ias15_epsilon: 1e-9,
            ias15_min_dt: 0.0,
            bs_tolerance: 1e-10,
            bs_max_order: 8,
            mercurius_hill_enter: 3.0,
            mercurius_hill_exit: 4.0,
        }
    }
}

impl SimulationConfig {
    pub fn new(duration: f64, steps: usize, integrator: IntegratorKind, center: bool) -> Self {
        Self {
            duration,
            steps,
            integrator,
            center,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        fn invalid(message: String) -> Result<()> {
            Err(SimulationError::InvalidConfig(message))
        }

        if !self.duration.is_finite() || self.duration <= 0.0 {
            return invalid(format!("duration must be positive, got {}", self.duration));
        }
        if self.steps < 1 {
            return invalid("steps must be at least 1".to_string());
        }
        if !self.g.is_finite() || self.g <= 0.0 {
            return invalid(format!("G must be positive, got {}", self.g));
        }
        if !self.softening.is_finite() || self.softening < 0.0 {
            return invalid(format!("softening must be non-negative, got {}", self.softening));
        }
        if let Some(dt) = self.dt {
            if !dt.is_finite() || dt <= 0.0 {
                return invalid(format!("dt must be positive, got {}", dt));
            }
        }
        if !(self.ias15_epsilon > 0.0) || !(self.bs_tolerance > 0.0) {
            return invalid("integrator tolerances must be positive".to_string());
        }
        if !self.ias15_min_dt.is_finite() || self.ias15_min_dt < 0.0 {
            return invalid(format!("ias15_min_dt must be non-negative, got {}", self.ias15_min_dt));
        }
        if self.bs_max_order < 2 {
            return invalid("bs_max_order must be at least 2".to_string());
        }
        if !(self.mercurius_hill_enter > 0.0) || !(self.mercurius_hill_exit > self.mercurius_hill_enter) {
            return invalid(format!(
                "Mercurius thresholds need 0 < enter < exit, got {} and {}",
                self.mercurius_hill_enter, self.mercurius_hill_exit
            ));
        }
        Ok(())
    }

    /// Nominal internal step for fixed-step strategies and the initial adaptive step.
    /// Fixed-step strategies divide each sample interval into the fewest equal
    /// sub-steps no longer than this, so the step actually taken can be shorter
    /// (duration 10 with 5 samples gives intervals of 2.5 taken as two steps of 1.25).
    pub fn base_dt(&self) -> f64 {
        self.dt
            .unwrap_or(self.duration / self.steps.max(1) as f64)
    }

    /// Evenly spaced output times over [0, duration]; a single step samples only t = 0
    pub fn sample_times(&self) -> Vec<f64> {
        if self.steps <= 1 {
            return vec![0.0; self.steps];
        }
        let last = (self.steps - 1) as f64;
        (0..self.steps)
            .map(|i| self.duration * i as f64 / last)
            .collect()
    }

    pub fn gravity(&self) -> GravityModel {
        GravityModel::new(self.g, self.softening)
    }
}

/// Initial state of one body in a scenario file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticleSpec {
    /// Display label only; never reaches the engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub mass: f64,
    pub position: [f64; 3],
    pub velocity: [f64; 3],
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub config: SimulationConfig,
    pub particles: Vec<ParticleSpec>,
}

impl Scenario {
    /// Parse and validate a scenario. A malformed document is a Json error;
    /// well-formed JSON with bad settings, including an unknown integrator
    /// name, is InvalidConfig.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        if let Some(name) = value.pointer("/config/integrator") {
            match name.as_str() {
                Some(name) => {
                    name.parse::<IntegratorKind>()?;
                }
                None => {
                    return Err(SimulationError::InvalidConfig(format!(
                        "integrator must be a name, got {}",
                        name
                    )));
                }
            }
        }

        let scenario: Scenario = serde_json::from_value(value)?;
        scenario.config.validate()?;
        Ok(scenario)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_original_program() {
        let config = SimulationConfig::default();
        assert_eq!(config.duration, 1000.0);
        assert_eq!(config.steps, 5000);
        assert_eq!(config.integrator, IntegratorKind::Ias15);
        assert!(!config.center);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_integrator_names() {
        assert_eq!("ias15".parse::<IntegratorKind>().unwrap(), IntegratorKind::Ias15);
        assert_eq!("WHFast".parse::<IntegratorKind>().unwrap(), IntegratorKind::WhFast);
        assert_eq!("BS".parse::<IntegratorKind>().unwrap(), IntegratorKind::BulirschStoer);
        assert_eq!(
            "BulirschStoer".parse::<IntegratorKind>().unwrap(),
            IntegratorKind::BulirschStoer
        );
        for kind in IntegratorKind::ALL {
            assert_eq!(kind.name().parse::<IntegratorKind>().unwrap(), kind);
        }
        assert!(matches!(
            "RK4".parse::<IntegratorKind>(),
            Err(SimulationError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = SimulationConfig::new(10.0, 0, IntegratorKind::Leapfrog, false);
        assert!(matches!(config.validate(), Err(SimulationError::InvalidConfig(_))));

        config.steps = 10;
        config.duration = 0.0;
        assert!(config.validate().is_err());

        config.duration = 10.0;
        config.mercurius_hill_exit = 2.0;
        assert!(config.validate().is_err());

        config.mercurius_hill_exit = 4.0;
        config.dt = Some(-1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sample_times() {
        let config = SimulationConfig::new(10.0, 5, IntegratorKind::None, false);
        assert_eq!(config.sample_times(), vec![0.0, 2.5, 5.0, 7.5, 10.0]);
        assert_eq!(config.base_dt(), 2.0);

        let single = SimulationConfig::new(10.0, 1, IntegratorKind::None, false);
        assert_eq!(single.sample_times(), vec![0.0]);
    }

    #[test]
    fn test_scenario_from_json() {
        let json = r#"{
            "config": { "duration": 5.0, "steps": 10, "integrator": "whfast" },
            "particles": [
                { "name": "Sun", "mass": 1.0, "position": [0, 0, 0], "velocity": [0, 0, 0] },
                { "mass": 1e-6, "position": [1, 0, 0], "velocity": [0, 1, 0] }
            ]
        }"#;

        let scenario = Scenario::from_json_str(json).unwrap();
        assert_eq!(scenario.config.integrator, IntegratorKind::WhFast);
        assert_eq!(scenario.config.steps, 10);
        assert_eq!(scenario.config.ias15_epsilon, 1e-9);
        assert_eq!(scenario.particles.len(), 2);
        assert_eq!(scenario.particles[0].name.as_deref(), Some("Sun"));
        assert_eq!(scenario.particles[1].name, None);

        let unknown = r#"{ "config": { "integrator": "euler" }, "particles": [] }"#;
        assert!(matches!(
            Scenario::from_json_str(unknown),
            Err(SimulationError::InvalidConfig(_))
        ));
        let numeric = r#"{ "config": { "integrator": 3 }, "particles": [] }"#;
        assert!(matches!(
            Scenario::from_json_str(numeric),
            Err(SimulationError::InvalidConfig(_))
        ));
        assert!(matches!(
            Scenario::from_json_str("{ not json"),
            Err(SimulationError::Json(_))
        ));
    }
}
