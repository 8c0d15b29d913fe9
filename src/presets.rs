// Presets - Ready-made initial conditions
// Natural units: AU, solar masses, time in yr/2π (G = 1)

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::config::ParticleSpec;
use crate::error::Result;
use crate::kepler::OrbitalElements;
use crate::physics_engine::{Vector3, G_NATURAL};
use crate::simulation::NBodySimulation;

pub const PRESET_NAMES: [&str; 2] = ["Inner Solar System", "Sun, Earth, Mars"];

/// A named body of a preset. The name stays here; the engine only sees numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetBody {
    pub name: String,
    pub mass: f64,
    pub position: Vector3,
    pub velocity: Vector3,
}

impl PresetBody {
    fn new(name: &str, mass: f64, position: [f64; 3], velocity: [f64; 3]) -> Self {
        Self {
            name: name.to_string(),
            mass,
            position: position.into(),
            velocity: velocity.into(),
        }
    }

    // Heliocentric-ecliptic states relative to the solar system barycenter

    pub fn sun() -> Self {
        Self::new(
            "Sun",
            0.9999999999950272,
            [-0.00890210412706074, -0.0007758899444505249, 0.00021366342527047113],
            [0.00012285790850338033, -0.0005003466219408352, 1.2221812993419404e-06],
        )
    }

    pub fn mercury() -> Self {
        Self::new(
            "Mercury",
            1.6601208254808336e-07,
            [-0.22315977761416272, 0.24730989644698195, 0.04013999600464757],
            [-1.5687025317960195, -1.0045716938695024, 0.06184822134989955],
        )
    }

    pub fn venus() -> Self {
        Self::new(
            "Venus",
            2.447838287784771e-06,
            [-0.351559999949463, 0.6301825177996836, 0.028648566009433794],
            [-1.037125876769079, -0.5681607665275994, 0.05205962596614349],
        )
    }

    pub fn earth() -> Self {
        Self::new(
            "Earth",
            3.0404326489511185e-06,
            [-0.9546368779826236, -0.3302360750379641, 0.00023607966526552235],
            [0.3128945163587852, -0.948783682591208, 4.910243972132018e-05],
        )
    }

    pub fn mars() -> Self {
        Self::new(
            "Mars",
            3.2271560828978514e-07,
            [-1.1493486927142729, 1.194646916419061, 0.053242123669011245],
            [-0.5577910043907098, -0.4927482311008652, 0.003370059888074412],
        )
    }

    pub fn to_spec(&self) -> ParticleSpec {
        ParticleSpec {
            name: Some(self.name.clone()),
            mass: self.mass,
            position: self.position.to_array(),
            velocity: self.velocity.to_array(),
        }
    }
}

pub fn inner_solar_system() -> Vec<PresetBody> {
    vec![
        PresetBody::sun(),
        PresetBody::mercury(),
        PresetBody::venus(),
        PresetBody::earth(),
        PresetBody::mars(),
    ]
}

pub fn sun_earth_mars() -> Vec<PresetBody> {
    vec![PresetBody::sun(), PresetBody::earth(), PresetBody::mars()]
}

/// Look up a preset by name, ignoring case
pub fn by_name(name: &str) -> Option<Vec<PresetBody>> {
    let name = name.trim();
    if name.eq_ignore_ascii_case(PRESET_NAMES[0]) {
        Some(inner_solar_system())
    } else if name.eq_ignore_ascii_case(PRESET_NAMES[1]) {
        Some(sun_earth_mars())
    } else {
        None
    }
}

/// A solar-mass star at the origin with `planets` low-eccentricity planets on
/// geometrically spaced orbits. The same seed always gives the same system.
pub fn random_planetary_system(planets: usize, seed: u64) -> Vec<PresetBody> {
    let mut rng = StdRng::seed_from_u64(seed);
    let star_mass = 1.0;
    let mut bodies = vec![PresetBody::new("Star", star_mass, [0.0; 3], [0.0; 3])];

    for k in 0..planets {
        let mass = 10f64.powf(rng.gen_range(-7.0..-4.5));
        let elements = OrbitalElements {
            semi_major_axis: 0.4 * 1.6f64.powi(k as i32) * rng.gen_range(0.97..1.03),
            eccentricity: rng.gen_range(0.0..0.05),
            inclination: rng.gen_range(0.0..0.02),
            longitude_ascending_node: rng.gen_range(0.0..2.0 * PI),
            argument_periapsis: rng.gen_range(0.0..2.0 * PI),
            mean_anomaly: rng.gen_range(0.0..2.0 * PI),
        };
        let (position, velocity) = elements.to_state_vector(G_NATURAL * (star_mass + mass));
        bodies.push(PresetBody {
            name: format!("Planet {}", k + 1),
            mass,
            position,
            velocity,
        });
    }

    bodies
}

/// Add every body of a preset to a simulation in order
pub fn load_into(simulation: &mut NBodySimulation, bodies: &[PresetBody]) -> Result<()> {
    for body in bodies {
        let (p, v) = (body.position, body.velocity);
        simulation.add_particle(body.mass, p.x, p.y, p.z, v.x, v.y, v.z)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IntegratorKind, SimulationConfig};

    #[test]
    fn test_presets_by_name() {
        let inner = by_name("inner solar system").unwrap();
        let names: Vec<&str> = inner.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["Sun", "Mercury", "Venus", "Earth", "Mars"]);
        assert_eq!(by_name("Sun, Earth, Mars").unwrap().len(), 3);
        assert!(by_name("Outer Solar System").is_none());
    }

    #[test]
    fn test_preset_planets_are_bound() {
        for body in &inner_solar_system()[1..] {
            let sun = PresetBody::sun();
            let elements = OrbitalElements::from_state_vector(
                G_NATURAL * (sun.mass + body.mass),
                body.position - sun.position,
                body.velocity - sun.velocity,
            )
            .unwrap();
            assert!(elements.eccentricity < 0.25, "{} is not near-circular", body.name);
            assert!(elements.semi_major_axis > 0.3 && elements.semi_major_axis < 1.6);
        }
    }

    #[test]
    fn test_random_system_is_reproducible() {
        let a = random_planetary_system(4, 7);
        let b = random_planetary_system(4, 7);
        let c = random_planetary_system(4, 8);
        assert_eq!(a.len(), 5);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_load_into_simulation() {
        let config = SimulationConfig::new(1.0, 2, IntegratorKind::None, false);
        let mut sim = NBodySimulation::initialize(config).unwrap();
        load_into(&mut sim, &sun_earth_mars()).unwrap();
        assert_eq!(sim.particle_count(), 3);
        assert_eq!(sim.system().particles()[1].mass, PresetBody::earth().mass);
    }
}
