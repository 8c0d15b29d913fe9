use orbitsim::presets::{self, PresetBody};
use orbitsim::{
    angular_momentum, spawn_run, IntegratorKind, NBodySimulation, RunPhase, Scenario,
    SimulationConfig, SimulationError, SimulationOutput,
};
use std::f64::consts::PI;
use std::thread;
use std::time::{Duration, Instant};

/// Wall-clock limit for runs that must not stall
const RUN_DEADLINE: Duration = Duration::from_secs(60);

/// Central mass 1.0 at rest with a 1e-6 test mass on a circular orbit at radius 1
fn circular_orbit(integrator: IntegratorKind) -> NBodySimulation {
    let config = SimulationConfig::new(2.0 * PI, 1000, integrator, false);
    let mut sim = NBodySimulation::initialize(config).unwrap();
    sim.add_particle(1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0).unwrap();
    let v = (1.0f64 + 1e-6).sqrt();
    sim.add_particle(1e-6, 1.0, 0.0, 0.0, 0.0, v, 0.0).unwrap();
    sim
}

fn with_bodies(config: SimulationConfig, bodies: &[PresetBody]) -> NBodySimulation {
    let mut sim = NBodySimulation::initialize(config).unwrap();
    presets::load_into(&mut sim, bodies).unwrap();
    sim
}

/// Ten years of Sun, Earth and Mars
fn sun_earth_mars_run(integrator: IntegratorKind) -> (SimulationOutput, f64) {
    let mut config = SimulationConfig::new(20.0 * PI, 200, integrator, false);
    config.dt = Some(0.01);
    let mut sim = with_bodies(config, &presets::sun_earth_mars());

    let l0 = angular_momentum(sim.system().particles());
    let output = sim.run().unwrap();
    let l1 = angular_momentum(sim.system().particles());

    (output, (l1 - l0).magnitude() / l0.magnitude())
}

/// Star with two 1e-3 planets at radius 1.0 and 1.05, inside each other's Hill sphere
fn close_pair(integrator: IntegratorKind, duration: f64, steps: usize) -> NBodySimulation {
    let mut config = SimulationConfig::new(duration, steps, integrator, false);
    config.dt = Some(0.01);
    let mut sim = NBodySimulation::initialize(config).unwrap();
    sim.add_particle(1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0).unwrap();
    sim.add_particle(1e-3, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0).unwrap();
    sim.add_particle(1e-3, 1.05, 0.0, 0.0, 0.0, 1.0 / 1.05f64.sqrt(), 0.0)
        .unwrap();
    sim
}

/// Run on a background thread, failing if it is still going after `RUN_DEADLINE`
fn run_within_deadline(sim: NBodySimulation) -> Result<SimulationOutput, SimulationError> {
    let handle = spawn_run(sim).unwrap();
    let started = Instant::now();
    while !handle.is_finished() {
        if started.elapsed() > RUN_DEADLINE {
            let progress = handle.progress();
            handle.cancel();
            panic!(
                "run stalled at {} of {} samples (t = {})",
                progress.completed, progress.total, progress.time
            );
        }
        thread::sleep(Duration::from_millis(10));
    }
    handle.join()
}

fn final_offset(output: &SimulationOutput, particle: usize) -> f64 {
    let t = &output.trajectory;
    let last = t.sample_count() - 1;
    let start = t.position(particle, 0).unwrap();
    let end = t.position(particle, last).unwrap();
    (end - start).magnitude()
}

// ==================================================================================
// Closed orbits
// ==================================================================================

#[test]
fn circular_orbit_closes_after_one_period() {
    for integrator in [
        IntegratorKind::Leapfrog,
        IntegratorKind::WhFast,
        IntegratorKind::Ias15,
        IntegratorKind::BulirschStoer,
        IntegratorKind::Mercurius,
    ] {
        let output = circular_orbit(integrator).run().unwrap();
        assert_eq!(output.trajectory.sample_count(), 1000);
        let offset = final_offset(&output, 1);
        assert!(offset < 1e-4, "{} missed the start by {}", integrator, offset);
    }
}

#[test]
fn none_integrator_keeps_initial_state() {
    let output = circular_orbit(IntegratorKind::None).run().unwrap();
    let t = &output.trajectory;
    for particle in 0..2 {
        assert!(t.x[particle].iter().all(|&x| x == t.x[particle][0]));
        assert!(t.y[particle].iter().all(|&y| y == t.y[particle][0]));
    }
    assert_eq!(output.report.energy_error, 0.0);
}

// ==================================================================================
// Conservation
// ==================================================================================

#[test]
fn symplectic_energy_and_momentum_stay_bounded() {
    let (whfast, whfast_l) = sun_earth_mars_run(IntegratorKind::WhFast);
    assert!(whfast.report.energy_error < 1e-8, "WHFast dE/E = {}", whfast.report.energy_error);
    assert!(whfast_l < 1e-9, "WHFast dL/L = {}", whfast_l);

    let (leapfrog, leapfrog_l) = sun_earth_mars_run(IntegratorKind::Leapfrog);
    assert!(leapfrog.report.energy_error < 1e-4, "Leapfrog dE/E = {}", leapfrog.report.energy_error);
    assert!(leapfrog_l < 1e-10, "Leapfrog dL/L = {}", leapfrog_l);

    let (mercurius, _) = sun_earth_mars_run(IntegratorKind::Mercurius);
    assert!(
        mercurius.report.energy_error < 1e-8,
        "Mercurius dE/E = {}",
        mercurius.report.energy_error
    );
    assert_eq!(mercurius.report.close_encounters, Some(0));
}

#[test]
fn adaptive_energy_error_stays_bounded() {
    let (ias15, _) = sun_earth_mars_run(IntegratorKind::Ias15);
    assert!(ias15.report.energy_error < 1e-9, "IAS15 dE/E = {}", ias15.report.energy_error);
    assert!(ias15.warnings.is_empty());

    let (bs, _) = sun_earth_mars_run(IntegratorKind::BulirschStoer);
    assert!(bs.report.energy_error < 1e-6, "BS dE/E = {}", bs.report.energy_error);
}

// ==================================================================================
// Degenerate systems
// ==================================================================================

#[test]
fn empty_and_single_particle_runs_are_constant() {
    for integrator in IntegratorKind::ALL {
        let config = SimulationConfig::new(10.0, 20, integrator, true);

        let mut empty = NBodySimulation::initialize(config.clone()).unwrap();
        let output = empty.run().unwrap();
        assert_eq!(output.particle_count, 0);
        assert!(output.trajectory.x.is_empty());
        assert_eq!(output.trajectory.sample_count(), 20);

        let mut single = NBodySimulation::initialize(config).unwrap();
        single.add_particle(2.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0).unwrap();
        let output = single.run().unwrap();
        assert_eq!(output.particle_count, 1);
        for sample in 0..20 {
            let p = output.trajectory.position(0, sample).unwrap();
            assert!(p.magnitude() < 1e-14, "{} moved a lone particle", integrator);
        }
        assert!(output.warnings.is_empty());
    }
}

#[test]
fn single_sample_run_records_initial_state() {
    let mut sim = with_bodies(
        SimulationConfig::new(100.0, 1, IntegratorKind::Ias15, false),
        &presets::sun_earth_mars(),
    );
    let output = sim.run().unwrap();
    assert_eq!(output.trajectory.times, vec![0.0]);
    assert_eq!(output.trajectory.x[1], vec![PresetBody::earth().position.x]);
}

// ==================================================================================
// Frame, determinism, validation
// ==================================================================================

#[test]
fn coincident_bodies_abort_with_divergence() {
    for integrator in [
        IntegratorKind::Ias15,
        IntegratorKind::WhFast,
        IntegratorKind::BulirschStoer,
        IntegratorKind::Mercurius,
        IntegratorKind::Leapfrog,
    ] {
        let mut sim =
            NBodySimulation::initialize(SimulationConfig::new(1.0, 10, integrator, false))
                .unwrap();
        sim.add_particle(1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0).unwrap();
        sim.add_particle(1e-3, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0).unwrap();
        sim.add_particle(1e-3, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0).unwrap();

        let result = sim.run();
        assert!(
            matches!(result, Err(SimulationError::NumericalDivergence { .. })),
            "{} did not report divergence",
            integrator
        );
        assert_eq!(sim.phase(), RunPhase::Finished);
    }
}

#[test]
fn centering_zeroes_the_mass_moment() {
    let mut sim = with_bodies(
        SimulationConfig::new(1.0, 3, IntegratorKind::WhFast, true),
        &presets::inner_solar_system(),
    );
    let masses: Vec<f64> = sim.system().masses();
    let output = sim.run().unwrap();

    let t = &output.trajectory;
    let mut moment = [0.0; 3];
    for (i, m) in masses.iter().enumerate() {
        moment[0] += m * t.x[i][0];
        moment[1] += m * t.y[i][0];
        moment[2] += m * t.z[i][0];
    }
    for component in moment {
        assert!(component.abs() < 1e-15, "mass moment {}", component);
    }
}

#[test]
fn identical_inputs_give_identical_trajectories() {
    let bodies = presets::random_planetary_system(4, 11);
    for integrator in [
        IntegratorKind::Ias15,
        IntegratorKind::Mercurius,
        IntegratorKind::BulirschStoer,
    ] {
        let config = SimulationConfig::new(30.0, 50, integrator, true);
        let a = with_bodies(config.clone(), &bodies).run().unwrap();
        let b = with_bodies(config, &bodies).run().unwrap();
        assert_eq!(a.trajectory, b.trajectory, "{} is not deterministic", integrator);
    }
}

#[test]
fn invalid_inputs_are_rejected() {
    let result = NBodySimulation::initialize(SimulationConfig::new(
        10.0,
        0,
        IntegratorKind::Ias15,
        false,
    ));
    assert!(matches!(result, Err(SimulationError::InvalidConfig(_))));

    let mut sim = circular_orbit(IntegratorKind::Ias15);
    assert!(matches!(
        sim.add_particle(-1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0),
        Err(SimulationError::InvalidParticle(_))
    ));
    assert_eq!(sim.particle_count(), 2);

    assert!(matches!(
        "Euler".parse::<IntegratorKind>(),
        Err(SimulationError::InvalidConfig(_))
    ));
}

#[test]
fn scenario_round_trips_through_json() {
    let scenario = Scenario {
        config: SimulationConfig::new(5.0, 10, IntegratorKind::Leapfrog, true),
        particles: presets::sun_earth_mars().iter().map(|b| b.to_spec()).collect(),
    };
    let json = scenario.to_json().unwrap();
    let loaded = Scenario::from_json_str(&json).unwrap();
    assert_eq!(loaded.config, scenario.config);
    assert_eq!(loaded.particles, scenario.particles);

    let sim = NBodySimulation::from_scenario(loaded).unwrap();
    assert_eq!(sim.particle_count(), 3);
}

// ==================================================================================
// Close encounters
// ==================================================================================

#[test]
fn mercurius_handles_close_pair() {
    let output =
        run_within_deadline(close_pair(IntegratorKind::Mercurius, 2.0 * PI, 100)).unwrap();
    assert_eq!(output.trajectory.sample_count(), 100);
    assert!(output.report.close_encounters.unwrap_or(0) >= 1);
    assert!(
        output.report.energy_error < 1e-3,
        "Mercurius dE/E = {}",
        output.report.energy_error
    );
}

#[test]
fn close_pair_runs_to_completion() {
    for integrator in [IntegratorKind::Ias15, IntegratorKind::Mercurius] {
        let output = run_within_deadline(close_pair(integrator, 20.0 * PI, 100)).unwrap();
        assert!((output.report.final_time - 20.0 * PI).abs() < 1e-12);
        assert_eq!(output.trajectory.sample_count(), 100);
        for particle in 0..3 {
            let end = output.trajectory.position(particle, 99).unwrap();
            assert!(end.is_finite(), "{} lost particle {}", integrator, particle);
        }
    }
}

// ==================================================================================
// Host-side runs
// ==================================================================================

#[test]
fn cancelling_mid_run_returns_no_trajectory() {
    let sim = with_bodies(
        SimulationConfig::new(10000.0, 5000, IntegratorKind::Ias15, false),
        &presets::sun_earth_mars(),
    );
    let handle = spawn_run(sim).unwrap();

    let started = Instant::now();
    while handle.progress().completed < 2 {
        assert!(started.elapsed() < RUN_DEADLINE, "run never started sampling");
        thread::yield_now();
    }
    handle.cancel();

    match handle.join() {
        Err(SimulationError::Cancelled { completed, total }) => {
            assert_eq!(total, 5000);
            assert!(completed >= 2 && completed < 5000, "cancelled after {}", completed);
        }
        other => panic!("expected cancellation, got {:?}", other.map(|o| o.particle_count)),
    }
}
