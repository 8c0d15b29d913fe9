// orbitsim CLI - Run a scenario file or preset and write the trajectory as JSON

use clap::Parser;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use orbitsim::{presets, NBodySimulation, Result, Scenario, SimulationConfig};

#[derive(Parser, Debug)]
#[command(name = "orbitsim", version, about = "N-body gravitational trajectory engine")]
struct Args {
    /// Scenario JSON file (config + particles); overrides --preset
    #[arg(short, long, env = "ORBITSIM_SCENARIO")]
    scenario: Option<PathBuf>,

    /// Built-in initial conditions: "Inner Solar System" or "Sun, Earth, Mars"
    #[arg(short, long, env = "ORBITSIM_PRESET", default_value = "Inner Solar System")]
    preset: String,

    /// Use a seeded random planetary system with this many planets instead of a preset
    #[arg(long)]
    random: Option<usize>,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Simulated time in natural units (2π = one year)
    #[arg(short, long, env = "ORBITSIM_DURATION")]
    duration: Option<f64>,

    /// Number of output samples
    #[arg(long, env = "ORBITSIM_STEPS")]
    steps: Option<usize>,

    /// IAS15, WHFast, BS, Mercurius, Leapfrog or None
    #[arg(short, long, env = "ORBITSIM_INTEGRATOR")]
    integrator: Option<String>,

    /// Move to the center-of-momentum frame before the first sample
    #[arg(long)]
    center: bool,

    /// Write the output JSON here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn build_simulation(args: &Args) -> Result<NBodySimulation> {
    let mut scenario = match &args.scenario {
        Some(path) => Scenario::load(path)?,
        None => Scenario {
            config: SimulationConfig::default(),
            particles: Vec::new(),
        },
    };

    if let Some(duration) = args.duration {
        scenario.config.duration = duration;
    }
    if let Some(steps) = args.steps {
        scenario.config.steps = steps;
    }
    if let Some(name) = &args.integrator {
        scenario.config.integrator = name.parse()?;
    }
    if args.center {
        scenario.config.center = true;
    }

    if args.scenario.is_none() {
        let bodies = match args.random {
            Some(planets) => presets::random_planetary_system(planets, args.seed),
            None => presets::by_name(&args.preset).ok_or_else(|| {
                orbitsim::SimulationError::InvalidConfig(format!(
                    "unknown preset '{}' (available: {})",
                    args.preset,
                    presets::PRESET_NAMES.join("; ")
                ))
            })?,
        };
        scenario.particles = bodies.iter().map(|b| b.to_spec()).collect();
    }

    NBodySimulation::from_scenario(scenario)
}

fn run(args: Args) -> Result<()> {
    let mut simulation = build_simulation(&args)?;
    let output = simulation.run()?;

    for warning in &output.warnings {
        log::warn!(
            "{:?} occurred {} time(s), first at t = {}",
            warning.kind,
            warning.count,
            warning.first_time
        );
    }

    let json = serde_json::to_string(&output)?;
    match &args.output {
        Some(path) => {
            fs::write(path, json)?;
            log::info!("Trajectory written to {}", path.display());
        }
        None => println!("{}", json),
    }

    eprintln!("{}", simulation.status());
    Ok(())
}

fn main() -> ExitCode {
    dotenv::dotenv().ok();
    env_logger::init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("orbitsim: {}", e);
            ExitCode::FAILURE
        }
    }
}
