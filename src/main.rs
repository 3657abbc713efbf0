use std::path::PathBuf;
use clap::Parser;
use color_eyre::eyre::{bail, Result, WrapErr};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, Level};
use rust_qmc_kernels::checks::{check_distance_table, check_random_determinant, CheckParams};
use rust_qmc_kernels::distance::{
    BoundaryPolicy, DistanceTable, OpenBoundary, PeriodicGeneral, PeriodicOrthorhombic,
};
use rust_qmc_kernels::io::{read_config, BoundaryConfig, Precision, SimulationConfig};
use rust_qmc_kernels::numerics::Real;
use rust_qmc_kernels::particle::ParticleSet;

#[derive(Parser, Debug)]
#[command(version, about = "Check the distance-table and determinant kernels", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config.yml")]
    config: PathBuf,

    /// Random seed (overrides config file)
    #[arg(long)]
    seed: Option<u64>,

    /// Number of sweeps (overrides config file)
    #[arg(long)]
    sweeps: Option<usize>,

    /// Increase log verbosity, repeat for more
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    let level = match args.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let mut config = read_config(&args.config)
        .wrap_err_with(|| format!("Failed to load configuration from {}", args.config.display()))?;
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(sweeps) = args.sweeps {
        config.sweeps = sweeps;
    }
    info!("configuration: {:?}", config);

    let passed = match (config.precision, config.dimension) {
        (Precision::Single, 2) => run::<f32, 2>(&config)?,
        (Precision::Single, 3) => run::<f32, 3>(&config)?,
        (Precision::Double, 2) => run::<f64, 2>(&config)?,
        (Precision::Double, 3) => run::<f64, 3>(&config)?,
        (_, dimension) => bail!("unsupported dimension {dimension}"),
    };

    if !passed {
        bail!("kernel checks failed");
    }
    println!("All checks passed");
    Ok(())
}

fn run<T: Real, const D: usize>(config: &SimulationConfig) -> Result<bool> {
    match &config.boundary {
        BoundaryConfig::Open => run_with::<T, _, D>(config, OpenBoundary),
        BoundaryConfig::PeriodicOrthorhombic { lengths } => {
            let boundary = PeriodicOrthorhombic::new(BoundaryConfig::lengths::<T, D>(lengths)?)?;
            run_with::<T, _, D>(config, boundary)
        }
        BoundaryConfig::PeriodicGeneral { lattice } => {
            let boundary = PeriodicGeneral::new(BoundaryConfig::lattice::<T, D>(lattice)?)?;
            run_with::<T, _, D>(config, boundary)
        }
    }
}

fn run_with<T, B, const D: usize>(config: &SimulationConfig, boundary: B) -> Result<bool>
where
    T: Real,
    B: BoundaryPolicy<T, D>,
{
    let mut rng = StdRng::seed_from_u64(config.seed);
    let params = CheckParams::from(config);

    let sources = ParticleSet::<T, D>::random(config.sources, config.box_length, &mut rng)?;
    let mut targets = ParticleSet::<T, D>::random(config.targets, config.box_length, &mut rng)?;
    let mut table = DistanceTable::new(boundary, config.sources, config.targets)?;

    let distance = check_distance_table(&mut table, &sources, &mut targets, &params, &mut rng)
        .wrap_err("Distance table check failed")?;
    let determinant = check_random_determinant::<T, _>(config.orbitals, &params, &mut rng)
        .wrap_err("Determinant check failed")?;

    println!("Distance table ({} sources x {} targets, D = {})", config.sources, config.targets, D);
    println!("----------------------------------------");
    println!("Accepted moves: {} / {}", distance.accepted, distance.attempted);
    println!("Max deviation: {:?}", distance.max_deviation);
    println!("Neighbors per source: {:.2}", distance.mean_neighbors);
    println!("Passed: {}", distance.passed);
    println!();
    println!("Determinant ({0} x {0})", config.orbitals);
    println!("----------------------------------------");
    println!("Accepted moves: {} / {}", determinant.accepted, determinant.attempted);
    println!("log|det|: {:?}, sign: {:?}", determinant.log_value, determinant.sign);
    println!("Inverse deviation: {:?}", determinant.inverse_deviation);
    println!("Log deviation: {:?}", determinant.log_deviation);
    println!("Passed: {}", determinant.passed);

    Ok(distance.passed && determinant.passed)
}
