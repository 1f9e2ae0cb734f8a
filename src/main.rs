//! NMR Random-Walk Relaxation
//!
//! Walks proton magnetization through a synthetic grain pack and prints the
//! resulting decay curve.

mod rock;

use clap::Parser;
use glam::DVec3;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use walker_physics::WATER_DIFFUSION;
use walker_simulation::{Experiment, Session, SimulationError};

#[derive(Parser, Debug)]
#[command(about = "Lattice random-walk NMR relaxation simulator")]
struct Args {
    /// Edge length of the synthetic rock in voxels
    #[arg(long, default_value_t = 64)]
    size: u32,

    /// Grain radius in voxels
    #[arg(long, default_value_t = 4.0)]
    grain_radius: f32,

    /// Target pore fraction of the rock
    #[arg(long, default_value_t = 0.35)]
    porosity: f64,

    /// Seed of the synthetic rock
    #[arg(long, default_value_t = 1)]
    rock_seed: u64,

    /// Voxel edge length (µm)
    #[arg(long, default_value_t = 1.0)]
    voxel_length: f64,

    #[arg(long, default_value_t = 10_000)]
    walkers: usize,

    /// 2 or 3
    #[arg(long, default_value_t = 3)]
    dimension: u32,

    /// Surface relaxivity (µm/ms)
    #[arg(long, default_value_t = 0.01)]
    rho: f64,

    /// Bulk relaxation time (ms)
    #[arg(long, default_value_t = 2800.0)]
    bulk_time: f64,

    /// Stop once magnetization drops to this fraction
    #[arg(long, default_value_t = 0.01)]
    threshold: f64,

    #[arg(long, default_value_t = 1_000_000)]
    max_iterations: u64,

    /// Internal gradient along z (mT/µm)
    #[arg(long, default_value_t = 0.0)]
    gradient: f64,

    /// Collision profile cadence in iterations, 0 disables
    #[arg(long, default_value_t = 0)]
    profile_interval: u64,

    /// Walk on the GPU, falling back to the CPU when no device is usable
    #[arg(long)]
    gpu: bool,

    /// Replay the walk of this seed
    #[arg(long)]
    seed: Option<u64>,

    /// Report inversion-recovery (T1) values instead of the raw decay
    #[arg(long)]
    t1: bool,

    /// Print every n-th decay step
    #[arg(long, default_value_t = 512)]
    every: usize,
}

fn configure(args: &Args) -> Result<Session, SimulationError> {
    let grid = rock::sphere_pack(args.size, args.grain_radius, args.porosity, args.rock_seed);
    log::info!(
        "✓ Rock: {0}x{0}x{0} voxels, porosity {1:.3}",
        args.size,
        grid.porosity()
    );

    let mut session = Session::new(Arc::new(grid));
    session.set_physical_scale(args.voxel_length, WATER_DIFFUSION)?;
    session.set_dimension(args.dimension)?;
    session.use_lattice_time_step();
    session.set_walker_count(args.walkers)?;
    session.set_surface_relaxivity(args.rho)?;
    session.set_bulk_time(args.bulk_time)?;
    session.set_stop_threshold(args.threshold)?;
    session.set_max_iterations(args.max_iterations)?;
    session.set_profile_interval(args.profile_interval);
    session.set_gpu_enabled(args.gpu);
    if args.gradient != 0.0 {
        session.set_uniform_gradient(DVec3::new(0.0, 0.0, args.gradient))?;
    }
    if args.seed.is_some() {
        session.set_repeat_paths(true, args.seed);
    }
    if args.t1 {
        session.set_experiment(Experiment::T1);
    }
    Ok(session)
}

fn run(args: &Args) -> Result<(), SimulationError> {
    let session = configure(args)?;
    log::info!(
        "Time step {:.4} ms, surface delta {:.5}",
        session.config().time_step,
        session.config().surface_delta
    );

    let handle = session.start_walk()?;
    while !handle.is_finished() {
        std::thread::sleep(Duration::from_millis(500));
        let state = handle.monitor().snapshot();
        if let Some(latest) = state.latest {
            log::info!(
                "{:5.1}%  iteration {:>8}  t = {:9.2} ms  M = {:.5}",
                state.progress * 100.0,
                state.iteration,
                latest.time,
                latest.magnetization
            );
        }
    }

    let outcome = handle.join()?;
    let report = outcome.result?;
    let session = outcome.session;
    log::info!(
        "✓ {} iterations in {:.2}s on {} ({:?}), seed {}",
        report.iterations,
        report.elapsed_seconds,
        report.strategy,
        report.stop,
        report.seed
    );
    if let Some(placement) = &report.placement {
        log::info!(
            "  placement: {} sites, up to {} walkers per site",
            placement.distinct_sites,
            placement.max_occupancy
        );
    }
    for profile in session.collision_profiles() {
        log::info!(
            "  profile @ {}: mean collision frequency {:.4}",
            profile.iteration,
            profile.mean_frequency()
        );
    }

    println!("# iteration time_ms magnetization");
    let log = session.decay_log();
    let every = args.every.max(1);
    for (index, step) in log.iter().enumerate() {
        if index % every == 0 || index + 1 == log.len() {
            println!("{} {:.4} {:.6}", step.iteration, step.time, step.magnetization);
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    // Initialize logger (RUST_LOG=debug for verbose output)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    log::info!("Starting NMR random walk...");

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
