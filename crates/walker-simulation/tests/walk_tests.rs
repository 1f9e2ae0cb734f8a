//! End-to-end walks through `Session`.
//!
//! Tests cover:
//! - Bulk-only decay and stop semantics (threshold, iteration cap)
//! - Reproducible paths and CPU/GPU equivalence
//! - Solid walls, relaxivity models and cyclic collision profiles
//! - Gradient dephasing independent of setter order
//! - External simulators, worker threads, cancellation and failures

use glam::{DVec3, UVec3};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use walker_physics::{BitGrid, HatRelaxivity, VoxelGrid, Walker};
use walker_simulation::strategy::cpu::walk_walker;
use walker_simulation::{
    AbsorbingSimulator, GpuContext, ProfileMode, RelaxivityDistribution, Session,
    SimulationConfig, SimulationError, StopReason, StrategyKind, WalkObserver, WalkStatus,
};

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

fn porous_grid() -> BitGrid {
    BitGrid::from_fn(20, 20, 20, |x, y, z| (x * 7 + y * 11 + z * 13) % 9 == 0)
}

fn session_over(grid: BitGrid, walkers: usize) -> Session {
    let mut session = Session::new(Arc::new(grid));
    session.set_walker_count(walkers).unwrap();
    session
}

fn never_cancel() -> AtomicBool {
    AtomicBool::new(false)
}

#[derive(Default)]
struct RecordingObserver {
    progress: Mutex<Vec<f64>>,
    ends: Mutex<Vec<WalkStatus>>,
    walker_batches: Mutex<usize>,
    show: bool,
}

impl WalkObserver for RecordingObserver {
    fn observe_walk(&self, progress: f64, _magnetization: f64, _time: f64) {
        self.progress.lock().unwrap().push(progress);
    }

    fn walk_end(&self, _elapsed_seconds: f64, status: &WalkStatus) {
        self.ends.lock().unwrap().push(status.clone());
    }

    fn show_walkers(&self) -> bool {
        self.show
    }

    fn walkers(&self, walkers: &[Walker]) {
        assert!(!walkers.is_empty());
        *self.walker_batches.lock().unwrap() += 1;
    }
}

// =============================================================================
// DECAY AND STOP SEMANTICS
// =============================================================================

#[test]
fn test_bulk_only_decay_tracks_exponential() {
    let mut session = session_over(BitGrid::all_pore(16, 16, 16), 1024);
    session.set_time_step(1.0).unwrap();
    session.set_bulk_time(500.0).unwrap();
    session.set_stop_threshold(0.01).unwrap();

    let report = session.run_walk(&never_cancel()).unwrap();
    assert_eq!(report.stop, StopReason::Threshold);

    for step in session.decay_log() {
        let expected = (-step.time / 500.0).exp();
        assert!(
            (step.magnetization - expected).abs() <= 1e-9 * expected.max(1e-3),
            "iteration {}: {} vs {expected}",
            step.iteration,
            step.magnetization
        );
    }
    let last = session.decay_step(session.decay_len() - 1).unwrap();
    assert!(last.magnetization <= 0.01);
    assert_eq!(last.iteration, session.total_iterations());
    // ln(100) · 500 ≈ 2302.6
    assert_eq!(session.total_iterations(), 2303);
}

#[test]
fn test_iteration_cap_stops_exactly() {
    let mut session = session_over(BitGrid::all_pore(8, 8, 8), 256);
    session.set_bulk_time(f64::INFINITY).unwrap();
    session.set_max_iterations(1500).unwrap();

    let report = session.run_walk(&never_cancel()).unwrap();
    assert_eq!(report.stop, StopReason::IterationCap);
    assert_eq!(report.iterations, 1500);
    assert_eq!(session.decay_len(), 1501);
    assert!(session.decay_log().iter().all(|s| s.iteration <= 1500));
}

#[test]
fn test_threshold_reached_through_walls() {
    let mut session = session_over(porous_grid(), 2000);
    session.set_surface_delta(0.2).unwrap();
    session.set_bulk_time(f64::INFINITY).unwrap();
    session.set_stop_threshold(0.1).unwrap();

    let report = session.run_walk(&never_cancel()).unwrap();
    assert_eq!(report.stop, StopReason::Threshold);
    let log = session.decay_log();
    assert!(log.last().unwrap().magnetization <= 0.1);
    assert!(log[..log.len() - 1].iter().all(|s| s.magnetization > 0.1));
    assert!(log.windows(2).all(|w| w[1].magnetization <= w[0].magnetization + 1e-12));

    let grid = session.grid().clone();
    for index in 0..session.walkers().len() {
        let p = session.walker_position(index).unwrap();
        assert!(!grid.is_solid(p.x, p.y, p.z));
    }
}

#[test]
fn test_gradient_independent_of_setter_order() {
    let walk = |gradient_first: bool| {
        let mut session = session_over(BitGrid::all_pore(16, 16, 16), 500);
        session.set_bulk_time(f64::INFINITY).unwrap();
        session.set_max_iterations(256).unwrap();
        session.set_repeat_paths(true, Some(11));
        let gradient = DVec3::new(0.0, 0.0, 0.01);
        if gradient_first {
            session.set_uniform_gradient(gradient).unwrap();
        }
        session.set_physical_scale(1.0, 2.0).unwrap();
        session.set_time_step(0.1).unwrap();
        if !gradient_first {
            session.set_uniform_gradient(gradient).unwrap();
        }
        session.run_walk(&never_cancel()).unwrap();
        session.decay_log().to_vec()
    };

    let before = walk(true);
    let after = walk(false);
    assert!(after.last().unwrap().magnetization < 0.99);
    assert_eq!(before, after);
}

// =============================================================================
// REPRODUCIBILITY AND BACKEND EQUIVALENCE
// =============================================================================

#[test]
fn test_repeated_paths_are_bit_identical() {
    let mut session = session_over(porous_grid(), 3000);
    session.set_surface_delta(0.05).unwrap();
    session.set_max_iterations(3000).unwrap();
    session.set_repeat_paths(true, Some(42));

    let first = session.run_walk(&never_cancel()).unwrap();
    let first_log = session.decay_log().to_vec();
    let first_walkers = session.walkers().to_vec();

    let second = session.run_walk(&never_cancel()).unwrap();
    assert_eq!(first.seed, 42);
    assert_eq!(second.seed, 42);
    assert_eq!(session.decay_log(), first_log.as_slice());
    assert_eq!(session.walkers(), first_walkers.as_slice());

    session.set_repeat_paths(false, None);
    let third = session.run_walk(&never_cancel()).unwrap();
    assert_ne!(third.seed, 42);
    assert_ne!(session.decay_log(), first_log.as_slice());
}

#[test]
fn test_cpu_and_gpu_decay_curves_match() {
    if GpuContext::new().is_err() {
        eprintln!("no GPU adapter, skipping");
        return;
    }

    let run = |gpu: bool| {
        let mut session = session_over(porous_grid(), 4096);
        session.set_surface_delta(0.1).unwrap();
        session.set_bulk_time(f64::INFINITY).unwrap();
        session.set_max_iterations(2048).unwrap();
        // Run to the cap so both logs have the same length
        session.set_stop_threshold(1e-9).unwrap();
        session.set_gpu_enabled(gpu);
        session.set_repeat_paths(true, Some(7));
        let report = session.run_walk(&never_cancel()).unwrap();
        (report, session)
    };

    let (cpu_report, cpu) = run(false);
    let (gpu_report, gpu) = run(true);
    assert_eq!(cpu_report.strategy, StrategyKind::Cpu { dimension: 3 });
    if gpu_report.strategy != (StrategyKind::Gpu { dimension: 3 }) {
        eprintln!("GPU walk fell back to CPU, skipping");
        return;
    }

    assert_eq!(cpu.decay_len(), gpu.decay_len());
    for (c, g) in cpu.decay_log().iter().zip(gpu.decay_log()) {
        assert_eq!(c.iteration, g.iteration);
        let tolerance = 1e-4 * c.magnetization.abs().max(1e-3);
        assert!(
            (c.magnetization - g.magnetization).abs() <= tolerance,
            "iteration {}: cpu {} gpu {}",
            c.iteration,
            c.magnetization,
            g.magnetization
        );
    }
    for (c, g) in cpu.walkers().iter().zip(gpu.walkers()) {
        assert_eq!(c.position(), g.position());
        assert_eq!(c.collisions(), g.collisions());
    }
}

// =============================================================================
// RELAXIVITY AND PROFILES
// =============================================================================

#[test]
fn test_wall_hit_degrades_by_walker_rho() {
    let grid = BitGrid::with_solid_plane(16, 16, 16, 8);
    let config = SimulationConfig::default();
    let hat = HatRelaxivity::single(0.0, 1.0, 1.0, 0.0).unwrap();
    let distribution = RelaxivityDistribution::new(Arc::new(hat), ProfileMode::Global);

    let mut walkers = [Walker::new(3, 1.0)];
    walkers[0].set_position(UVec3::new(7, 4, 4));
    distribution.update_walker_rho(&mut walkers, 1, &config);
    let factor = config.relaxivity_factor(1.0);
    assert_eq!(walkers[0].rho, factor);
    assert_eq!(walkers[0].magnetization, 1.0);

    let mut sums = [0.0; 1];
    walk_walker(&mut walkers[0], &[0], &grid, grid.dimensions(), &[1.0; 6], &mut sums);
    assert_eq!(walkers[0].collisions(), 1);
    assert_eq!(walkers[0].magnetization, factor);
    assert_eq!(walkers[0].position(), UVec3::new(7, 4, 4));
}

#[test]
fn test_relaxivity_model_applies_without_refresh() {
    let mut session = session_over(BitGrid::with_solid_plane(16, 16, 16, 8), 2000);
    session.set_bulk_time(f64::INFINITY).unwrap();
    session.set_max_iterations(512).unwrap();
    let hat = HatRelaxivity::single(0.0, 1.0, 1.0, 0.0).unwrap();
    session.set_relaxivity(Some(RelaxivityDistribution::new(
        Arc::new(hat),
        ProfileMode::Global,
    )));
    assert_eq!(session.config().relaxivity_interval, 0);

    session.run_walk(&never_cancel()).unwrap();

    let factor = session.config().relaxivity_factor(1.0);
    let walkers = session.walkers();
    assert!(walkers.iter().all(|w| w.rho == factor));
    let collided: Vec<_> = walkers.iter().filter(|w| w.collisions() > 0).collect();
    assert!(!collided.is_empty());
    assert!(collided.iter().all(|w| w.magnetization < 1.0));
    assert!(session.decay_log().last().unwrap().magnetization < 1.0);
}

#[test]
fn test_cyclic_profiles_stay_stationary() {
    let mut session = session_over(porous_grid(), 2000);
    session.set_bulk_time(f64::INFINITY).unwrap();
    session.set_max_iterations(4096).unwrap();
    session.set_relaxivity_interval(512);
    session.set_profile_interval(512);
    // Zero weight keeps magnetization intact so the walk runs to the cap
    let hat = HatRelaxivity::single(0.0, 1.0, 0.0, 0.0).unwrap();
    session.set_relaxivity(Some(RelaxivityDistribution::new(
        Arc::new(hat),
        ProfileMode::Cyclic,
    )));

    let report = session.run_walk(&never_cancel()).unwrap();
    assert_eq!(report.stop, StopReason::IterationCap);

    let means: Vec<f64> = session
        .collision_profiles()
        .iter()
        .map(|p| p.mean_frequency())
        .collect();
    assert_eq!(means.len(), 8);
    let first = means[0];
    assert!(first > 0.02, "{means:?}");
    for mean in &means {
        assert!((mean / first - 1.0).abs() < 0.25, "{means:?}");
    }
    // Counters restarted at the last refresh
    assert!(session.walkers().iter().all(|w| w.collisions() == 0));
}

#[test]
fn test_solid_plane_with_hat_relaxivity() {
    let mut session = session_over(BitGrid::with_solid_plane(16, 16, 16, 8), 2000);
    session.set_bulk_time(f64::INFINITY).unwrap();
    session.set_max_iterations(2048).unwrap();
    session.set_stop_threshold(1e-9).unwrap();
    session.set_relaxivity_interval(512);
    session.set_profile_interval(512);
    let hat = HatRelaxivity::single(0.0, 1.0, 1.0, 0.0).unwrap();
    session.set_relaxivity(Some(RelaxivityDistribution::new(
        Arc::new(hat),
        ProfileMode::Global,
    )));

    session.run_walk(&never_cancel()).unwrap();

    // The model applies from the first wall hit, not only after a refresh
    let log = session.decay_log();
    assert!(log[512].magnetization < 1.0);
    assert!(log.last().unwrap().magnetization < log[512].magnetization);

    let factor = session.config().relaxivity_factor(1.0);
    let walkers = session.walkers();
    assert!(walkers.iter().all(|w| w.rho == factor));
    assert!(walkers
        .iter()
        .filter(|w| w.collisions() == 0)
        .all(|w| w.magnetization == 1.0));
    assert!(walkers
        .iter()
        .any(|w| w.collisions() > 0 && w.magnetization < 1.0));

    let profiles = session.collision_profiles();
    assert_eq!(profiles.len(), 4);
    assert_eq!(profiles[3].iteration, 2048);
    for profile in profiles {
        assert!((profile.bins.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }
}

// =============================================================================
// EXTERNAL SIMULATORS, THREADS AND FAILURES
// =============================================================================

#[test]
fn test_external_simulator_drives_the_walk() {
    let mut session = session_over(BitGrid::all_pore(4, 4, 4), 10);
    session.set_bulk_time(f64::INFINITY).unwrap();
    session.set_stop_threshold(0.5).unwrap();
    session.set_external_simulator(Some(Box::new(AbsorbingSimulator::new(5000, 0.01).unwrap())));

    let report = session.run_walk(&never_cancel()).unwrap();
    assert_eq!(report.strategy, StrategyKind::External);
    assert!(report.placement.is_none());
    assert_eq!(report.stop, StopReason::Threshold);
    // (0.99)^n = 0.5 at n ≈ 69
    assert!((50..95).contains(&report.iterations), "{}", report.iterations);
}

#[test]
fn test_worker_thread_can_be_cancelled() {
    let mut session = session_over(BitGrid::all_pore(32, 32, 32), 20_000);
    session.set_bulk_time(f64::INFINITY).unwrap();
    session.set_max_iterations(u64::MAX / 2).unwrap();
    let observer = Arc::new(RecordingObserver::default());
    session.set_observer(Some(observer.clone()));

    let handle = session.start_walk().unwrap();
    handle.cancel();
    let outcome = handle.join().unwrap();
    let report = outcome.result.unwrap();

    assert_eq!(report.stop, StopReason::Cancelled);
    assert!(!outcome.session.monitor().snapshot().running);
    assert_eq!(
        observer.ends.lock().unwrap().as_slice(),
        &[WalkStatus::Finished(StopReason::Cancelled)]
    );
}

#[test]
fn test_worker_thread_runs_to_completion() {
    let mut session = session_over(porous_grid(), 1000);
    session.set_surface_delta(0.3).unwrap();
    session.set_stop_threshold(0.2).unwrap();
    let observer = Arc::new(RecordingObserver {
        show: true,
        ..Default::default()
    });
    session.set_observer(Some(observer.clone()));

    let handle = session.start_walk().unwrap();
    let monitor = handle.monitor().clone();
    let outcome = handle.join().unwrap();
    let report = outcome.result.unwrap();

    assert_eq!(report.stop, StopReason::Threshold);
    let state = monitor.snapshot();
    assert!(!state.running);
    assert_eq!(state.iteration, report.iterations);
    assert_eq!(state.positions.len(), 1000);
    assert_eq!(state.latest, outcome.session.decay_log().last().copied());

    let progress = observer.progress.lock().unwrap();
    assert!(!progress.is_empty());
    assert_eq!(*progress.last().unwrap(), 1.0);
    assert_eq!(*observer.walker_batches.lock().unwrap(), progress.len());
}

#[test]
fn test_all_solid_grid_reports_exhausted_placement() {
    let grid = BitGrid::from_fn(6, 6, 6, |_, _, _| true);
    let mut session = session_over(grid, 16);
    session.set_max_placement_attempts(1000).unwrap();
    let observer = Arc::new(RecordingObserver::default());
    session.set_observer(Some(observer.clone()));

    let err = session.run_walk(&never_cancel()).unwrap_err();
    assert!(matches!(
        err,
        SimulationError::PlacementExhausted { attempts: 1000, .. }
    ));
    let ends = observer.ends.lock().unwrap();
    assert!(matches!(ends.as_slice(), [WalkStatus::Failed(_)]));
}
