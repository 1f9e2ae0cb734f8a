//! Simulation session: configuration, walkers, decay log and run lifecycle

use crate::config::{self, Experiment, SimulationConfig};
use crate::error::{ConfigurationError, SimulationError};
use crate::observer::{MonitorState, SessionMonitor, StopReason, WalkObserver, WalkStatus};
use crate::placement::{place_walkers, PlacementReport};
use crate::profile::CollisionProfile;
use crate::relaxivity::RelaxivityDistribution;
use crate::seed::{placement_seed, SeedSource};
use crate::strategy::{
    create_strategy, select_strategy, ExternalSimulator, LatticeInputs, StrategyKind,
};
use crate::walk::{self, WalkContext, WalkLog, WalkSummary};
use glam::{DVec3, UVec3};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use walker_physics::{dephasing_table, FieldGradient, VoxelGrid, Walker};

/// One entry of the decay curve
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DecayStep {
    pub iteration: u64,
    /// Simulated time (ms)
    pub time: f64,
    /// Normalized aggregate magnetization
    pub magnetization: f64,
}

/// Summary of a finished walk
#[derive(Clone, Debug, PartialEq)]
pub struct WalkReport {
    /// Strategy that produced the log (CPU after a GPU fallback)
    pub strategy: StrategyKind,
    pub iterations: u64,
    pub elapsed_seconds: f64,
    pub stop: StopReason,
    pub seed: u64,
    /// Placement done for this run, if any
    pub placement: Option<PlacementReport>,
}

pub struct Session {
    grid: Arc<dyn VoxelGrid>,
    config: SimulationConfig,
    walkers: Vec<Walker>,
    /// Replaces the configured uniform gradient when set
    gradient: Option<Arc<dyn FieldGradient>>,
    relaxivity: Option<RelaxivityDistribution>,
    observer: Option<Arc<dyn WalkObserver>>,
    external: Option<Box<dyn ExternalSimulator>>,

    seeds: SeedSource,
    /// Seed of the last run, reused when paths are repeated
    seed: Option<u64>,

    decay: Vec<DecayStep>,
    profiles: Vec<CollisionProfile>,
    total_iterations: u64,
    placed: bool,
    monitor: SessionMonitor,
}

impl Session {
    /// Session with default configuration over `grid`
    pub fn new(grid: Arc<dyn VoxelGrid>) -> Self {
        let config = SimulationConfig::default();
        let seeds = SeedSource::new(config.master_seed);
        let mut session = Self {
            grid,
            config,
            walkers: Vec::new(),
            gradient: None,
            relaxivity: None,
            observer: None,
            external: None,
            seeds,
            seed: None,
            decay: Vec::new(),
            profiles: Vec::new(),
            total_iterations: 0,
            placed: false,
            monitor: SessionMonitor::new(),
        };
        session.rebuild_walkers();
        session
    }

    pub fn with_config(
        grid: Arc<dyn VoxelGrid>,
        config: SimulationConfig,
    ) -> Result<Self, ConfigurationError> {
        config.validate_for(&*grid)?;
        let mut session = Self::new(grid);
        session.seeds = SeedSource::new(config.master_seed);
        session.config = config;
        session.rebuild_walkers();
        Ok(session)
    }

    /// Fresh walkers for the current count, dimension and surface delta
    fn rebuild_walkers(&mut self) {
        let walker = Walker::new(self.config.dimension, self.config.surface_factor());
        self.walkers = vec![walker; self.config.walker_count];
        self.placed = false;
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn grid(&self) -> &Arc<dyn VoxelGrid> {
        &self.grid
    }

    // --- Configuration ---

    pub fn set_walker_count(&mut self, count: usize) -> Result<(), ConfigurationError> {
        config::check_walker_count(count)?;
        self.config.walker_count = count;
        self.rebuild_walkers();
        Ok(())
    }

    pub fn set_dimension(&mut self, dimension: u32) -> Result<(), ConfigurationError> {
        config::check_dimension(dimension)?;
        self.config.dimension = dimension;
        self.rebuild_walkers();
        Ok(())
    }

    pub fn set_time_step(&mut self, time_step: f64) -> Result<(), ConfigurationError> {
        config::check_time_step(time_step)?;
        self.config.time_step = time_step;
        self.placed = false;
        Ok(())
    }

    /// Use the unbiased lattice step Δx² / (2·d·D₀) for the current settings
    pub fn use_lattice_time_step(&mut self) {
        self.config.time_step = config::lattice_time_step(
            self.config.voxel_length,
            self.config.diffusion_coefficient,
            self.config.dimension,
        );
        self.placed = false;
    }

    pub fn set_stop_threshold(&mut self, threshold: f64) -> Result<(), ConfigurationError> {
        config::check_stop_threshold(threshold)?;
        self.config.stop_threshold = threshold;
        Ok(())
    }

    pub fn set_max_iterations(&mut self, cap: u64) -> Result<(), ConfigurationError> {
        config::check_iteration_cap(cap)?;
        self.config.max_iterations = cap;
        Ok(())
    }

    /// Bulk relaxation time (ms); `f64::INFINITY` disables bulk decay
    pub fn set_bulk_time(&mut self, bulk_time: f64) -> Result<(), ConfigurationError> {
        config::check_bulk_time(bulk_time)?;
        self.config.bulk_time = bulk_time;
        self.placed = false;
        Ok(())
    }

    pub fn set_surface_delta(&mut self, delta: f64) -> Result<(), ConfigurationError> {
        config::check_surface_delta(delta)?;
        self.config.surface_delta = delta;
        self.rebuild_walkers();
        Ok(())
    }

    /// Set the surface delta from a physical relaxivity ρ (µm/ms)
    pub fn set_surface_relaxivity(&mut self, rho: f64) -> Result<(), ConfigurationError> {
        if !(rho.is_finite() && rho >= 0.0) {
            return Err(ConfigurationError::Physical {
                name: "surface relaxivity",
                value: rho,
            });
        }
        let delta = 1.0 - self.config.relaxivity_factor(rho) as f64;
        self.set_surface_delta(delta.clamp(0.0, 1.0))
    }

    pub fn set_physical_scale(
        &mut self,
        voxel_length: f64,
        diffusion_coefficient: f64,
    ) -> Result<(), ConfigurationError> {
        config::check_physical("voxel length", voxel_length)?;
        config::check_physical("diffusion coefficient", diffusion_coefficient)?;
        self.config.voxel_length = voxel_length;
        self.config.diffusion_coefficient = diffusion_coefficient;
        self.placed = false;
        Ok(())
    }

    /// Custom field model, used instead of the configured uniform gradient
    pub fn set_gradient(&mut self, gradient: Option<Arc<dyn FieldGradient>>) {
        self.gradient = gradient;
    }

    /// Constant internal gradient (mT/µm). It is sampled with the voxel
    /// length and time step in effect when a walk starts.
    pub fn set_uniform_gradient(&mut self, gradient: DVec3) -> Result<(), ConfigurationError> {
        config::check_gradient(gradient)?;
        self.config.gradient = gradient;
        self.gradient = None;
        Ok(())
    }

    /// Collision profile cadence in iterations, 0 disables
    pub fn set_profile_interval(&mut self, interval: u64) {
        self.config.profile_interval = interval;
    }

    /// Relaxivity refresh cadence in iterations, 0 disables
    pub fn set_relaxivity_interval(&mut self, interval: u64) {
        self.config.relaxivity_interval = interval;
    }

    pub fn set_gpu_enabled(&mut self, enabled: bool) {
        self.config.gpu_enabled = enabled;
    }

    /// Repeat the walk of a previous run. With a seed the next run uses it,
    /// otherwise the last run's seed is reused.
    pub fn set_repeat_paths(&mut self, repeat: bool, seed: Option<u64>) {
        self.config.repeat_paths = repeat;
        if seed.is_some() {
            self.seed = seed;
        }
    }

    pub fn set_recharge(&mut self, recharge: bool) {
        self.config.recharge = recharge;
    }

    pub fn set_experiment(&mut self, experiment: Experiment) {
        self.config.experiment = experiment;
    }

    pub fn set_max_placement_attempts(&mut self, attempts: u64) -> Result<(), ConfigurationError> {
        if attempts == 0 {
            return Err(ConfigurationError::PlacementAttempts);
        }
        self.config.max_placement_attempts = attempts;
        Ok(())
    }

    pub fn set_observer(&mut self, observer: Option<Arc<dyn WalkObserver>>) {
        self.observer = observer;
    }

    pub fn set_relaxivity(&mut self, relaxivity: Option<RelaxivityDistribution>) {
        self.relaxivity = relaxivity;
    }

    /// Inject a simulator; while set it replaces the lattice walk
    pub fn set_external_simulator(&mut self, simulator: Option<Box<dyn ExternalSimulator>>) {
        self.external = simulator;
    }

    // --- Running ---

    /// Place walkers uniformly over pore voxels
    pub fn place_walkers(&mut self, seed: u64) -> Result<PlacementReport, SimulationError> {
        self.config.validate_for(&*self.grid)?;
        if self.config.recharge {
            let (dimension, rho) = (self.config.dimension, self.config.surface_factor());
            self.walkers
                .par_iter_mut()
                .for_each(|walker| walker.set(dimension, rho, 0));
        }
        let report = place_walkers(
            &mut self.walkers,
            &*self.grid,
            self.config.dimension,
            placement_seed(seed),
            self.config.max_placement_attempts,
            self.config.recharge,
        )?;
        self.placed = true;
        Ok(report)
    }

    pub fn is_placed(&self) -> bool {
        self.placed
    }

    /// Run one walk on the calling thread. `cancel` is checked between batches.
    pub fn run_walk(&mut self, cancel: &AtomicBool) -> Result<WalkReport, SimulationError> {
        let start = Instant::now();
        self.monitor.update(|state| {
            *state = MonitorState {
                running: true,
                ..Default::default()
            }
        });

        let result = self.try_walk(cancel);
        let elapsed = start.elapsed().as_secs_f64();
        self.monitor.update(|state| state.running = false);

        let status = match &result {
            Ok(report) => {
                log::info!(
                    "✓ Walk finished: {} iterations in {:.2}s ({}, {:?})",
                    report.iterations,
                    elapsed,
                    report.strategy,
                    report.stop
                );
                WalkStatus::Finished(report.stop)
            }
            Err(e) => {
                log::error!("Walk failed after {elapsed:.2}s: {e}");
                WalkStatus::Failed(e.to_string())
            }
        };
        if let Some(observer) = &self.observer {
            observer.walk_end(elapsed, &status);
        }

        result.map(|report| WalkReport {
            elapsed_seconds: elapsed,
            ..report
        })
    }

    fn try_walk(&mut self, cancel: &AtomicBool) -> Result<WalkReport, SimulationError> {
        self.config.validate_for(&*self.grid)?;

        let run_seed = match (self.config.repeat_paths, self.seed) {
            (true, Some(seed)) => seed,
            _ => self.seeds.next_seed(),
        };
        self.seed = Some(run_seed);

        let kind = select_strategy(
            self.config.dimension,
            self.config.gpu_enabled,
            self.external.is_some(),
        );
        log::info!(
            "Starting walk: {kind}, {} walkers, seed {run_seed:#x}",
            self.config.walker_count
        );

        let mut placement = None;
        if kind != StrategyKind::External {
            if !self.placed || self.config.repeat_paths {
                placement = Some(self.place_walkers(run_seed)?);
            } else if self.config.recharge {
                self.walkers.par_iter_mut().for_each(Walker::recharge);
            }
        }

        let snapshot = matches!(kind, StrategyKind::Gpu { .. }).then(|| self.walkers.clone());
        let (kind, summary) = match self.walk_with(kind, run_seed, cancel) {
            Ok(summary) => (kind, summary),
            Err(SimulationError::Device(error)) if snapshot.is_some() => {
                log::warn!("GPU walk failed ({error}), falling back to CPU");
                if let Some(walkers) = snapshot {
                    self.walkers = walkers;
                }
                let fallback = StrategyKind::Cpu {
                    dimension: self.config.dimension,
                };
                (fallback, self.walk_with(fallback, run_seed, cancel)?)
            }
            Err(e) => return Err(e),
        };

        self.total_iterations = summary.iterations;
        Ok(WalkReport {
            strategy: kind,
            iterations: summary.iterations,
            elapsed_seconds: 0.0,
            stop: summary.stop,
            seed: run_seed,
            placement,
        })
    }

    fn walk_with(
        &mut self,
        kind: StrategyKind,
        run_seed: u64,
        cancel: &AtomicBool,
    ) -> Result<WalkSummary, SimulationError> {
        let lattice = LatticeInputs {
            grid: Arc::clone(&self.grid),
            dimension: self.config.dimension,
            dephasing: match &self.gradient {
                Some(gradient) => dephasing_table(&**gradient),
                None => dephasing_table(&self.config.uniform_gradient()),
            },
        };
        let external = self
            .external
            .as_deref_mut()
            .map(|simulator| simulator as &mut dyn ExternalSimulator);
        let mut strategy = create_strategy(kind, &lattice, self.walkers.len(), external)?;

        let ctx = WalkContext {
            config: &self.config,
            relaxivity: self.relaxivity.as_ref(),
            observer: self.observer.as_deref(),
            monitor: &self.monitor,
            cancel,
        };
        walk::run(
            strategy.as_mut(),
            &mut self.walkers,
            run_seed,
            &ctx,
            WalkLog {
                decay: &mut self.decay,
                profiles: &mut self.profiles,
            },
        )
    }

    /// Run the walk on a named worker thread
    pub fn start_walk(mut self) -> Result<WalkHandle, SimulationError> {
        let cancel = Arc::new(AtomicBool::new(false));
        let monitor = self.monitor.clone();
        let flag = Arc::clone(&cancel);
        let worker = std::thread::Builder::new()
            .name("nmr-walk".into())
            .spawn(move || {
                let result = self.run_walk(&flag);
                WalkOutcome {
                    session: self,
                    result,
                }
            })
            .map_err(|e| SimulationError::Spawn(e.to_string()))?;
        Ok(WalkHandle {
            cancel,
            monitor,
            worker,
        })
    }

    // --- Results ---

    pub fn decay_len(&self) -> usize {
        self.decay.len()
    }

    pub fn decay_step(&self, index: usize) -> Option<DecayStep> {
        self.decay.get(index).copied()
    }

    pub fn decay_log(&self) -> &[DecayStep] {
        &self.decay
    }

    /// Iterations simulated by the last run
    pub fn total_iterations(&self) -> u64 {
        self.total_iterations
    }

    pub fn walkers(&self) -> &[Walker] {
        &self.walkers
    }

    pub fn walker_collisions(&self, index: usize) -> Option<u32> {
        self.walkers.get(index).map(Walker::collisions)
    }

    pub fn walker_position(&self, index: usize) -> Option<UVec3> {
        self.walkers.get(index).map(Walker::position)
    }

    /// Profiles taken every `profile_interval` iterations of the last run
    pub fn collision_profiles(&self) -> &[CollisionProfile] {
        &self.profiles
    }

    /// Profile of the current walker state over the last run's iterations
    pub fn collision_profile(&self) -> CollisionProfile {
        CollisionProfile::snapshot(&self.walkers, self.total_iterations, self.total_iterations)
    }

    /// Seed of the last run
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn monitor(&self) -> SessionMonitor {
        self.monitor.clone()
    }
}

/// The session handed back by a finished worker, with the walk result
pub struct WalkOutcome {
    pub session: Session,
    pub result: Result<WalkReport, SimulationError>,
}

/// Handle on a walk running on its worker thread
pub struct WalkHandle {
    cancel: Arc<AtomicBool>,
    monitor: SessionMonitor,
    worker: JoinHandle<WalkOutcome>,
}

impl WalkHandle {
    /// Ask the worker to stop at the next batch boundary
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn monitor(&self) -> &SessionMonitor {
        &self.monitor
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Wait for the worker. A panicking worker loses the session.
    pub fn join(self) -> Result<WalkOutcome, SimulationError> {
        self.worker.join().map_err(|_| SimulationError::WorkerPanicked)
    }
}
