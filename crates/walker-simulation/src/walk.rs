//! Batch protocol shared by every walk strategy
//!
//! One call runs a whole walk: initial log entry, batches of sub-steps,
//! normalization and bulk decay, stop tests, collision profiles, relaxivity
//! refreshes, observer callbacks and the T1 inversion.

use crate::config::{Experiment, SimulationConfig};
use crate::error::SimulationError;
use crate::observer::{SessionMonitor, StopReason, WalkObserver};
use crate::profile::CollisionProfile;
use crate::relaxivity::{ProfileMode, RelaxivityDistribution};
use crate::seed::walk_rng;
use crate::session::DecayStep;
use crate::strategy::WalkStrategy;
use std::sync::atomic::{AtomicBool, Ordering};
use walker_physics::{Walker, BATCH_STEPS};

/// Decay-log entries reserved up front at most
const MAX_LOG_RESERVE: u64 = 1 << 20;

/// Borrowed session state a walk reads
pub(crate) struct WalkContext<'a> {
    pub config: &'a SimulationConfig,
    pub relaxivity: Option<&'a RelaxivityDistribution>,
    pub observer: Option<&'a dyn WalkObserver>,
    pub monitor: &'a SessionMonitor,
    pub cancel: &'a AtomicBool,
}

/// Output buffers a walk fills
pub(crate) struct WalkLog<'a> {
    pub decay: &'a mut Vec<DecayStep>,
    pub profiles: &'a mut Vec<CollisionProfile>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct WalkSummary {
    pub iterations: u64,
    pub stop: StopReason,
}

/// True when a multiple of `interval` lies in `(before, after]`
fn crossed(before: u64, after: u64, interval: u64) -> bool {
    interval > 0 && after / interval > before / interval
}

/// Fraction of the run done: how far magnetization has come towards the
/// threshold, or how far iterations have come towards the cap
fn progress(config: &SimulationConfig, magnetization: f64, iteration: u64) -> f64 {
    let by_decay = (1.0 - magnetization) / (1.0 - config.stop_threshold);
    let by_cap = iteration as f64 / config.max_iterations as f64;
    by_decay.max(by_cap).clamp(0.0, 1.0)
}

/// Iterations the current collision counts were gathered over. Cyclic
/// refreshes restart the counters.
fn collision_window(
    relaxivity: Option<&RelaxivityDistribution>,
    iteration: u64,
    last_refresh: u64,
) -> u64 {
    match relaxivity.map(RelaxivityDistribution::mode) {
        Some(ProfileMode::Cyclic) => iteration - last_refresh,
        _ => iteration,
    }
}

pub(crate) fn run(
    strategy: &mut dyn WalkStrategy,
    walkers: &mut [Walker],
    run_seed: u64,
    ctx: &WalkContext<'_>,
    output: WalkLog<'_>,
) -> Result<WalkSummary, SimulationError> {
    let config = ctx.config;
    let lattice = strategy.uses_lattice_walkers();

    output.decay.clear();
    output.profiles.clear();
    output
        .decay
        .reserve(config.max_iterations.min(MAX_LOG_RESERVE) as usize + 1);

    // Walkers start with no collisions, so the model is evaluated at ξ = 0
    // before any wall can be hit
    if let Some(distribution) = ctx.relaxivity.filter(|_| lattice) {
        distribution.update_walker_rho(walkers, 0, config);
    }

    let mut rng = walk_rng(run_seed);
    strategy.begin(walkers, run_seed)?;

    let population = strategy.population(walkers).max(1) as f64;
    let initial = DecayStep {
        iteration: 0,
        time: 0.0,
        magnetization: strategy.initial_magnetization(walkers),
    };
    output.decay.push(initial);
    ctx.monitor.update(|state| state.latest = Some(initial));

    let bulk_factor = config.bulk_step_factor();
    let mut bulk_decay = 1.0f64;
    let mut sums = vec![0.0f64; BATCH_STEPS];
    let mut iteration = 0u64;
    let mut last_refresh = 0u64;

    let stop = loop {
        if ctx.cancel.load(Ordering::Relaxed) {
            break StopReason::Cancelled;
        }
        if iteration >= config.max_iterations {
            break StopReason::IterationCap;
        }

        // The last batch is shortened so the cap is never overshot
        let steps = (config.max_iterations - iteration).min(BATCH_STEPS as u64) as usize;
        sums[..steps].fill(0.0);
        strategy.advance_batch(walkers, &mut rng, steps, &mut sums)?;

        let before = iteration;
        let mut reached = false;
        for &sum in &sums[..steps] {
            iteration += 1;
            bulk_decay *= bulk_factor;
            let step = DecayStep {
                iteration,
                time: iteration as f64 * config.time_step,
                magnetization: sum / population * bulk_decay,
            };
            output.decay.push(step);
            if step.magnetization <= config.stop_threshold {
                reached = true;
                break;
            }
        }

        if lattice {
            if crossed(before, iteration, config.profile_interval) {
                strategy.sync_walkers(walkers)?;
                let window = collision_window(ctx.relaxivity, iteration, last_refresh);
                output
                    .profiles
                    .push(CollisionProfile::snapshot(walkers, window, iteration));
            }
            if let Some(distribution) = ctx.relaxivity {
                if crossed(before, iteration, config.relaxivity_interval) {
                    strategy.sync_walkers(walkers)?;
                    let base = collision_window(Some(distribution), iteration, last_refresh);
                    distribution.update_walker_rho(walkers, base, config);
                    strategy.walkers_changed(walkers)?;
                    last_refresh = iteration;
                }
            }
        }

        let latest = output.decay.last().copied().unwrap_or(initial);
        let fraction = progress(config, latest.magnetization, iteration);
        let show = lattice && ctx.observer.is_some_and(|o| o.show_walkers());
        if show {
            strategy.sync_walkers(walkers)?;
        }
        if let Some(observer) = ctx.observer {
            observer.observe_walk(fraction, latest.magnetization, latest.time);
            if show {
                observer.walkers(walkers);
            }
        }
        ctx.monitor.update(|state| {
            state.iteration = iteration;
            state.latest = Some(latest);
            state.progress = fraction;
            if show {
                state.positions = walkers.iter().map(Walker::position).collect();
            }
        });

        if reached {
            break StopReason::Threshold;
        }
    };

    // Walkers may still live only on the device
    if lattice {
        strategy.sync_walkers(walkers)?;
    }

    if config.experiment == Experiment::T1 {
        for step in output.decay.iter_mut() {
            step.magnetization = 1.0 - 2.0 * step.magnetization;
        }
    }

    log::debug!("walk stopped after {iteration} iterations: {stop:?}");
    Ok(WalkSummary {
        iterations: iteration,
        stop,
    })
}
