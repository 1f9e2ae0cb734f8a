//! Walks driven by an injected simulator instead of the voxel lattice

use super::{StrategyKind, WalkStrategy};
use crate::error::{ConfigurationError, SimulationError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use walker_physics::Walker;

/// A simulator that owns its own particles and collision mechanics.
///
/// The session still drives batching, normalization, bulk decay and the
/// stop tests; the simulator only reports summed magnetization per sub-step.
pub trait ExternalSimulator: Send {
    /// Particle count the per-step sums are normalized by
    fn population(&self) -> usize;

    /// Mean magnetization before the first sub-step
    fn initial_magnetization(&self) -> f64 {
        1.0
    }

    /// Restart from the initial state with a fresh run seed
    fn reset(&mut self, seed: u64) -> Result<(), SimulationError>;

    /// Advance `steps` sub-steps, adding summed magnetization into `sums[..steps]`
    fn advance(&mut self, steps: usize, sums: &mut [f64]) -> Result<(), SimulationError>;

    /// Particles killed so far in this run
    fn kill_count(&self) -> u64;
}

pub struct ExternalWalkStrategy<'a> {
    simulator: &'a mut dyn ExternalSimulator,
}

impl<'a> ExternalWalkStrategy<'a> {
    pub fn new(simulator: &'a mut dyn ExternalSimulator) -> Self {
        Self { simulator }
    }
}

impl WalkStrategy for ExternalWalkStrategy<'_> {
    fn kind(&self) -> StrategyKind {
        StrategyKind::External
    }

    fn uses_lattice_walkers(&self) -> bool {
        false
    }

    fn population(&self, _walkers: &[Walker]) -> usize {
        self.simulator.population()
    }

    fn initial_magnetization(&self, _walkers: &[Walker]) -> f64 {
        self.simulator.initial_magnetization()
    }

    fn begin(&mut self, _walkers: &[Walker], run_seed: u64) -> Result<(), SimulationError> {
        self.simulator.reset(run_seed)
    }

    fn advance_batch(
        &mut self,
        _walkers: &mut [Walker],
        _rng: &mut StdRng,
        steps: usize,
        sums: &mut [f64],
    ) -> Result<(), SimulationError> {
        self.simulator.advance(steps, sums)?;
        log::trace!("external walk: {} killed", self.simulator.kill_count());
        Ok(())
    }
}

/// Analytic test simulator: every live particle is absorbed with a fixed
/// probability per sub-step, so the expected decay is `(1 - p)^n`.
pub struct AbsorbingSimulator {
    particles: Vec<Walker>,
    probability: f64,
    rng: StdRng,
    killed: u64,
}

impl AbsorbingSimulator {
    pub fn new(population: usize, probability: f64) -> Result<Self, ConfigurationError> {
        if population == 0 {
            return Err(ConfigurationError::WalkerCount);
        }
        if !(0.0..=1.0).contains(&probability) {
            return Err(ConfigurationError::Physical {
                name: "absorption probability",
                value: probability,
            });
        }
        Ok(Self {
            particles: vec![Walker::new(3, 1.0); population],
            probability,
            rng: StdRng::seed_from_u64(0),
            killed: 0,
        })
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }
}

impl ExternalSimulator for AbsorbingSimulator {
    fn population(&self) -> usize {
        self.particles.len()
    }

    fn reset(&mut self, seed: u64) -> Result<(), SimulationError> {
        self.particles.iter_mut().for_each(Walker::recharge);
        self.rng = StdRng::seed_from_u64(seed);
        self.killed = 0;
        Ok(())
    }

    fn advance(&mut self, steps: usize, sums: &mut [f64]) -> Result<(), SimulationError> {
        if sums.len() < steps {
            return Err(SimulationError::External(format!(
                "{} sums for {steps} steps",
                sums.len()
            )));
        }
        for sum in &mut sums[..steps] {
            for particle in self.particles.iter_mut().filter(|p| p.alive()) {
                if self.rng.random::<f64>() < self.probability {
                    particle.kill();
                    self.killed += 1;
                }
            }
            *sum += self
                .particles
                .iter()
                .map(|p| p.magnetization as f64)
                .sum::<f64>();
        }
        Ok(())
    }

    fn kill_count(&self) -> u64 {
        self.killed
    }
}
