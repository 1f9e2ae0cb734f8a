//! Walk strategies: how one batch of sub-steps is executed
//!
//! The batch protocol (seeding, normalization, bulk decay, stop tests,
//! profiles, relaxivity refreshes) lives in `walk.rs`; a strategy only
//! advances walkers and reports per-sub-step magnetization sums.

pub mod cpu;
pub mod external;
pub mod gpu;

pub use cpu::CpuWalkStrategy;
pub use external::{AbsorbingSimulator, ExternalSimulator, ExternalWalkStrategy};
pub use gpu::{GpuContext, GpuWalkStrategy};

use crate::error::SimulationError;
use rand::rngs::StdRng;
use std::sync::Arc;
use walker_physics::{VoxelGrid, Walker};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrategyKind {
    Cpu { dimension: u32 },
    Gpu { dimension: u32 },
    External,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu { dimension } => write!(f, "cpu-{dimension}d"),
            Self::Gpu { dimension } => write!(f, "gpu-{dimension}d"),
            Self::External => write!(f, "external"),
        }
    }
}

/// Pick a strategy. An injected simulator always wins, then the GPU flag.
pub fn select_strategy(dimension: u32, gpu_enabled: bool, has_external: bool) -> StrategyKind {
    if has_external {
        StrategyKind::External
    } else if gpu_enabled {
        StrategyKind::Gpu { dimension }
    } else {
        StrategyKind::Cpu { dimension }
    }
}

/// Everything a lattice strategy needs besides the walkers
#[derive(Clone)]
pub struct LatticeInputs {
    pub grid: Arc<dyn VoxelGrid>,
    pub dimension: u32,
    /// Dephasing multiplier per move draw
    pub dephasing: [f32; 6],
}

pub trait WalkStrategy {
    fn kind(&self) -> StrategyKind;

    /// Whether the session's walker array is what gets walked
    fn uses_lattice_walkers(&self) -> bool {
        true
    }

    /// Walker count the per-step sums are normalized by
    fn population(&self, walkers: &[Walker]) -> usize {
        walkers.len()
    }

    /// Mean magnetization before the first sub-step
    fn initial_magnetization(&self, walkers: &[Walker]) -> f64 {
        if walkers.is_empty() {
            return 0.0;
        }
        walkers.iter().map(|w| w.magnetization as f64).sum::<f64>() / walkers.len() as f64
    }

    /// Called once before the first batch
    fn begin(&mut self, walkers: &[Walker], run_seed: u64) -> Result<(), SimulationError>;

    /// Advance every walker `steps` sub-steps, adding the summed magnetization
    /// after each sub-step into `sums[..steps]`.
    fn advance_batch(
        &mut self,
        walkers: &mut [Walker],
        rng: &mut StdRng,
        steps: usize,
        sums: &mut [f64],
    ) -> Result<(), SimulationError>;

    /// Make the host walker array current
    fn sync_walkers(&mut self, _walkers: &mut [Walker]) -> Result<(), SimulationError> {
        Ok(())
    }

    /// The host walker array was modified and must be pushed back
    fn walkers_changed(&mut self, _walkers: &[Walker]) -> Result<(), SimulationError> {
        Ok(())
    }
}

/// Build the strategy for `kind`. GPU failures surface as `DeviceError`;
/// the session decides about falling back.
pub fn create_strategy<'a>(
    kind: StrategyKind,
    lattice: &LatticeInputs,
    walker_count: usize,
    external: Option<&'a mut dyn ExternalSimulator>,
) -> Result<Box<dyn WalkStrategy + 'a>, SimulationError> {
    match kind {
        StrategyKind::Cpu { .. } => Ok(Box::new(CpuWalkStrategy::new(lattice.clone()))),
        StrategyKind::Gpu { .. } => {
            let context = GpuContext::new()?;
            Ok(Box::new(GpuWalkStrategy::new(
                context,
                lattice.clone(),
                walker_count,
            )?))
        }
        StrategyKind::External => match external {
            Some(simulator) => Ok(Box::new(ExternalWalkStrategy::new(simulator))),
            None => Err(SimulationError::External(
                "external strategy selected without a simulator".into(),
            )),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_precedence() {
        assert_eq!(select_strategy(3, false, false), StrategyKind::Cpu { dimension: 3 });
        assert_eq!(select_strategy(2, true, false), StrategyKind::Gpu { dimension: 2 });
        assert_eq!(select_strategy(3, true, true), StrategyKind::External);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(StrategyKind::Cpu { dimension: 2 }.to_string(), "cpu-2d");
        assert_eq!(StrategyKind::Gpu { dimension: 3 }.to_string(), "gpu-3d");
        assert_eq!(StrategyKind::External.to_string(), "external");
    }
}
