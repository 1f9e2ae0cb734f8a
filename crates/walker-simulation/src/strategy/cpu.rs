//! Data-parallel CPU walk

use super::{LatticeInputs, StrategyKind, WalkStrategy};
use crate::error::SimulationError;
use crate::seed::batch_seeds;
use glam::UVec3;
use rand::rngs::StdRng;
use rayon::prelude::*;
use walker_physics::{
    decode_direction, direction_count, expand_draws, in_bounds, VoxelGrid, Walker, BATCH_STEPS,
};

/// Walkers whose draws are materialized at once (64 Ki walkers × 512 B)
const CPU_BLOCK_WALKERS: usize = 1 << 16;

/// Walkers per rayon work item; each gets its own accumulator
const CPU_CHUNK_WALKERS: usize = 256;

pub struct CpuWalkStrategy {
    lattice: LatticeInputs,
    dimensions: UVec3,
    draws: Vec<u8>,
}

impl CpuWalkStrategy {
    pub fn new(lattice: LatticeInputs) -> Self {
        let dimensions = lattice.grid.dimensions();
        Self {
            lattice,
            dimensions,
            draws: Vec::new(),
        }
    }
}

impl WalkStrategy for CpuWalkStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Cpu {
            dimension: self.lattice.dimension,
        }
    }

    fn begin(&mut self, walkers: &[Walker], _run_seed: u64) -> Result<(), SimulationError> {
        let block = walkers.len().min(CPU_BLOCK_WALKERS);
        self.draws = vec![0; block * BATCH_STEPS];
        log::debug!(
            "cpu walk: {} walkers, {} threads",
            walkers.len(),
            rayon::current_num_threads()
        );
        Ok(())
    }

    fn advance_batch(
        &mut self,
        walkers: &mut [Walker],
        rng: &mut StdRng,
        steps: usize,
        sums: &mut [f64],
    ) -> Result<(), SimulationError> {
        let seeds = batch_seeds(rng, walkers.len());
        let directions = direction_count(self.lattice.dimension);
        let grid: &dyn VoxelGrid = &*self.lattice.grid;
        let dephasing = &self.lattice.dephasing;
        let dimensions = self.dimensions;

        for (block, block_seeds) in walkers
            .chunks_mut(CPU_BLOCK_WALKERS)
            .zip(seeds.chunks(CPU_BLOCK_WALKERS))
        {
            let needed = block.len() * steps;
            if self.draws.len() < needed {
                self.draws.resize(needed, 0);
            }
            let draws = &mut self.draws[..needed];

            // All draws of the block up front, then the walk itself
            draws
                .par_chunks_mut(steps)
                .zip(block_seeds.par_iter())
                .for_each(|(walker_draws, &seed)| expand_draws(seed, directions, walker_draws));

            // Chunk accumulators are joined in chunk order so the sums do
            // not depend on how rayon scheduled the chunks
            let partials: Vec<Vec<f64>> = block
                .par_chunks_mut(CPU_CHUNK_WALKERS)
                .zip(draws.par_chunks(CPU_CHUNK_WALKERS * steps))
                .map(|(chunk, chunk_draws)| {
                    let mut acc = vec![0.0f64; steps];
                    for (walker, walker_draws) in chunk.iter_mut().zip(chunk_draws.chunks(steps)) {
                        walk_walker(walker, walker_draws, grid, dimensions, dephasing, &mut acc);
                    }
                    acc
                })
                .collect();

            for partial in &partials {
                sums[..steps]
                    .iter_mut()
                    .zip(partial)
                    .for_each(|(sum, p)| *sum += p);
            }
        }
        Ok(())
    }
}

/// Walk one walker through `draws`, adding its magnetization after every
/// sub-step into `sums`.
///
/// Out-of-grid candidates are no-ops; solid candidates are collisions and
/// leave the walker in place; pore candidates move it and apply the
/// dephasing factor of the move. `walk.wgsl` mirrors this exactly.
pub fn walk_walker(
    walker: &mut Walker,
    draws: &[u8],
    grid: &dyn VoxelGrid,
    dimensions: UVec3,
    dephasing: &[f32; 6],
    sums: &mut [f64],
) {
    if !walker.alive() {
        return;
    }
    let mut position = walker.position().as_ivec3();
    for (step, &draw) in draws.iter().enumerate() {
        let candidate = position + decode_direction(draw as u32);
        if in_bounds(candidate, dimensions) {
            let voxel = candidate.as_uvec3();
            if grid.is_solid(voxel.x, voxel.y, voxel.z) {
                walker.degrade();
            } else {
                position = candidate;
                walker.magnetization *= dephasing[draw as usize];
            }
        }
        sums[step] += walker.magnetization as f64;
        if !walker.alive() {
            break;
        }
    }
    walker.set_position(position.as_uvec3());
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use std::sync::Arc;
    use walker_physics::BitGrid;

    fn lattice(grid: BitGrid, dephasing: [f32; 6]) -> LatticeInputs {
        LatticeInputs {
            grid: Arc::new(grid),
            dimension: 3,
            dephasing,
        }
    }

    #[test]
    fn test_boundary_is_a_no_op() {
        let grid = BitGrid::all_pore(1, 1, 1);
        let mut walker = Walker::new(3, 0.5);
        let mut sums = vec![0.0; 6];
        walk_walker(&mut walker, &[0, 1, 2, 3, 4, 5], &grid, grid.dimensions(), &[0.9; 6], &mut sums);
        assert_eq!(walker.position(), UVec3::ZERO);
        assert_eq!(walker.collisions(), 0);
        assert_eq!(walker.magnetization, 1.0);
        assert_eq!(sums, vec![1.0; 6]);
    }

    #[test]
    fn test_free_moves_only_dephase() {
        let grid = BitGrid::all_pore(8, 8, 8);
        let mut walker = Walker::new(3, 0.5);
        walker.set_position(UVec3::new(4, 4, 4));
        let dephasing = [0.5, 0.5, 1.0, 1.0, 0.25, 0.25];
        let mut sums = vec![0.0; 3];
        walk_walker(&mut walker, &[0, 2, 4], &grid, grid.dimensions(), &dephasing, &mut sums);
        assert_eq!(walker.position(), UVec3::new(5, 5, 5));
        assert_eq!(walker.collisions(), 0);
        assert_eq!(sums, vec![0.5, 0.5, 0.125]);
    }

    #[test]
    fn test_collision_applies_rho_exactly_and_stays_put() {
        let grid = BitGrid::with_solid_plane(4, 4, 4, 2);
        let mut walker = Walker::new(3, 0.8);
        walker.set_position(UVec3::new(1, 1, 1));
        let before = walker.magnetization;
        let mut sums = vec![0.0; 1];
        walk_walker(&mut walker, &[0], &grid, grid.dimensions(), &[1.0; 6], &mut sums);
        assert_eq!(walker.position(), UVec3::new(1, 1, 1));
        assert_eq!(walker.collisions(), 1);
        assert_eq!(walker.magnetization, before * 0.8);
    }

    #[test]
    fn test_batch_never_enters_solid() {
        let grid = BitGrid::from_fn(10, 10, 10, |x, y, z| (x + 2 * y + 3 * z) % 5 == 0);
        let mut walkers = vec![Walker::new(3, 0.99); 2000];
        crate::placement::place_walkers(&mut walkers, &grid, 3, 4, 10_000, true).unwrap();
        let mut strategy = CpuWalkStrategy::new(lattice(grid.clone(), [1.0; 6]));
        strategy.begin(&walkers, 0).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..4 {
            let mut sums = vec![0.0; BATCH_STEPS];
            strategy
                .advance_batch(&mut walkers, &mut rng, BATCH_STEPS, &mut sums)
                .unwrap();
            for walker in &walkers {
                let p = walker.position();
                assert!(!grid.is_solid(p.x, p.y, p.z));
            }
            assert!(sums.windows(2).all(|w| w[1] <= w[0] + 1e-9));
        }
        assert!(walkers.iter().any(|w| w.collisions() > 0));
    }

    #[test]
    fn test_partial_batch_only_fills_requested_steps() {
        let grid = BitGrid::all_pore(6, 6, 6);
        let mut walkers = vec![Walker::new(3, 1.0); 100];
        let mut strategy = CpuWalkStrategy::new(lattice(grid, [1.0; 6]));
        strategy.begin(&walkers, 0).unwrap();
        let mut sums = vec![0.0; BATCH_STEPS];
        strategy
            .advance_batch(&mut walkers, &mut StdRng::seed_from_u64(2), 10, &mut sums)
            .unwrap();
        assert!(sums[..10].iter().all(|&s| s == 100.0));
        assert!(sums[10..].iter().all(|&s| s == 0.0));
    }
}
