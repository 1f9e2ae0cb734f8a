//! Uniform placement of walkers over pore voxels
//!
//! Rejection sampling in parallel chunks. Grid reads are lock-free; the
//! occupancy histogram is only locked when a draw is accepted and is dropped
//! when placement returns.

use crate::error::SimulationError;
use glam::UVec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use walker_physics::{pack_position, VoxelGrid, Walker};

/// Walkers placed per RNG stream; fixed so placement is reproducible
/// regardless of the thread count.
const PLACEMENT_CHUNK: usize = 1024;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlacementReport {
    pub walkers: usize,
    pub distinct_sites: usize,
    pub max_occupancy: u32,
    pub rejected_draws: u64,
}

/// Draw a pore voxel, giving up after `max_attempts` rejections.
/// 2D walks only use the `z = 0` slice.
pub fn draw_pore_position(
    rng: &mut StdRng,
    grid: &dyn VoxelGrid,
    dimension: u32,
    max_attempts: u64,
) -> Option<(UVec3, u64)> {
    let dims = grid.dimensions();
    let slice = dims.x as u64 * dims.y as u64;
    let sites = if dimension == 2 { slice } else { slice * dims.z as u64 };
    if sites == 0 {
        return None;
    }
    for attempt in 0..max_attempts {
        let index = rng.random_range(0..sites);
        let position = UVec3::new(
            (index % dims.x as u64) as u32,
            ((index / dims.x as u64) % dims.y as u64) as u32,
            (index / slice) as u32,
        );
        if !grid.is_solid(position.x, position.y, position.z) {
            return Some((position, attempt));
        }
    }
    None
}

/// Place every walker on a pore voxel and optionally recharge it
pub fn place_walkers(
    walkers: &mut [Walker],
    grid: &dyn VoxelGrid,
    dimension: u32,
    seed: u64,
    max_attempts: u64,
    recharge: bool,
) -> Result<PlacementReport, SimulationError> {
    let histogram: Mutex<HashMap<u64, u32>> = Mutex::new(HashMap::new());
    let rejected = AtomicU64::new(0);
    let mut positions = vec![UVec3::ZERO; walkers.len()];

    positions
        .par_chunks_mut(PLACEMENT_CHUNK)
        .enumerate()
        .try_for_each(|(chunk, slots)| {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(chunk as u64));
            for (offset, slot) in slots.iter_mut().enumerate() {
                let walker = chunk * PLACEMENT_CHUNK + offset;
                let (position, misses) = draw_pore_position(&mut rng, grid, dimension, max_attempts)
                    .ok_or(SimulationError::PlacementExhausted {
                        walker,
                        attempts: max_attempts,
                    })?;
                rejected.fetch_add(misses, Ordering::Relaxed);
                *slot = position;

                let key = pack_position(position);
                *histogram
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .entry(key)
                    .or_insert(0) += 1;
            }
            Ok::<(), SimulationError>(())
        })?;

    walkers
        .par_iter_mut()
        .zip(positions.par_iter())
        .for_each(|(walker, &position)| {
            walker.set_position(position);
            if recharge {
                walker.recharge();
            }
        });

    let histogram = histogram.into_inner().unwrap_or_else(PoisonError::into_inner);
    let report = PlacementReport {
        walkers: walkers.len(),
        distinct_sites: histogram.len(),
        max_occupancy: histogram.values().copied().max().unwrap_or(0),
        rejected_draws: rejected.into_inner(),
    };
    log::debug!(
        "placed {} walkers on {} sites (max {} per site, {} rejected draws)",
        report.walkers,
        report.distinct_sites,
        report.max_occupancy,
        report.rejected_draws
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use walker_physics::BitGrid;

    #[test]
    fn test_walkers_only_land_in_pores() {
        let grid = BitGrid::from_fn(12, 9, 7, |x, y, z| (x * 7 + y * 3 + z) % 4 == 0);
        let mut walkers = vec![Walker::new(3, 1.0); 5000];
        let report = place_walkers(&mut walkers, &grid, 3, 99, 10_000, true).unwrap();
        assert_eq!(report.walkers, 5000);
        assert!(report.distinct_sites > 0);
        for walker in &walkers {
            let p = walker.position();
            assert!(p.x < 12 && p.y < 9 && p.z < 7);
            assert!(!grid.is_solid(p.x, p.y, p.z));
        }
    }

    #[test]
    fn test_placement_is_reproducible() {
        let grid = BitGrid::with_solid_plane(16, 16, 16, 8);
        let mut a = vec![Walker::new(3, 1.0); 3000];
        let mut b = a.clone();
        place_walkers(&mut a, &grid, 3, 5, 1000, true).unwrap();
        place_walkers(&mut b, &grid, 3, 5, 1000, true).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_two_d_uses_bottom_slice() {
        let grid = BitGrid::all_pore(8, 8, 8);
        let mut walkers = vec![Walker::new(2, 1.0); 500];
        place_walkers(&mut walkers, &grid, 2, 1, 10, true).unwrap();
        assert!(walkers.iter().all(|w| w.position().z == 0));
    }

    #[test]
    fn test_all_solid_grid_is_reported() {
        let grid = BitGrid::from_fn(4, 4, 4, |_, _, _| true);
        let mut walkers = vec![Walker::new(3, 1.0); 10];
        let err = place_walkers(&mut walkers, &grid, 3, 1, 200, true).unwrap_err();
        assert!(matches!(
            err,
            SimulationError::PlacementExhausted { attempts: 200, .. }
        ));
    }

    #[test]
    fn test_recharge_resets_state() {
        let grid = BitGrid::all_pore(4, 4, 4);
        let mut walkers = vec![Walker::new(3, 0.5); 4];
        walkers[0].degrade();
        walkers[1].kill();
        place_walkers(&mut walkers, &grid, 3, 1, 10, true).unwrap();
        assert!(walkers
            .iter()
            .all(|w| w.alive() && w.magnetization == 1.0 && w.collisions() == 0));
    }
}
