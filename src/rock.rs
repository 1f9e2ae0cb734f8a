//! Synthetic porous media for command-line runs

use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use walker_physics::{BitGrid, VoxelGrid};

/// Grains placed before giving up on the target porosity
const MAX_GRAINS: usize = 100_000;

/// Random overlapping spherical grains in a cube of edge `size`, added until
/// the pore fraction drops to `porosity`.
pub fn sphere_pack(size: u32, grain_radius: f32, porosity: f64, seed: u64) -> BitGrid {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut grid = BitGrid::all_pore(size, size, size);
    let total = size as f64 * size as f64 * size as f64;
    let mut solid = 0u64;
    let reach = grain_radius.ceil() as i64;

    for _ in 0..MAX_GRAINS {
        if 1.0 - solid as f64 / total <= porosity {
            break;
        }
        let center = Vec3::new(
            rng.random::<f32>() * size as f32,
            rng.random::<f32>() * size as f32,
            rng.random::<f32>() * size as f32,
        );
        let base = center.floor().as_i64vec3();
        for dz in -reach..=reach {
            for dy in -reach..=reach {
                for dx in -reach..=reach {
                    let (x, y, z) = (base.x + dx, base.y + dy, base.z + dz);
                    if [x, y, z].iter().any(|&c| c < 0 || c >= size as i64) {
                        continue;
                    }
                    let voxel = Vec3::new(x as f32 + 0.5, y as f32 + 0.5, z as f32 + 0.5);
                    if voxel.distance_squared(center) > grain_radius * grain_radius {
                        continue;
                    }
                    let (x, y, z) = (x as u32, y as u32, z as u32);
                    if !grid.is_solid(x, y, z) {
                        grid.set_solid(x, y, z, true);
                        solid += 1;
                    }
                }
            }
        }
    }
    grid
}
