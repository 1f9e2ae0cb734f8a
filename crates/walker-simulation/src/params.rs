//! Uniform parameters for the walk compute shader

use bytemuck::{Pod, Zeroable};
use glam::UVec3;
use walker_physics::direction_count;

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct WalkParams {
    // Group 1: Grid
    // x: width, y: height, z: depth, w: dimension
    pub grid: [u32; 4],

    // Group 2: Batch
    // x: walkers in this block, y: sub-steps this batch, z: direction count, w: padding
    pub walk: [u32; 4],

    // Group 3: Dephasing for draws 0..4 (+x, -x, +y, -y)
    pub dephasing_xy: [f32; 4],

    // Group 4: Dephasing for draws 4..6 (+z, -z), z/w: padding
    pub dephasing_z: [f32; 4],
}

impl WalkParams {
    pub fn new(dimensions: UVec3, dimension: u32, dephasing: &[f32; 6]) -> Self {
        Self {
            grid: [dimensions.x, dimensions.y, dimensions.z, dimension],
            walk: [0, 0, direction_count(dimension), 0],
            dephasing_xy: [dephasing[0], dephasing[1], dephasing[2], dephasing[3]],
            dephasing_z: [dephasing[4], dephasing[5], 0.0, 0.0],
        }
    }

    /// Same params for another block/batch shape
    pub fn with_batch(mut self, walkers: u32, steps: u32) -> Self {
        self.walk[0] = walkers;
        self.walk[1] = steps;
        self
    }
}
