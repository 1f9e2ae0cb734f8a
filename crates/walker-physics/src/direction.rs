//! Move draws and their decoding into unit lattice steps
//!
//! A draw `d` in `[0, 2 * dimension)` encodes `axis = d >> 1` and
//! `negative = d & 1`, so decoding is two bit operations instead of a 6-way
//! match. Draw `d` also indexes the per-direction dephasing table:
//! `+x, -x, +y, -y, +z, -z`.

use crate::constants::{LCG_INCREMENT, LCG_MULTIPLIER};
use glam::IVec3;

/// Number of distinct moves for a lattice of the given dimension
#[inline]
pub fn direction_count(dimension: u32) -> u32 {
    if dimension == 2 {
        4
    } else {
        6
    }
}

/// Decode a draw into a unit displacement along exactly one axis
#[inline]
pub fn decode_direction(draw: u32) -> IVec3 {
    let axis = (draw >> 1) as usize;
    let sign = 1 - 2 * (draw & 1) as i32;
    let mut step = IVec3::ZERO;
    step[axis] = sign;
    step
}

/// Per-walker 32-bit linear congruential generator.
///
/// The host hands every walker one seed per batch; both the CPU and the GPU
/// path expand it with this generator so the two produce identical paths.
#[derive(Clone, Copy, Debug)]
pub struct StepLcg {
    state: u32,
}

impl StepLcg {
    pub fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    /// Next draw in `[0, directions)` from the high 16 bits (multiply-shift)
    #[inline]
    pub fn next_draw(&mut self, directions: u32) -> u32 {
        self.state = self
            .state
            .wrapping_mul(LCG_MULTIPLIER)
            .wrapping_add(LCG_INCREMENT);
        ((self.state >> 16) * directions) >> 16
    }
}

/// Fill `draws` with the move sequence a walker gets from `seed`
pub fn expand_draws(seed: u32, directions: u32, draws: &mut [u8]) {
    let mut lcg = StepLcg::new(seed);
    for draw in draws.iter_mut() {
        *draw = lcg.next_draw(directions) as u8;
    }
}
