//! Packed walker state shared by the CPU and GPU walk paths

use crate::constants::*;
use bytemuck::{Pod, Zeroable};
use glam::UVec3;

/// GPU-compatible walker structure
/// Layout matches the `Walker` struct in `walk.wgsl` (20 bytes, 4-byte aligned)
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Walker {
    /// Lattice position, x | y << 21 | z << 42 split into low/high words
    pub position: [u32; 2],
    /// Normalized magnetization in [0, 1]
    pub magnetization: f32,
    /// Flags and collision count, see `ALIVE_BIT` and friends
    pub state: u32,
    /// Multiplier applied to the magnetization on every wall collision
    pub rho: f32,
}

impl Default for Walker {
    fn default() -> Self {
        Self::new(3, 1.0)
    }
}

impl Walker {
    /// Create a live walker at the origin with full magnetization
    pub fn new(dimension: u32, rho: f32) -> Self {
        let mut walker = Self::zeroed();
        walker.set(dimension, rho, 0);
        walker
    }

    /// Reinitialize flags, relaxivity factor and collision count.
    /// Position is left untouched; magnetization is recharged to 1.
    pub fn set(&mut self, dimension: u32, rho: f32, collisions: u32) {
        let mut state = ALIVE_BIT | collisions.min(MAX_COLLISIONS);
        if dimension == 3 {
            state |= THREE_D_BIT;
        }
        self.state = state;
        self.magnetization = 1.0;
        self.rho = rho.clamp(0.0, 1.0);
    }

    pub fn position(&self) -> UVec3 {
        unpack_position(self.position[0] as u64 | (self.position[1] as u64) << 32)
    }

    /// Store a lattice position. Coordinates are masked to `COORD_BITS`;
    /// callers validate grid extents against `MAX_COORD` up front.
    pub fn set_position(&mut self, position: UVec3) {
        let packed = pack_position(position);
        self.position = [packed as u32, (packed >> 32) as u32];
    }

    pub fn dimension(&self) -> u32 {
        if self.state & THREE_D_BIT != 0 {
            3
        } else {
            2
        }
    }

    pub fn collisions(&self) -> u32 {
        self.state & COLLISION_MASK
    }

    /// True once a collision was dropped because the counter was full
    pub fn collisions_saturated(&self) -> bool {
        self.state & SATURATED_BIT != 0
    }

    pub fn alive(&self) -> bool {
        self.state & ALIVE_BIT != 0
    }

    /// Record one wall collision: attenuate by `rho` and bump the counter.
    pub fn degrade(&mut self) {
        self.magnetization *= self.rho;
        self.add_collision();
        if self.magnetization <= 0.0 {
            self.kill();
        }
    }

    /// Zero the magnetization and clear the alive flag.
    /// Collision count and dimension bits are preserved.
    pub fn kill(&mut self) {
        self.magnetization = 0.0;
        self.state &= !ALIVE_BIT;
    }

    /// Restore full magnetization and clear the collision window
    pub fn recharge(&mut self) {
        self.magnetization = 1.0;
        self.state = (self.state & THREE_D_BIT) | ALIVE_BIT;
    }

    /// Start a new collision observation window, keeping magnetization
    pub fn reset_collisions(&mut self) {
        self.state &= !(COLLISION_MASK | SATURATED_BIT);
    }

    fn add_collision(&mut self) {
        if self.collisions() < MAX_COLLISIONS {
            self.state += 1;
        } else {
            self.state |= SATURATED_BIT;
        }
    }
}

/// Pack a lattice position as `x | y << 21 | z << 42`
#[inline]
pub fn pack_position(position: UVec3) -> u64 {
    let mask = MAX_COORD as u64;
    (position.x as u64 & mask)
        | (position.y as u64 & mask) << COORD_BITS
        | (position.z as u64 & mask) << (2 * COORD_BITS)
}

#[inline]
pub fn unpack_position(packed: u64) -> UVec3 {
    let mask = MAX_COORD as u64;
    UVec3::new(
        (packed & mask) as u32,
        ((packed >> COORD_BITS) & mask) as u32,
        ((packed >> (2 * COORD_BITS)) & mask) as u32,
    )
}
