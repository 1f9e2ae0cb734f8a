//! Physical and layout constants for the lattice random walk
//!
//! Units follow the usual NMR petrophysics conventions: lengths in µm, times
//! in ms, diffusion coefficients in µm²/ms and relaxivity in µm/ms.

/// Number of sub-steps simulated per batch.
/// Random draws, GPU dispatches and decay-log appends are amortized over this.
pub const BATCH_STEPS: usize = 512;

/// Bits per packed lattice coordinate (three coordinates share 63 bits)
pub const COORD_BITS: u32 = 21;

/// Largest representable lattice coordinate
pub const MAX_COORD: u32 = (1 << COORD_BITS) - 1;

/// Bit layout of `Walker::state`
///
/// | bit 31 | bit 30 | bit 29    | bits 0..29      |
/// |--------|--------|-----------|-----------------|
/// | alive  | 3D     | saturated | collision count |
pub const ALIVE_BIT: u32 = 1 << 31;
pub const THREE_D_BIT: u32 = 1 << 30;
pub const SATURATED_BIT: u32 = 1 << 29;
pub const COLLISION_MASK: u32 = SATURATED_BIT - 1;

/// Maximum collision count a walker can record (29 bits, ~536M)
pub const MAX_COLLISIONS: u32 = COLLISION_MASK;

/// Multiplier/increment of the per-walker LCG that expands one batch seed
/// into `BATCH_STEPS` move draws (Numerical Recipes constants).
/// Shared verbatim with `walk.wgsl`.
pub const LCG_MULTIPLIER: u32 = 1_664_525;
pub const LCG_INCREMENT: u32 = 1_013_904_223;

/// Free water self-diffusion coefficient at 25 °C (µm²/ms)
pub const WATER_DIFFUSION: f64 = 2.5;

/// Proton gyromagnetic ratio (rad / (ms · mT))
pub const PROTON_GYROMAGNETIC_RATIO: f64 = 267.515;

/// Lattice geometry factor relating the per-hit absorption probability to
/// surface relaxivity, δ = (2/3)·ρ·Δx/D₀
pub const SURFACE_GEOMETRY_FACTOR: f64 = 2.0 / 3.0;

/// Number of ξ bins in the collision profile
pub const PROFILE_BINS: usize = 256;
