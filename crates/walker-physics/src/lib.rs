//! # Walker Physics
//!
//! Lattice-level physics for diffusion-limited NMR relaxation: the packed
//! walker state, move decoding, the voxel grid and gradient contracts, and
//! surface relaxivity shapes.

pub mod constants;
pub mod direction;
pub mod gradient;
pub mod grid;
pub mod relaxivity;
pub mod walker;

pub use constants::*;
pub use direction::*;
pub use gradient::*;
pub use grid::*;
pub use relaxivity::*;
pub use walker::*;
