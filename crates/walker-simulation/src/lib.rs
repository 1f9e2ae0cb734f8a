//! # Walker Simulation Engine
//!
//! Lattice random-walk NMR relaxation: walker placement, CPU/GPU/external
//! walk strategies, variable surface relaxivity and the simulation session
//! that ties them into a decay curve.

pub mod config;
pub mod error;
pub mod observer;
pub mod params;
pub mod placement;
pub mod profile;
pub mod relaxivity;
pub mod seed;
pub mod session;
pub mod strategy;
mod walk;

pub use config::*;
pub use error::*;
pub use observer::*;
pub use params::*;
pub use placement::*;
pub use profile::*;
pub use relaxivity::*;
pub use seed::*;
pub use session::*;
pub use strategy::{
    create_strategy, select_strategy, AbsorbingSimulator, CpuWalkStrategy, ExternalSimulator,
    ExternalWalkStrategy, GpuContext, GpuWalkStrategy, LatticeInputs, StrategyKind, WalkStrategy,
};
