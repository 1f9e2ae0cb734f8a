//! Typed errors for configuration, placement, GPU and walk failures.

use thiserror::Error;
use walker_physics::RelaxivityError;

/// Rejected configuration value
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("walker count must be positive")]
    WalkerCount,
    #[error("dimension must be 2 or 3, got {0}")]
    Dimension(u32),
    #[error("time step must be positive and finite, got {0}")]
    TimeStep(f64),
    #[error("stop threshold must lie in (0, 1), got {0}")]
    StopThreshold(f64),
    #[error("iteration cap must be positive")]
    IterationCap,
    #[error("bulk relaxation time must be positive, got {0}")]
    BulkTime(f64),
    #[error("surface relaxivity delta must lie in [0, 1], got {0}")]
    SurfaceDelta(f64),
    #[error("{name} must be positive and finite, got {value}")]
    Physical { name: &'static str, value: f64 },
    #[error("grid {width}x{height}x{depth} is empty or exceeds the packed coordinate range")]
    GridExtent { width: u32, height: u32, depth: u32 },
    #[error("placement attempt bound must be positive")]
    PlacementAttempts,
    #[error(transparent)]
    Relaxivity(#[from] RelaxivityError),
}

/// GPU adapter, device and transfer failures
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DeviceError {
    #[error("no GPU adapter found: {0}")]
    NoAdapter(String),
    #[error("failed to create GPU device: {0}")]
    DeviceCreation(String),
    #[error("{what} needs {requested} bytes but the device allows {limit}")]
    BufferTooLarge {
        what: &'static str,
        requested: u64,
        limit: u64,
    },
    #[error("GPU validation failed: {0}")]
    Validation(String),
    #[error("GPU readback failed: {0}")]
    Readback(String),
}

/// Anything that can stop a walk
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimulationError {
    #[error("invalid configuration: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("placement gave up on walker {walker} after {attempts} rejected draws (no pore voxels?)")]
    PlacementExhausted { walker: usize, attempts: u64 },
    #[error("GPU error: {0}")]
    Device(#[from] DeviceError),
    #[error("external simulator failed: {0}")]
    External(String),
    #[error("failed to start walk worker: {0}")]
    Spawn(String),
    #[error("walk worker panicked")]
    WorkerPanicked,
}
