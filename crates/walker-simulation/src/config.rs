//! Run configuration
//!
//! Lengths in µm, times in ms. Setters on `Session` validate single fields;
//! `validate` checks the whole struct against a grid before a walk starts.

use crate::error::ConfigurationError;
use glam::DVec3;
use walker_physics::{
    UniformGradient, VoxelGrid, MAX_COORD, PROTON_GYROMAGNETIC_RATIO, SURFACE_GEOMETRY_FACTOR,
    WATER_DIFFUSION,
};

/// Post-processing convention for the logged decay curve
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Experiment {
    /// Raw transverse decay
    #[default]
    T2,
    /// Inversion recovery, every value v is reported as 1 - 2v
    T1,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SimulationConfig {
    pub walker_count: usize,
    /// 2 or 3
    pub dimension: u32,
    /// Walk time step (ms)
    pub time_step: f64,
    /// Stop once the normalized magnetization is at or below this
    pub stop_threshold: f64,
    pub max_iterations: u64,
    /// Bulk fluid relaxation time (ms), `f64::INFINITY` disables bulk decay
    pub bulk_time: f64,
    /// Fraction of magnetization lost per wall hit before any relaxivity model runs
    pub surface_delta: f64,
    /// Voxel edge length (µm)
    pub voxel_length: f64,
    /// Fluid self-diffusion coefficient (µm²/ms)
    pub diffusion_coefficient: f64,
    /// Constant internal field gradient (mT/µm)
    pub gradient: DVec3,
    /// Collision profile cadence in iterations, 0 disables
    pub profile_interval: u64,
    /// Relaxivity refresh cadence in iterations, 0 disables
    pub relaxivity_interval: u64,
    pub gpu_enabled: bool,
    /// Reuse the persisted seed instead of drawing a new one
    pub repeat_paths: bool,
    /// Reset magnetization and collisions before each walk
    pub recharge: bool,
    pub experiment: Experiment,
    /// Seeds the session's seed source
    pub master_seed: u64,
    /// Rejected draws allowed per walker before placement gives up
    pub max_placement_attempts: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        let voxel_length = 1.0;
        let diffusion_coefficient = WATER_DIFFUSION;
        Self {
            walker_count: 10_000,
            dimension: 3,
            time_step: lattice_time_step(voxel_length, diffusion_coefficient, 3),
            stop_threshold: 0.01,
            max_iterations: 1_000_000,
            bulk_time: 2800.0,
            surface_delta: 0.0,
            voxel_length,
            diffusion_coefficient,
            gradient: DVec3::ZERO,
            profile_interval: 0,
            relaxivity_interval: 0,
            gpu_enabled: false,
            repeat_paths: false,
            recharge: true,
            experiment: Experiment::T2,
            master_seed: 0x5EED_0F_AB1E,
            max_placement_attempts: 1_000_000,
        }
    }
}

/// Time for one lattice step of an unbiased walk, Δx² / (2·d·D₀)
pub fn lattice_time_step(voxel_length: f64, diffusion_coefficient: f64, dimension: u32) -> f64 {
    voxel_length * voxel_length / (2.0 * dimension as f64 * diffusion_coefficient)
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        check_walker_count(self.walker_count)?;
        check_dimension(self.dimension)?;
        check_time_step(self.time_step)?;
        check_stop_threshold(self.stop_threshold)?;
        check_iteration_cap(self.max_iterations)?;
        check_bulk_time(self.bulk_time)?;
        check_surface_delta(self.surface_delta)?;
        check_physical("voxel length", self.voxel_length)?;
        check_physical("diffusion coefficient", self.diffusion_coefficient)?;
        check_gradient(self.gradient)?;
        if self.max_placement_attempts == 0 {
            return Err(ConfigurationError::PlacementAttempts);
        }
        Ok(())
    }

    /// Validate and check that every voxel coordinate fits the walker packing
    pub fn validate_for(&self, grid: &dyn VoxelGrid) -> Result<(), ConfigurationError> {
        self.validate()?;
        let dims = grid.dimensions();
        if dims.min_element() == 0 || dims.max_element() > MAX_COORD + 1 {
            return Err(ConfigurationError::GridExtent {
                width: dims.x,
                height: dims.y,
                depth: dims.z,
            });
        }
        Ok(())
    }

    /// Per-step bulk decay factor exp(-Δt / T_bulk)
    pub fn bulk_step_factor(&self) -> f64 {
        if self.bulk_time.is_infinite() {
            1.0
        } else {
            (-self.time_step / self.bulk_time).exp()
        }
    }

    /// The internal gradient sampled with the current voxel length and time step
    pub fn uniform_gradient(&self) -> UniformGradient {
        UniformGradient {
            gradient: self.gradient,
            gyromagnetic_ratio: PROTON_GYROMAGNETIC_RATIO,
            voxel_length: self.voxel_length,
            time_step: self.time_step,
        }
    }

    /// Collision multiplier for the configured surface delta
    pub fn surface_factor(&self) -> f32 {
        (1.0 - self.surface_delta).clamp(0.0, 1.0) as f32
    }

    /// Collision multiplier for a physical relaxivity ρ (µm/ms):
    /// δ = (2/3)·ρ·Δx/D₀, clamped to [0, 1], factor = 1 - δ
    pub fn relaxivity_factor(&self, rho: f64) -> f32 {
        let delta = SURFACE_GEOMETRY_FACTOR * rho * self.voxel_length / self.diffusion_coefficient;
        let delta = if delta.is_finite() { delta.clamp(0.0, 1.0) } else { 1.0 };
        (1.0 - delta) as f32
    }
}

pub(crate) fn check_walker_count(count: usize) -> Result<(), ConfigurationError> {
    if count == 0 {
        return Err(ConfigurationError::WalkerCount);
    }
    Ok(())
}

pub(crate) fn check_dimension(dimension: u32) -> Result<(), ConfigurationError> {
    match dimension {
        2 | 3 => Ok(()),
        other => Err(ConfigurationError::Dimension(other)),
    }
}

pub(crate) fn check_time_step(time_step: f64) -> Result<(), ConfigurationError> {
    if !(time_step.is_finite() && time_step > 0.0) {
        return Err(ConfigurationError::TimeStep(time_step));
    }
    Ok(())
}

pub(crate) fn check_stop_threshold(threshold: f64) -> Result<(), ConfigurationError> {
    if !(threshold > 0.0 && threshold < 1.0) {
        return Err(ConfigurationError::StopThreshold(threshold));
    }
    Ok(())
}

pub(crate) fn check_iteration_cap(cap: u64) -> Result<(), ConfigurationError> {
    if cap == 0 {
        return Err(ConfigurationError::IterationCap);
    }
    Ok(())
}

pub(crate) fn check_bulk_time(bulk_time: f64) -> Result<(), ConfigurationError> {
    // NaN fails the comparison too
    if !(bulk_time > 0.0) {
        return Err(ConfigurationError::BulkTime(bulk_time));
    }
    Ok(())
}

pub(crate) fn check_surface_delta(delta: f64) -> Result<(), ConfigurationError> {
    if !(0.0..=1.0).contains(&delta) {
        return Err(ConfigurationError::SurfaceDelta(delta));
    }
    Ok(())
}

pub(crate) fn check_gradient(gradient: DVec3) -> Result<(), ConfigurationError> {
    if !gradient.is_finite() {
        return Err(ConfigurationError::Physical {
            name: "gradient",
            value: gradient.length(),
        });
    }
    Ok(())
}

pub(crate) fn check_physical(name: &'static str, value: f64) -> Result<(), ConfigurationError> {
    if !(value.is_finite() && value > 0.0) {
        return Err(ConfigurationError::Physical { name, value });
    }
    Ok(())
}
