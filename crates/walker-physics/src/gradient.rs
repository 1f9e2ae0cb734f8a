//! Internal field gradient models
//!
//! A gradient dephases the magnetization of a walker that actually moves.
//! The walk only needs the scalar attenuation for each of the six unit
//! displacements, so implementations are sampled once per run.

use glam::{DVec3, IVec3};

use crate::direction::decode_direction;

/// Dephasing multiplier for a unit lattice displacement
pub trait FieldGradient: Send + Sync {
    fn exponential_factor(&self, dx: i32, dy: i32, dz: i32) -> f64;
}

/// No internal gradient: moves never attenuate
#[derive(Clone, Copy, Debug, Default)]
pub struct NoGradient;

impl FieldGradient for NoGradient {
    fn exponential_factor(&self, _dx: i32, _dy: i32, _dz: i32) -> f64 {
        1.0
    }
}

/// Constant gradient field.
///
/// A step `d` accumulates the phase `γ·(g·d)·Δx·Δt`; the ensemble attenuation
/// of a Gaussian phase spread with that width is `exp(-φ²/2)`.
#[derive(Clone, Copy, Debug)]
pub struct UniformGradient {
    /// Gradient vector (mT/µm)
    pub gradient: DVec3,
    /// Gyromagnetic ratio (rad / (ms · mT))
    pub gyromagnetic_ratio: f64,
    /// Voxel edge length (µm)
    pub voxel_length: f64,
    /// Walk time step (ms)
    pub time_step: f64,
}

impl FieldGradient for UniformGradient {
    fn exponential_factor(&self, dx: i32, dy: i32, dz: i32) -> f64 {
        let step = IVec3::new(dx, dy, dz).as_dvec3();
        let phase =
            self.gyromagnetic_ratio * self.gradient.dot(step) * self.voxel_length * self.time_step;
        (-0.5 * phase * phase).exp()
    }
}

/// Sample a gradient for the six move draws (`+x, -x, +y, -y, +z, -z`)
pub fn dephasing_table(gradient: &dyn FieldGradient) -> [f32; 6] {
    let mut table = [1.0f32; 6];
    for (draw, factor) in table.iter_mut().enumerate() {
        let step = decode_direction(draw as u32);
        *factor = gradient
            .exponential_factor(step.x, step.y, step.z)
            .clamp(0.0, 1.0) as f32;
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_gradient_table_is_identity() {
        assert_eq!(dephasing_table(&NoGradient), [1.0; 6]);
    }

    #[test]
    fn test_uniform_gradient_only_affects_its_axis() {
        let gradient = UniformGradient {
            gradient: DVec3::new(0.0, 0.0, 1.0e-3),
            gyromagnetic_ratio: 267.515,
            voxel_length: 1.0,
            time_step: 0.1,
        };
        let table = dephasing_table(&gradient);
        assert_eq!(&table[..4], &[1.0; 4]);
        assert!(table[4] < 1.0);
        assert_eq!(table[4], table[5]);
    }
}
