//! Collision-frequency histogram snapshots

use rayon::prelude::*;
use walker_physics::{Walker, PROFILE_BINS};

/// Fraction of walkers per collision-frequency bin, ξ ∈ [0, 1]
#[derive(Clone, Debug, PartialEq)]
pub struct CollisionProfile {
    /// Iteration at which the snapshot was taken
    pub iteration: u64,
    /// `PROFILE_BINS` fractions summing to 1 (or all zero for no walkers)
    pub bins: Vec<f64>,
}

impl CollisionProfile {
    /// Histogram collisions / `normalization_base` over all walkers
    pub fn snapshot(walkers: &[Walker], normalization_base: u64, iteration: u64) -> Self {
        let counts = walkers
            .par_iter()
            .fold(
                || vec![0u64; PROFILE_BINS],
                |mut counts, walker| {
                    counts[bin_of(collision_frequency(walker, normalization_base))] += 1;
                    counts
                },
            )
            .reduce(
                || vec![0u64; PROFILE_BINS],
                |mut a, b| {
                    a.iter_mut().zip(&b).for_each(|(a, b)| *a += b);
                    a
                },
            );
        let total = walkers.len().max(1) as f64;
        Self {
            iteration,
            bins: counts.into_iter().map(|c| c as f64 / total).collect(),
        }
    }

    /// Center of bin `index` on the ξ axis
    pub fn bin_center(index: usize) -> f64 {
        (index as f64 + 0.5) / PROFILE_BINS as f64
    }

    /// Mean collision frequency implied by the histogram
    pub fn mean_frequency(&self) -> f64 {
        self.bins
            .iter()
            .enumerate()
            .map(|(i, f)| Self::bin_center(i) * f)
            .sum()
    }
}

/// ξ = collisions / base, clamped to [0, 1]; base 0 gives 0
pub fn collision_frequency(walker: &Walker, normalization_base: u64) -> f64 {
    if normalization_base == 0 {
        return 0.0;
    }
    (walker.collisions() as f64 / normalization_base as f64).clamp(0.0, 1.0)
}

fn bin_of(xi: f64) -> usize {
    ((xi * PROFILE_BINS as f64) as usize).min(PROFILE_BINS - 1)
}
