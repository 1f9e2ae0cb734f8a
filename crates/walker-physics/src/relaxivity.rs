//! Surface relaxivity as a function of normalized collision frequency
//!
//! Walkers that hit walls often sit in small pores; a relaxivity model lets
//! the surface chemistry seen by a walker depend on that frequency ξ ∈ [0, 1].
//! Models are evaluated inside parallel loops, so `evaluate` must be pure.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RelaxivityError {
    #[error("hat interval {index} has min {min} > max {max}")]
    InvertedInterval { index: usize, min: f64, max: f64 },
    /// Indices are positions in the list passed to `HatRelaxivity::new`
    #[error("hat intervals {first} and {second} overlap")]
    Overlap { first: usize, second: usize },
    #[error("relaxivity parameter {name} is not finite")]
    NotFinite { name: &'static str },
}

/// Maps collision frequency ξ to surface relaxivity ρ (µm/ms)
pub trait RelaxivityModel: Send + Sync {
    fn evaluate(&self, xi: f64) -> f64;
}

/// One `[min, max]` window of a hat model
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HatInterval {
    pub min: f64,
    pub max: f64,
    pub k: f64,
}

/// Piecewise-constant relaxivity: sum of `k` over every interval containing ξ,
/// or `ground` when none does.
#[derive(Clone, Debug, PartialEq)]
pub struct HatRelaxivity {
    intervals: Vec<HatInterval>,
    ground: f64,
}

impl HatRelaxivity {
    pub fn new(intervals: Vec<HatInterval>, ground: f64) -> Result<Self, RelaxivityError> {
        if !ground.is_finite() {
            return Err(RelaxivityError::NotFinite { name: "ground" });
        }
        for (index, interval) in intervals.iter().enumerate() {
            if !(interval.min.is_finite() && interval.max.is_finite() && interval.k.is_finite()) {
                return Err(RelaxivityError::NotFinite { name: "interval" });
            }
            if interval.min > interval.max {
                return Err(RelaxivityError::InvertedInterval {
                    index,
                    min: interval.min,
                    max: interval.max,
                });
            }
        }
        let mut order: Vec<usize> = (0..intervals.len()).collect();
        order.sort_by(|&a, &b| intervals[a].min.total_cmp(&intervals[b].min));
        for pair in order.windows(2) {
            let (lower, upper) = (pair[0], pair[1]);
            if intervals[upper].min <= intervals[lower].max {
                return Err(RelaxivityError::Overlap {
                    first: lower.min(upper),
                    second: lower.max(upper),
                });
            }
        }
        let intervals = order.into_iter().map(|index| intervals[index]).collect();
        Ok(Self { intervals, ground })
    }

    /// Single window `[min, max]` with weight `k`
    pub fn single(min: f64, max: f64, k: f64, ground: f64) -> Result<Self, RelaxivityError> {
        Self::new(vec![HatInterval { min, max, k }], ground)
    }

    pub fn intervals(&self) -> &[HatInterval] {
        &self.intervals
    }
}

impl RelaxivityModel for HatRelaxivity {
    fn evaluate(&self, xi: f64) -> f64 {
        let mut matched = false;
        let mut rho = 0.0;
        for interval in &self.intervals {
            if xi >= interval.min && xi <= interval.max {
                matched = true;
                rho += interval.k;
            }
        }
        if matched {
            rho
        } else {
            self.ground
        }
    }
}

/// One logistic term `k / (1 + exp(-a·(ξ - ξ₀)))`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SigmoidTerm {
    pub k: f64,
    pub a: f64,
    pub xi0: f64,
}

/// Smooth relaxivity: `base + Σ kᵢ / (1 + exp(-aᵢ·(ξ - ξ₀ᵢ)))`
#[derive(Clone, Debug, PartialEq)]
pub struct SigmoidRelaxivity {
    terms: Vec<SigmoidTerm>,
    base: f64,
}

impl SigmoidRelaxivity {
    pub fn new(terms: Vec<SigmoidTerm>, base: f64) -> Result<Self, RelaxivityError> {
        if !base.is_finite() {
            return Err(RelaxivityError::NotFinite { name: "base" });
        }
        if terms
            .iter()
            .any(|t| !(t.k.is_finite() && t.a.is_finite() && t.xi0.is_finite()))
        {
            return Err(RelaxivityError::NotFinite { name: "term" });
        }
        Ok(Self { terms, base })
    }
}

impl RelaxivityModel for SigmoidRelaxivity {
    fn evaluate(&self, xi: f64) -> f64 {
        self.base
            + self
                .terms
                .iter()
                .map(|t| t.k / (1.0 + (-t.a * (xi - t.xi0)).exp()))
                .sum::<f64>()
    }
}
