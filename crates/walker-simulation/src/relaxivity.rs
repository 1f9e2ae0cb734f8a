//! Variable surface relaxivity driven by collision frequency

use crate::config::SimulationConfig;
use crate::profile::collision_frequency;
use rayon::prelude::*;
use std::sync::Arc;
use walker_physics::{RelaxivityModel, Walker};

/// How collision counts are normalized between relaxivity refreshes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProfileMode {
    /// Counts accumulate over the whole run, ξ = collisions / iterations so far
    #[default]
    Global,
    /// Counts restart after every refresh, ξ = collisions / window length
    Cyclic,
}

/// A relaxivity model plus the windowing policy used to feed it
#[derive(Clone)]
pub struct RelaxivityDistribution {
    model: Arc<dyn RelaxivityModel>,
    mode: ProfileMode,
}

impl std::fmt::Debug for RelaxivityDistribution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelaxivityDistribution")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl RelaxivityDistribution {
    pub fn new(model: Arc<dyn RelaxivityModel>, mode: ProfileMode) -> Self {
        Self { model, mode }
    }

    pub fn mode(&self) -> ProfileMode {
        self.mode
    }

    pub fn evaluate(&self, xi: f64) -> f64 {
        self.model.evaluate(xi)
    }

    /// Refresh every walker's collision multiplier from its collision
    /// frequency. In cyclic mode the collision window is restarted.
    pub fn update_walker_rho(
        &self,
        walkers: &mut [Walker],
        normalization_base: u64,
        config: &SimulationConfig,
    ) {
        let reset = self.mode == ProfileMode::Cyclic;
        walkers.par_iter_mut().for_each(|walker| {
            let xi = collision_frequency(walker, normalization_base);
            walker.rho = config.relaxivity_factor(self.model.evaluate(xi));
            if reset {
                walker.reset_collisions();
            }
        });
    }
}
