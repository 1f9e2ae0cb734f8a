//! Progress reporting: observer callbacks and the pollable run monitor

use glam::UVec3;
use std::sync::{Arc, Mutex, PoisonError};
use walker_physics::Walker;

use crate::session::DecayStep;

/// Why a walk stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// Magnetization reached the stop threshold
    Threshold,
    /// Iteration cap reached first
    IterationCap,
    /// Cancelled between batches
    Cancelled,
}

/// Final status handed to `WalkObserver::walk_end`
#[derive(Clone, Debug, PartialEq)]
pub enum WalkStatus {
    Finished(StopReason),
    Failed(String),
}

/// Callbacks from the walk worker. Called on the worker thread.
pub trait WalkObserver: Send + Sync {
    /// Called after every batch
    fn observe_walk(&self, progress: f64, magnetization: f64, time: f64);

    /// Called once per walk, including failed walks
    fn walk_end(&self, elapsed_seconds: f64, status: &WalkStatus);

    /// Whether walker positions should be copied back for display every batch
    fn show_walkers(&self) -> bool {
        false
    }

    /// Receives host copies of the walkers when `show_walkers` is set
    fn walkers(&self, _walkers: &[Walker]) {}
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MonitorState {
    pub running: bool,
    pub iteration: u64,
    pub latest: Option<DecayStep>,
    /// Fraction of the way from 1 to the stop threshold, or of the iteration cap
    pub progress: f64,
    /// Filled only when the observer wants to show walkers
    pub positions: Vec<UVec3>,
}

/// Mutex-guarded view of a running walk, safe to poll from other threads
#[derive(Clone, Debug, Default)]
pub struct SessionMonitor {
    state: Arc<Mutex<MonitorState>>,
}

impl SessionMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MonitorState {
        self.lock().clone()
    }

    pub(crate) fn update(&self, f: impl FnOnce(&mut MonitorState)) {
        f(&mut self.lock());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_is_shared_between_clones() {
        let monitor = SessionMonitor::new();
        let other = monitor.clone();
        monitor.update(|state| {
            state.running = true;
            state.iteration = 512;
        });
        let snapshot = other.snapshot();
        assert!(snapshot.running);
        assert_eq!(snapshot.iteration, 512);
    }
}
