//! Typed per-container settings.
//!
//! Descriptor parsing and bootstrap wiring live outside the engine; these
//! structs are the knobs that outer layer sets.

use serde::{Deserialize, Serialize};

/// Tunable settings carried by every container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSettings {
    /// Seconds between background maintenance runs. `<= 0` means the
    /// container owns no maintenance task and is serviced by the nearest
    /// ancestor that does.
    pub background_delay_secs: i64,
    /// Upper bound on concurrent child start/stop tasks. The effective
    /// bound is capped by the machine's available parallelism, floor 1.
    pub startup_threads: usize,
    /// Whether `add_child` on a started container starts the child
    /// immediately.
    pub start_children_on_add: bool,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            background_delay_secs: 0,
            startup_threads: 1,
            start_children_on_add: true,
        }
    }
}

impl ContainerSettings {
    /// Creates default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the background maintenance cadence.
    #[must_use]
    pub fn with_background_delay_secs(mut self, secs: i64) -> Self {
        self.background_delay_secs = secs;
        self
    }

    /// Sets the configured start/stop fan-out bound.
    #[must_use]
    pub fn with_startup_threads(mut self, threads: usize) -> Self {
        self.startup_threads = threads;
        self
    }

    /// Sets the auto-start-on-add policy.
    #[must_use]
    pub fn with_start_children_on_add(mut self, enabled: bool) -> Self {
        self.start_children_on_add = enabled;
        self
    }

    /// The effective fan-out bound: `min(configured, available parallelism)`
    /// with a floor of 1.
    #[must_use]
    pub fn effective_startup_threads(&self) -> usize {
        let cores = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        self.startup_threads.min(cores).max(1)
    }
}
