//! Lifecycle state enum.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The state of a lifecycle-managed component.
///
/// The machine is `New` → `Started` → `Stopped`, with transitional
/// `Starting`/`Stopping` markers guarding re-entrant calls. `Stopped` is
/// restartable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Created, never started.
    New,
    /// A start is in progress.
    Starting,
    /// Running.
    Started,
    /// A stop is in progress.
    Stopping,
    /// Stopped; may be started again.
    Stopped,
}

impl LifecycleState {
    /// Returns true if `start` is legal from this state.
    #[must_use]
    pub fn can_start(self) -> bool {
        matches!(self, Self::New | Self::Stopped)
    }

    /// Returns true if `stop` is legal from this state.
    #[must_use]
    pub fn can_stop(self) -> bool {
        matches!(self, Self::Started)
    }
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self::New
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Starting => write!(f, "starting"),
            Self::Started => write!(f, "started"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}
