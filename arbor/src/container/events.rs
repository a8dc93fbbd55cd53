//! Structural container events and listeners.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of a structural container event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerEventKind {
    /// A child was attached.
    ChildAdded,
    /// A child was detached.
    ChildRemoved,
    /// The container's background maintenance hook ran.
    Periodic,
}

impl fmt::Display for ContainerEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChildAdded => write!(f, "child_added"),
            Self::ChildRemoved => write!(f, "child_removed"),
            Self::Periodic => write!(f, "periodic"),
        }
    }
}

/// An event fired by a structural change or a maintenance run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerEvent {
    /// The event kind.
    pub kind: ContainerEventKind,
    /// The name of the container that fired the event.
    pub container: String,
    /// The affected child's name, for child events.
    pub child: Option<String>,
    /// When the event was fired.
    pub timestamp: DateTime<Utc>,
}

impl ContainerEvent {
    /// Creates a new event stamped with the current time.
    #[must_use]
    pub fn new(
        kind: ContainerEventKind,
        container: impl Into<String>,
        child: Option<String>,
    ) -> Self {
        Self {
            kind,
            container: container.into(),
            child,
            timestamp: Utc::now(),
        }
    }
}

/// Observer of structural container events.
///
/// Firing is synchronous on the mutating task; callbacks may register or
/// remove listeners on the same container re-entrantly.
pub trait ContainerListener: Send + Sync {
    /// Receives a container event.
    fn container_event(&self, event: &ContainerEvent);
}
