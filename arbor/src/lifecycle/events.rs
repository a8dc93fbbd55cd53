//! Lifecycle events and listeners.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// The kind of a lifecycle event.
///
/// Start fires `BeforeStart`, then the component does its kind-specific
/// work, then `Start` and `AfterStart`; stop is symmetric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventKind {
    /// A start was validated and is about to begin.
    BeforeStart,
    /// The component reached the started state.
    Start,
    /// The start transition completed.
    AfterStart,
    /// A stop was validated and is about to begin.
    BeforeStop,
    /// The component reached the stopped state.
    Stop,
    /// The stop transition completed.
    AfterStop,
}

impl fmt::Display for LifecycleEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BeforeStart => write!(f, "before_start"),
            Self::Start => write!(f, "start"),
            Self::AfterStart => write!(f, "after_start"),
            Self::BeforeStop => write!(f, "before_stop"),
            Self::Stop => write!(f, "stop"),
            Self::AfterStop => write!(f, "after_stop"),
        }
    }
}

/// An event fired by a lifecycle transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// The event kind.
    pub kind: LifecycleEventKind,
    /// The name of the component that fired the event.
    pub source: String,
    /// When the event was fired.
    pub timestamp: DateTime<Utc>,
}

impl LifecycleEvent {
    /// Creates a new event stamped with the current time.
    #[must_use]
    pub fn new(kind: LifecycleEventKind, source: impl Into<String>) -> Self {
        Self {
            kind,
            source: source.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Observer of lifecycle transitions.
///
/// Firing is synchronous on the transitioning task: a slow listener delays
/// the transition. A panicking listener is caught and logged, never
/// propagated.
pub trait LifecycleListener: Send + Sync {
    /// Receives a lifecycle event.
    fn lifecycle_event(&self, event: &LifecycleEvent);
}

/// A copy-on-write listener collection.
///
/// Firing iterates over a snapshot, so a listener callback may add or
/// remove listeners on the same component without corrupting iteration.
/// Listeners added during a firing receive only subsequent events.
pub(crate) struct ListenerSet<L: ?Sized> {
    listeners: RwLock<Vec<Arc<L>>>,
}

impl<L: ?Sized> Default for ListenerSet<L> {
    fn default() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }
}

impl<L: ?Sized> ListenerSet<L> {
    /// Registers a listener.
    pub(crate) fn add(&self, listener: Arc<L>) {
        self.listeners.write().push(listener);
    }

    /// Removes a listener by identity. Unknown listeners are ignored.
    pub(crate) fn remove(&self, listener: &Arc<L>) {
        self.listeners
            .write()
            .retain(|existing| !Arc::ptr_eq(existing, listener));
    }

    /// Returns a snapshot of the current listeners.
    pub(crate) fn snapshot(&self) -> Vec<Arc<L>> {
        self.listeners.read().clone()
    }
}

impl<L: ?Sized> fmt::Debug for ListenerSet<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSet")
            .field("len", &self.listeners.read().len())
            .finish()
    }
}

/// Invokes a listener callback, containing panics.
pub(crate) fn fire_contained(source: &str, callback: impl FnOnce()) {
    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(callback)).is_err() {
        warn!(source = %source, "listener panicked during event dispatch");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder {
        kinds: Mutex<Vec<LifecycleEventKind>>,
    }

    impl LifecycleListener for Recorder {
        fn lifecycle_event(&self, event: &LifecycleEvent) {
            self.kinds.lock().push(event.kind);
        }
    }

    #[test]
    fn test_listener_set_add_remove() {
        let set: ListenerSet<dyn LifecycleListener> = ListenerSet::default();
        let listener: Arc<dyn LifecycleListener> = Arc::new(Recorder {
            kinds: Mutex::new(Vec::new()),
        });

        set.add(listener.clone());
        assert_eq!(set.snapshot().len(), 1);

        set.remove(&listener);
        assert!(set.snapshot().is_empty());
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let set: ListenerSet<dyn LifecycleListener> = ListenerSet::default();
        let listener: Arc<dyn LifecycleListener> = Arc::new(Recorder {
            kinds: Mutex::new(Vec::new()),
        });
        set.remove(&listener);
        assert!(set.snapshot().is_empty());
    }

    #[test]
    fn test_fire_contained_swallows_panic() {
        fire_contained("test", || panic!("listener bug"));
    }

    #[test]
    fn test_event_serialization() {
        let event = LifecycleEvent::new(LifecycleEventKind::BeforeStart, "main");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "before_start");
        assert_eq!(json["source"], "main");
    }
}
