//! Shared lifecycle state-machine support.

use super::events::{fire_contained, LifecycleEvent, LifecycleEventKind, LifecycleListener, ListenerSet};
use super::state::LifecycleState;
use crate::errors::LifecycleError;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// The guarded state machine embedded by components and pipelines.
///
/// `begin_start`/`begin_stop` validate the transition and move into the
/// transitional state atomically; a failed validation performs no side
/// effects. Event firing is synchronous on the caller's task.
pub struct LifecycleSupport {
    name: String,
    state: Mutex<LifecycleState>,
    listeners: ListenerSet<dyn LifecycleListener>,
}

impl LifecycleSupport {
    /// Creates support for the named component, in state `New`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(LifecycleState::New),
            listeners: ListenerSet::default(),
        }
    }

    /// The name used in errors and event sources.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    /// Validates and enters `Starting`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` when the current state is not
    /// `New`/`Stopped`; the state is left untouched.
    pub fn begin_start(&self) -> Result<(), LifecycleError> {
        let mut state = self.state.lock();
        if !state.can_start() {
            return Err(LifecycleError::InvalidTransition {
                name: self.name.clone(),
                operation: "start",
                state: *state,
            });
        }
        *state = LifecycleState::Starting;
        Ok(())
    }

    /// Enters `Started`.
    pub fn complete_start(&self) {
        *self.state.lock() = LifecycleState::Started;
    }

    /// Reverts a failed start to `Stopped`.
    pub fn fail_start(&self) {
        *self.state.lock() = LifecycleState::Stopped;
    }

    /// Validates and enters `Stopping`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` when the current state is not `Started`;
    /// the state is left untouched.
    pub fn begin_stop(&self) -> Result<(), LifecycleError> {
        let mut state = self.state.lock();
        if !state.can_stop() {
            return Err(LifecycleError::InvalidTransition {
                name: self.name.clone(),
                operation: "stop",
                state: *state,
            });
        }
        *state = LifecycleState::Stopping;
        Ok(())
    }

    /// Enters `Stopped`.
    pub fn complete_stop(&self) {
        *self.state.lock() = LifecycleState::Stopped;
    }

    /// Registers a listener. It receives only events fired afterwards.
    pub fn add_listener(&self, listener: Arc<dyn LifecycleListener>) {
        self.listeners.add(listener);
    }

    /// Removes a listener by identity.
    pub fn remove_listener(&self, listener: &Arc<dyn LifecycleListener>) {
        self.listeners.remove(listener);
    }

    /// Returns the registered listeners.
    #[must_use]
    pub fn listeners(&self) -> Vec<Arc<dyn LifecycleListener>> {
        self.listeners.snapshot()
    }

    /// Fires an event synchronously to a snapshot of the listeners.
    ///
    /// Panicking listeners are logged and skipped; they never interrupt the
    /// transition.
    pub fn fire(&self, kind: LifecycleEventKind) {
        let event = LifecycleEvent::new(kind, self.name.clone());
        for listener in self.listeners.snapshot() {
            fire_contained(&self.name, || listener.lifecycle_event(&event));
        }
    }
}

impl fmt::Debug for LifecycleSupport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleSupport")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    struct Recorder {
        kinds: PlMutex<Vec<LifecycleEventKind>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                kinds: PlMutex::new(Vec::new()),
            })
        }

        fn kinds(&self) -> Vec<LifecycleEventKind> {
            self.kinds.lock().clone()
        }
    }

    impl LifecycleListener for Recorder {
        fn lifecycle_event(&self, event: &LifecycleEvent) {
            self.kinds.lock().push(event.kind);
        }
    }

    #[test]
    fn test_full_cycle() {
        let support = LifecycleSupport::new("main");
        assert_eq!(support.state(), LifecycleState::New);

        support.begin_start().unwrap();
        assert_eq!(support.state(), LifecycleState::Starting);
        support.complete_start();
        assert_eq!(support.state(), LifecycleState::Started);

        support.begin_stop().unwrap();
        support.complete_stop();
        assert_eq!(support.state(), LifecycleState::Stopped);

        // Stopped is restartable.
        support.begin_start().unwrap();
        assert_eq!(support.state(), LifecycleState::Starting);
    }

    #[test]
    fn test_double_start_rejected() {
        let support = LifecycleSupport::new("main");
        support.begin_start().unwrap();
        support.complete_start();

        let err = support.begin_start().unwrap_err();
        assert_eq!(
            err,
            LifecycleError::InvalidTransition {
                name: "main".to_string(),
                operation: "start",
                state: LifecycleState::Started,
            }
        );
        // The failed call did not corrupt the state.
        assert_eq!(support.state(), LifecycleState::Started);
    }

    #[test]
    fn test_stop_from_new_rejected() {
        let support = LifecycleSupport::new("main");
        assert!(support.begin_stop().is_err());
        assert_eq!(support.state(), LifecycleState::New);
    }

    #[test]
    fn test_reentrant_start_rejected() {
        let support = LifecycleSupport::new("main");
        support.begin_start().unwrap();
        assert!(support.begin_start().is_err());
        assert_eq!(support.state(), LifecycleState::Starting);
    }

    #[test]
    fn test_events_reach_listeners() {
        let support = LifecycleSupport::new("main");
        let recorder = Recorder::new();
        support.add_listener(recorder.clone());

        support.fire(LifecycleEventKind::BeforeStart);
        support.fire(LifecycleEventKind::Start);

        assert_eq!(
            recorder.kinds(),
            vec![LifecycleEventKind::BeforeStart, LifecycleEventKind::Start]
        );
    }

    #[test]
    fn test_listener_registered_late_sees_later_events_only() {
        let support = LifecycleSupport::new("main");
        support.fire(LifecycleEventKind::BeforeStart);

        let recorder = Recorder::new();
        support.add_listener(recorder.clone());
        support.fire(LifecycleEventKind::Start);

        assert_eq!(recorder.kinds(), vec![LifecycleEventKind::Start]);
    }

    #[test]
    fn test_panicking_listener_does_not_break_firing() {
        struct Panicker;
        impl LifecycleListener for Panicker {
            fn lifecycle_event(&self, _event: &LifecycleEvent) {
                panic!("listener bug");
            }
        }

        let support = LifecycleSupport::new("main");
        let recorder = Recorder::new();
        support.add_listener(Arc::new(Panicker));
        support.add_listener(recorder.clone());

        support.fire(LifecycleEventKind::BeforeStop);

        // The panic was contained and the second listener still ran.
        assert_eq!(recorder.kinds(), vec![LifecycleEventKind::BeforeStop]);
    }

    #[test]
    fn test_listener_may_add_listener_while_firing() {
        struct SelfAdder {
            support: Arc<LifecycleSupport>,
            added: Arc<Recorder>,
        }
        impl LifecycleListener for SelfAdder {
            fn lifecycle_event(&self, _event: &LifecycleEvent) {
                self.support.add_listener(self.added.clone());
            }
        }

        let support = Arc::new(LifecycleSupport::new("main"));
        let added = Recorder::new();
        support.add_listener(Arc::new(SelfAdder {
            support: support.clone(),
            added: added.clone(),
        }));

        // No deadlock, no corrupted iteration.
        support.fire(LifecycleEventKind::Start);
        // The listener added mid-firing sees only subsequent events.
        assert!(added.kinds().is_empty());

        support.fire(LifecycleEventKind::AfterStart);
        assert_eq!(added.kinds(), vec![LifecycleEventKind::AfterStart]);
    }
}
