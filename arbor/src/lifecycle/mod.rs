//! The guarded start/stop state machine shared by containers, pipelines,
//! and stateful valves.
//!
//! This module provides:
//! - The [`LifecycleState`] machine with re-entrancy guards
//! - Ordered lifecycle events and synchronous listeners
//! - [`LifecycleSupport`], the embeddable transition helper

mod events;
mod state;
mod support;

pub use events::{LifecycleEvent, LifecycleEventKind, LifecycleListener};
pub(crate) use events::{fire_contained, ListenerSet};
pub use state::LifecycleState;
pub use support::LifecycleSupport;

use crate::errors::LifecycleError;
use async_trait::async_trait;
use std::sync::Arc;

/// A long-lived component with a guarded start/stop state machine.
///
/// `start` transitions `New`/`Stopped` → `Started`, firing `BeforeStart`,
/// then the component's kind-specific work, then `Start` and `AfterStart`.
/// `stop` is symmetric. Calling either from any other state fails fast with
/// no side effects.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// Returns the current lifecycle state.
    fn state(&self) -> LifecycleState;

    /// Registers a listener; it receives only events fired after
    /// registration.
    fn add_lifecycle_listener(&self, listener: Arc<dyn LifecycleListener>);

    /// Removes a listener by identity. Unknown listeners are ignored.
    fn remove_lifecycle_listener(&self, listener: &Arc<dyn LifecycleListener>);

    /// Returns the registered listeners.
    fn lifecycle_listeners(&self) -> Vec<Arc<dyn LifecycleListener>>;

    /// Starts the component.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` when not in `New`/`Stopped`, or the
    /// error that aborted the component's own start work.
    async fn start(&self) -> Result<(), LifecycleError>;

    /// Stops the component.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` when not in `Started`, or a fatal
    /// teardown error such as a hung maintenance task.
    async fn stop(&self) -> Result<(), LifecycleError>;
}
