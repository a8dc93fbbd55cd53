//! Error types for the arbor dispatch engine.
//!
//! The taxonomy follows the engine's error-handling contract: structural and
//! lifecycle errors are always surfaced synchronously to the caller, while
//! best-effort operational failures (a child failing to start during fan-out,
//! a maintenance hook erroring) are logged where they happen and never appear
//! here.

use crate::container::ContainerKind;
use crate::lifecycle::LifecycleState;
use thiserror::Error;

/// The main error type for arbor operations.
#[derive(Debug, Error)]
pub enum ArborError {
    /// An illegal tree or pipeline mutation.
    #[error("{0}")]
    Structural(#[from] StructuralError),

    /// A lifecycle state-machine violation.
    #[error("{0}")]
    Lifecycle(#[from] LifecycleError),

    /// A request-dispatch failure.
    #[error("{0}")]
    Dispatch(#[from] DispatchError),
}

/// Errors raised by illegal mutations of the container tree or a pipeline.
///
/// These indicate a configuration bug and are never silently absorbed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralError {
    /// A sibling with the same name already exists.
    #[error("container '{parent}' already has a child named '{name}'")]
    DuplicateChild {
        /// The parent container's name.
        parent: String,
        /// The colliding child name.
        name: String,
    },

    /// A child name was empty.
    #[error("container '{parent}' rejected a child with an empty name")]
    EmptyChildName {
        /// The parent container's name.
        parent: String,
    },

    /// The parent kind does not accept children of this kind.
    #[error("{parent_kind} '{parent}' does not accept {child_kind} children")]
    ChildKindNotAccepted {
        /// The parent container's name.
        parent: String,
        /// The parent container's kind.
        parent_kind: ContainerKind,
        /// The rejected child kind.
        child_kind: ContainerKind,
    },

    /// This kind never accepts children at all.
    #[error("{kind} '{name}' does not accept children")]
    ChildrenNotAllowed {
        /// The container's name.
        name: String,
        /// The container's kind.
        kind: ContainerKind,
    },

    /// The top-level kind cannot be attached to a parent.
    #[error("{kind} '{name}' does not accept a parent")]
    ParentNotAllowed {
        /// The container's name.
        name: String,
        /// The container's kind.
        kind: ContainerKind,
    },

    /// The child kind requires a different parent kind.
    #[error("{kind} '{name}' requires a {expected} parent, got {actual}")]
    ParentKindMismatch {
        /// The child container's name.
        name: String,
        /// The child container's kind.
        kind: ContainerKind,
        /// The parent kind this kind attaches to.
        expected: ContainerKind,
        /// The offered parent kind.
        actual: ContainerKind,
    },

    /// The container cannot be moved to another parent while running.
    #[error("{kind} '{name}' cannot be re-parented while started")]
    ReparentWhileStarted {
        /// The container's name.
        name: String,
        /// The container's kind.
        kind: ContainerKind,
    },

    /// The basic valve cannot be replaced while auxiliary valves exist.
    #[error("pipeline of '{container}' still holds auxiliary valves; the basic valve cannot be replaced")]
    BasicValveReplaced {
        /// The owning container's name.
        container: String,
    },

    /// The basic valve can never be removed.
    #[error("the basic valve of '{container}' cannot be removed")]
    BasicValveRemoved {
        /// The owning container's name.
        container: String,
    },

    /// An auxiliary valve was added before a basic valve was set.
    #[error("pipeline of '{container}' has no basic valve yet; set one before adding valves")]
    NoBasicValve {
        /// The owning container's name.
        container: String,
    },
}

/// Errors raised by the lifecycle state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    /// The requested transition is illegal from the current state.
    #[error("cannot {operation} '{name}' from state {state}")]
    InvalidTransition {
        /// The component's name.
        name: String,
        /// The attempted operation ("start" or "stop").
        operation: &'static str,
        /// The state the component was in.
        state: LifecycleState,
    },

    /// The background maintenance task failed to terminate during stop.
    ///
    /// This is fatal: it signals a leaked task the caller cannot ignore.
    #[error("background maintenance task of '{name}' failed to stop within the grace period")]
    MaintenanceHung {
        /// The component's name.
        name: String,
    },

    /// A valve failed to start while its pipeline was starting.
    #[error("valve '{valve}' failed to start: {reason}")]
    ValveStart {
        /// The valve's name.
        valve: String,
        /// Why the valve refused to start.
        reason: String,
    },

    /// A valve failed to stop while its pipeline was stopping.
    #[error("valve '{valve}' failed to stop: {reason}")]
    ValveStop {
        /// The valve's name.
        valve: String,
        /// Why the valve refused to stop.
        reason: String,
    },
}

/// Errors raised on the request-dispatch path and propagated to the caller.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The pipeline has no basic valve and is configured to fail loudly.
    #[error("pipeline of '{container}' has no basic valve")]
    NoBasicValve {
        /// The owning container's name.
        container: String,
    },

    /// The bound handler failed while processing the request.
    #[error("handler failed: {reason}")]
    Handler {
        /// The handler's failure description.
        reason: String,
    },

    /// An I/O error surfaced while writing the response.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DispatchError {
    /// Creates a handler failure.
    #[must_use]
    pub fn handler(reason: impl Into<String>) -> Self {
        Self::Handler {
            reason: reason.into(),
        }
    }
}
