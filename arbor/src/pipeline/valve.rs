//! The valve trait and its optional capabilities.
//!
//! Valves are the units of request processing. Each pipeline holds an
//! ordered chain of them terminated by one mandatory basic valve.

use crate::container::Container;
use crate::errors::{DispatchError, LifecycleError};
use crate::request::{Request, Response};
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

/// A unit of request processing in a pipeline.
///
/// A valve may act on the request/response, call onward through `next`, or
/// both. The basic valve of a pipeline is terminal and never calls onward.
///
/// Capabilities are optional and probed at registration time: a valve that
/// holds resources implements [`StartableValve`] and returns itself from
/// `as_startable`; a valve that needs its owning container implements
/// [`Contained`] and returns itself from `as_contained`.
#[async_trait]
pub trait Valve: Send + Sync + Debug {
    /// Returns the valve's name.
    fn name(&self) -> &str;

    /// Processes the request.
    ///
    /// # Errors
    ///
    /// Processing and I/O errors propagate to the caller of the pipeline.
    async fn invoke(
        &self,
        request: &mut Request,
        response: &mut Response,
        next: ValveChain<'_>,
    ) -> Result<(), DispatchError>;

    /// Probes the start/stop capability.
    fn as_startable(&self) -> Option<&dyn StartableValve> {
        None
    }

    /// Probes the owner-association capability.
    fn as_contained(&self) -> Option<&dyn Contained> {
        None
    }
}

/// Start/stop capability for valves that hold resources.
///
/// The owning pipeline drives these when the valve is added/removed or when
/// the pipeline itself starts/stops.
#[async_trait]
pub trait StartableValve: Send + Sync {
    /// Starts the valve.
    ///
    /// # Errors
    ///
    /// A failure aborts the owning pipeline's start.
    async fn start(&self) -> Result<(), LifecycleError>;

    /// Stops the valve.
    ///
    /// # Errors
    ///
    /// A failure aborts the owning pipeline's stop.
    async fn stop(&self) -> Result<(), LifecycleError>;
}

/// Owner-association capability.
///
/// Implementations must hold the association weakly: the container owns the
/// pipeline owns the valve, and the valve must never keep its owner alive.
pub trait Contained: Send + Sync {
    /// Associates the valve with its hosting container (`None` clears).
    fn set_container(&self, container: Option<Arc<dyn Container>>);

    /// Returns the hosting container, if associated and still alive.
    fn container(&self) -> Option<Arc<dyn Container>>;
}

/// A borrowed cursor over the remainder of a pipeline's chain.
///
/// Each valve receives the chain positioned after itself; `invoke_next`
/// dispatches the next valve. Invoking past the terminal valve is a no-op.
#[derive(Debug, Clone, Copy)]
pub struct ValveChain<'a> {
    valves: &'a [Arc<dyn Valve>],
}

impl<'a> ValveChain<'a> {
    /// Creates a chain over the given execution-ordered valves.
    #[must_use]
    pub(crate) fn new(valves: &'a [Arc<dyn Valve>]) -> Self {
        Self { valves }
    }

    /// Invokes the next valve in the chain.
    ///
    /// # Errors
    ///
    /// Propagates the downstream valve's error.
    pub async fn invoke_next(
        &self,
        request: &mut Request,
        response: &mut Response,
    ) -> Result<(), DispatchError> {
        match self.valves.split_first() {
            Some((head, rest)) => head.invoke(request, response, ValveChain::new(rest)).await,
            None => Ok(()),
        }
    }

    /// Returns how many valves remain.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.valves.len()
    }
}
