//! Built-in cross-cutting valves.
//!
//! These are installable at any tree level through `add_valve`.

use super::valve::{Contained, StartableValve, Valve, ValveChain};
use crate::container::Container;
use crate::errors::{DispatchError, LifecycleError};
use crate::request::{Request, Response};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::{info, warn};

/// Logs every request passing through its level.
///
/// Implements both optional capabilities: it is associated with its hosting
/// container (so log lines carry the container name) and started/stopped
/// with the pipeline (so the request counter spans one start cycle).
#[derive(Debug, Default)]
pub struct AccessLogValve {
    container: RwLock<Option<Weak<dyn Container>>>,
    requests: AtomicU64,
}

impl AccessLogValve {
    /// Creates a new access-log valve.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests logged since the last start.
    #[must_use]
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }

    fn container_name(&self) -> String {
        self.container()
            .map_or_else(|| "-".to_string(), |container| container.name().to_string())
    }
}

#[async_trait]
impl Valve for AccessLogValve {
    fn name(&self) -> &str {
        "access-log"
    }

    async fn invoke(
        &self,
        request: &mut Request,
        response: &mut Response,
        next: ValveChain<'_>,
    ) -> Result<(), DispatchError> {
        let started = Instant::now();
        let result = next.invoke_next(request, response).await;
        self.requests.fetch_add(1, Ordering::SeqCst);
        info!(
            container = %self.container_name(),
            method = %request.method,
            path = %request.path,
            status = response.status(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "access"
        );
        result
    }

    fn as_startable(&self) -> Option<&dyn StartableValve> {
        Some(self)
    }

    fn as_contained(&self) -> Option<&dyn Contained> {
        Some(self)
    }
}

#[async_trait]
impl StartableValve for AccessLogValve {
    async fn start(&self) -> Result<(), LifecycleError> {
        self.requests.store(0, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), LifecycleError> {
        info!(
            container = %self.container_name(),
            requests = self.request_count(),
            "access log closed"
        );
        Ok(())
    }
}

impl Contained for AccessLogValve {
    fn set_container(&self, container: Option<Arc<dyn Container>>) {
        *self.container.write() = container.as_ref().map(Arc::downgrade);
    }

    fn container(&self) -> Option<Arc<dyn Container>> {
        self.container.read().as_ref().and_then(Weak::upgrade)
    }
}

/// Converts downstream dispatch failures into a 500 response.
///
/// Install ahead of the basic valve at the level whose failures should be
/// reported to the client instead of propagating to the connector.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorReportValve;

impl ErrorReportValve {
    /// Creates a new error-report valve.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Valve for ErrorReportValve {
    fn name(&self) -> &str {
        "error-report"
    }

    async fn invoke(
        &self,
        request: &mut Request,
        response: &mut Response,
        next: ValveChain<'_>,
    ) -> Result<(), DispatchError> {
        match next.invoke_next(request, response).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(path = %request.path, error = %err, "request failed");
                if !response.is_committed() {
                    response.set_status(500);
                    response.set_body(format!("internal error: {err}"));
                    response.commit();
                }
                Ok(())
            }
        }
    }
}
