//! The handler unit.

use crate::config::ContainerSettings;
use crate::container::{Container, ContainerBase, ContainerKind};
use crate::errors::{DispatchError, LifecycleError, StructuralError};
use crate::lifecycle::{Lifecycle, LifecycleListener, LifecycleState};
use crate::pipeline::{Valve, ValveChain};
use crate::request::{Request, Response};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::debug;

/// The unit of application code an endpoint delegates to.
///
/// How handlers are loaded, instantiated, or pooled is a collaborator
/// concern; the endpoint only holds the binding.
#[async_trait]
pub trait Handler: Send + Sync + fmt::Debug {
    /// Processes the request.
    ///
    /// # Errors
    ///
    /// Failures propagate through the tree to the caller of the top-level
    /// `invoke`.
    async fn handle(
        &self,
        request: &mut Request,
        response: &mut Response,
    ) -> Result<(), DispatchError>;
}

/// The leaf of the dispatch tree: one named handler unit inside an app.
///
/// Endpoints accept no children at all and cannot be re-parented while
/// started. With no handler bound (or while unavailable) the endpoint
/// answers 503.
pub struct Endpoint {
    base: ContainerBase,
    handler: RwLock<Option<Arc<dyn Handler>>>,
}

impl Endpoint {
    /// Creates an endpoint with default settings.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::with_settings(name, ContainerSettings::new())
    }

    /// Creates an endpoint with explicit settings.
    #[must_use]
    pub fn with_settings(name: impl Into<String>, settings: ContainerSettings) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let self_ref: Weak<dyn Container> = weak.clone();
            let basic: Arc<dyn Valve> = Arc::new(EndpointValve {
                endpoint: weak.clone(),
            });
            Self {
                base: ContainerBase::new(name, ContainerKind::Endpoint, self_ref, basic, settings),
                handler: RwLock::new(None),
            }
        })
    }

    /// Binds the handler.
    pub fn set_handler(&self, handler: Arc<dyn Handler>) {
        *self.handler.write() = Some(handler);
    }

    /// Clears the handler binding.
    pub fn clear_handler(&self) {
        *self.handler.write() = None;
    }

    /// The bound handler, if any.
    #[must_use]
    pub fn handler(&self) -> Option<Arc<dyn Handler>> {
        self.handler.read().clone()
    }
}

#[async_trait]
impl Container for Endpoint {
    fn base(&self) -> &ContainerBase {
        &self.base
    }

    fn kind(&self) -> ContainerKind {
        ContainerKind::Endpoint
    }

    fn check_child(&self, _child: &dyn Container) -> Result<(), StructuralError> {
        Err(StructuralError::ChildrenNotAllowed {
            name: self.name().to_string(),
            kind: ContainerKind::Endpoint,
        })
    }

    fn check_parent(&self, parent: &dyn Container) -> Result<(), StructuralError> {
        if parent.kind() == ContainerKind::App {
            Ok(())
        } else {
            Err(StructuralError::ParentKindMismatch {
                name: self.name().to_string(),
                kind: ContainerKind::Endpoint,
                expected: ContainerKind::App,
                actual: parent.kind(),
            })
        }
    }

    fn set_parent(&self, parent: Option<Arc<dyn Container>>) -> Result<(), StructuralError> {
        if parent.is_some() && self.state() == LifecycleState::Started {
            return Err(StructuralError::ReparentWhileStarted {
                name: self.name().to_string(),
                kind: ContainerKind::Endpoint,
            });
        }
        if let Some(parent) = &parent {
            self.check_parent(parent.as_ref())?;
        }
        self.base.store_parent(parent);
        Ok(())
    }
}

#[async_trait]
impl Lifecycle for Endpoint {
    fn state(&self) -> LifecycleState {
        self.base.lifecycle().state()
    }

    fn add_lifecycle_listener(&self, listener: Arc<dyn LifecycleListener>) {
        self.base.lifecycle().add_listener(listener);
    }

    fn remove_lifecycle_listener(&self, listener: &Arc<dyn LifecycleListener>) {
        self.base.lifecycle().remove_listener(listener);
    }

    fn lifecycle_listeners(&self) -> Vec<Arc<dyn LifecycleListener>> {
        self.base.lifecycle().listeners()
    }

    async fn start(&self) -> Result<(), LifecycleError> {
        self.base.start_container().await
    }

    async fn stop(&self) -> Result<(), LifecycleError> {
        self.base.stop_container().await
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("base", &self.base)
            .field("has_handler", &self.handler.read().is_some())
            .finish()
    }
}

/// The endpoint's basic valve: handler delegation.
struct EndpointValve {
    endpoint: Weak<Endpoint>,
}

#[async_trait]
impl Valve for EndpointValve {
    fn name(&self) -> &str {
        "endpoint-valve"
    }

    async fn invoke(
        &self,
        request: &mut Request,
        response: &mut Response,
        _next: ValveChain<'_>,
    ) -> Result<(), DispatchError> {
        let Some(endpoint) = self.endpoint.upgrade() else {
            return Ok(());
        };

        let handler = if endpoint.available() {
            endpoint.handler()
        } else {
            None
        };
        let Some(handler) = handler else {
            debug!(endpoint = %endpoint.name(), "endpoint has no usable handler");
            response.set_status(503);
            response.set_body(format!("endpoint '{}' is unavailable", endpoint.name()));
            response.commit();
            return Ok(());
        };

        handler.handle(request, response).await?;
        response.commit();
        Ok(())
    }
}

impl fmt::Debug for EndpointValve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointValve").finish()
    }
}
