//! The top-level dispatcher.

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

/// The root of the dispatch tree.
///
/// An engine accepts only host children and never a parent. Its basic
/// valve selects the child host matching the request's server name,
/// falling back to the configured default host. By default an engine
/// services its subtree every 10 seconds.
pub struct Engine {
    base: ContainerBase,
    default_host: RwLock<String>,
}

impl Engine {
    /// Creates an engine with the default settings (10 s maintenance
    /// cadence).
    #[must_use]
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::with_settings(
            name,
            ContainerSettings::new().with_background_delay_secs(10),
        )
    }

    /// Creates an engine with explicit settings.
    #[must_use]
    pub fn with_settings(name: impl Into<String>, settings: ContainerSettings) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let self_ref: Weak<dyn Container> = weak.clone();
            let basic: Arc<dyn Valve> = Arc::new(EngineValve {
                engine: weak.clone(),
            });
            Self {
                base: ContainerBase::new(name, ContainerKind::Engine, self_ref, basic, settings),
                default_host: RwLock::new(String::new()),
            }
        })
    }

    /// The host used when no child matches the request's server name.
    #[must_use]
    pub fn default_host(&self) -> String {
        self.default_host.read().clone()
    }

    /// Sets the default host name.
    pub fn set_default_host(&self, host: impl Into<String>) {
        *self.default_host.write() = host.into();
    }
}

#[async_trait]
impl Container for Engine {
    fn base(&self) -> &ContainerBase {
        &self.base
    }

    fn kind(&self) -> ContainerKind {
        ContainerKind::Engine
    }

    fn check_child(&self, child: &dyn Container) -> Result<(), StructuralError> {
        if child.kind() == ContainerKind::Host {
            Ok(())
        } else {
            Err(StructuralError::ChildKindNotAccepted {
                parent: self.name().to_string(),
                parent_kind: ContainerKind::Engine,
                child_kind: child.kind(),
            })
        }
    }

    fn check_parent(&self, _parent: &dyn Container) -> Result<(), StructuralError> {
        Err(StructuralError::ParentNotAllowed {
            name: self.name().to_string(),
            kind: ContainerKind::Engine,
        })
    }
}

#[async_trait]
impl Lifecycle for Engine {
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

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("base", &self.base)
            .field("default_host", &self.default_host())
            .finish()
    }
}

/// The engine's basic valve: virtual-host selection.
struct EngineValve {
    engine: Weak<Engine>,
}

impl EngineValve {
    fn select_host(&self, engine: &Engine, server_name: &str) -> Option<Arc<dyn Container>> {
        engine.find_child(server_name).or_else(|| {
            let fallback = engine.default_host();
            if fallback.is_empty() {
                None
            } else {
                engine.find_child(&fallback)
            }
        })
    }
}

#[async_trait]
impl Valve for EngineValve {
    fn name(&self) -> &str {
        "engine-valve"
    }

    async fn invoke(
        &self,
        request: &mut Request,
        response: &mut Response,
        _next: ValveChain<'_>,
    ) -> Result<(), DispatchError> {
        let Some(engine) = self.engine.upgrade() else {
            return Ok(());
        };
        match self.select_host(&engine, &request.server_name) {
            Some(host) => host.invoke(request, response).await,
            None => {
                debug!(server_name = %request.server_name, "no host matches the request");
                response.set_status(404);
                response.set_body(format!("no host for '{}'", request.server_name));
                response.commit();
                Ok(())
            }
        }
    }
}

impl fmt::Debug for EngineValve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineValve").finish()
    }
}
