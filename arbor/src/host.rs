//! The virtual-host selector.

use crate::app::APP_PATH_ATTRIBUTE;
use crate::config::ContainerSettings;
use crate::container::{Container, ContainerBase, ContainerKind};
use crate::errors::{DispatchError, LifecycleError, StructuralError};
use crate::lifecycle::{Lifecycle, LifecycleListener, LifecycleState};
use crate::pipeline::{Valve, ValveChain};
use crate::request::{Request, Response};
use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::debug;

/// A virtual host.
///
/// A host attaches under an engine and accepts only app children. App
/// names are context paths (`/`, `/shop`, …); the host's basic valve
/// selects the app with the longest matching path prefix. What happens to
/// a request aimed at an unavailable app is decided here, at the level
/// above the app: the host answers 503.
pub struct Host {
    base: ContainerBase,
}

impl Host {
    /// Creates a host with default settings.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::with_settings(name, ContainerSettings::new())
    }

    /// Creates a host with explicit settings.
    #[must_use]
    pub fn with_settings(name: impl Into<String>, settings: ContainerSettings) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let self_ref: Weak<dyn Container> = weak.clone();
            let basic: Arc<dyn Valve> = Arc::new(HostValve { host: weak.clone() });
            Self {
                base: ContainerBase::new(name, ContainerKind::Host, self_ref, basic, settings),
            }
        })
    }
}

#[async_trait]
impl Container for Host {
    fn base(&self) -> &ContainerBase {
        &self.base
    }

    fn kind(&self) -> ContainerKind {
        ContainerKind::Host
    }

    fn check_child(&self, child: &dyn Container) -> Result<(), StructuralError> {
        if child.kind() == ContainerKind::App {
            Ok(())
        } else {
            Err(StructuralError::ChildKindNotAccepted {
                parent: self.name().to_string(),
                parent_kind: ContainerKind::Host,
                child_kind: child.kind(),
            })
        }
    }

    fn check_parent(&self, parent: &dyn Container) -> Result<(), StructuralError> {
        if parent.kind() == ContainerKind::Engine {
            Ok(())
        } else {
            Err(StructuralError::ParentKindMismatch {
                name: self.name().to_string(),
                kind: ContainerKind::Host,
                expected: ContainerKind::Engine,
                actual: parent.kind(),
            })
        }
    }
}

#[async_trait]
impl Lifecycle for Host {
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

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host").field("base", &self.base).finish()
    }
}

/// The host's basic valve: app selection by longest path prefix.
struct HostValve {
    host: Weak<Host>,
}

impl HostValve {
    fn select_app(host: &Host, path: &str) -> Option<Arc<dyn Container>> {
        let mut best: Option<Arc<dyn Container>> = None;
        for app in host.find_children() {
            if !Self::path_matches(app.name(), path) {
                continue;
            }
            let longer = best
                .as_ref()
                .map_or(true, |current| app.name().len() > current.name().len());
            if longer {
                best = Some(app);
            }
        }
        best
    }

    fn path_matches(app_path: &str, path: &str) -> bool {
        if app_path == "/" {
            return true;
        }
        if let Some(rest) = path.strip_prefix(app_path) {
            rest.is_empty() || rest.starts_with('/')
        } else {
            false
        }
    }
}

#[async_trait]
impl Valve for HostValve {
    fn name(&self) -> &str {
        "host-valve"
    }

    async fn invoke(
        &self,
        request: &mut Request,
        response: &mut Response,
        _next: ValveChain<'_>,
    ) -> Result<(), DispatchError> {
        let Some(host) = self.host.upgrade() else {
            return Ok(());
        };
        let Some(app) = Self::select_app(&host, &request.path) else {
            debug!(host = %host.name(), path = %request.path, "no app matches the request");
            response.set_status(404);
            response.set_body(format!("no app for '{}'", request.path));
            response.commit();
            return Ok(());
        };

        if !app.available() {
            debug!(host = %host.name(), app = %app.name(), "selected app is unavailable");
            response.set_status(503);
            response.set_body(format!("app '{}' is unavailable", app.name()));
            response.commit();
            return Ok(());
        }

        request.set_attribute(APP_PATH_ATTRIBUTE, serde_json::json!(app.name()));
        app.invoke(request, response).await
    }
}

impl fmt::Debug for HostValve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostValve").finish()
    }
}
