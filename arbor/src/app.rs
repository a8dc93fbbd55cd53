//! The application boundary.

use crate::config::ContainerSettings;
use crate::container::{Container, ContainerBase, ContainerKind};
use crate::errors::{DispatchError, LifecycleError, StructuralError};
use crate::lifecycle::{Lifecycle, LifecycleListener, LifecycleState};
use crate::pipeline::{Valve, ValveChain};
use crate::request::{Request, Response};
use crate::resolver::ResourceResolver;
use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Request attribute carrying the selected app's context path.
pub const APP_PATH_ATTRIBUTE: &str = "arbor.app.path";

/// An application mounted on a host.
///
/// The app's name is its context path (`/` for the root app). It accepts
/// only endpoint children and routes the path remainder to one of them
/// through its mapping table: exact match first, then the longest
/// `/prefix/*` wildcard, then the `/` default.
///
/// Maintenance of an app's subtree runs inside the app's resolver scope,
/// so hooks observe the app's own resolution context.
pub struct App {
    base: ContainerBase,
    mappings: DashMap<String, String>,
}

impl App {
    /// Creates an app with default settings.
    #[must_use]
    pub fn new(context_path: impl Into<String>) -> Arc<Self> {
        Self::with_settings(context_path, ContainerSettings::new())
    }

    /// Creates an app with explicit settings.
    #[must_use]
    pub fn with_settings(
        context_path: impl Into<String>,
        settings: ContainerSettings,
    ) -> Arc<Self> {
        let context_path = context_path.into();
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let self_ref: Weak<dyn Container> = weak.clone();
            let basic: Arc<dyn Valve> = Arc::new(AppValve { app: weak.clone() });
            Self {
                base: ContainerBase::new(
                    context_path,
                    ContainerKind::App,
                    self_ref,
                    basic,
                    settings,
                ),
                mappings: DashMap::new(),
            }
        })
    }

    /// The app's context path (its name).
    #[must_use]
    pub fn context_path(&self) -> &str {
        self.base.name()
    }

    /// Maps a path pattern to an endpoint child name.
    ///
    /// Patterns are an exact path (`/cart`), a wildcard prefix
    /// (`/static/*`), or the default `/`.
    pub fn add_mapping(&self, pattern: impl Into<String>, endpoint: impl Into<String>) {
        self.mappings.insert(pattern.into(), endpoint.into());
    }

    /// Removes a path mapping.
    pub fn remove_mapping(&self, pattern: &str) {
        self.mappings.remove(pattern);
    }

    /// Resolves a path (relative to the context path) to an endpoint name.
    #[must_use]
    pub fn map_endpoint(&self, path: &str) -> Option<String> {
        if let Some(endpoint) = self.mappings.get(path) {
            return Some(endpoint.value().clone());
        }

        let mut best: Option<(usize, String)> = None;
        for entry in self.mappings.iter() {
            let Some(prefix) = entry.key().strip_suffix("/*") else {
                continue;
            };
            let matches = path.starts_with(prefix)
                && matches!(path.as_bytes().get(prefix.len()), None | Some(&b'/'));
            if matches {
                let better = best
                    .as_ref()
                    .map_or(true, |(length, _)| prefix.len() > *length);
                if better {
                    best = Some((prefix.len(), entry.value().clone()));
                }
            }
        }
        if let Some((_, endpoint)) = best {
            return Some(endpoint);
        }

        self.mappings
            .get("/")
            .map(|endpoint| endpoint.value().clone())
    }

    /// Pauses or resumes the app.
    ///
    /// The host's basic valve answers 503 for a paused app; this engine
    /// level never sees the request.
    pub fn set_available(&self, available: bool) {
        self.base.set_available(available);
    }

    /// The path remainder this app routes on, given the full request path.
    fn relative_path<'a>(&self, path: &'a str) -> &'a str {
        let context = self.context_path();
        if context == "/" {
            return path;
        }
        match path.strip_prefix(context) {
            Some("") | None => "/",
            Some(rest) => rest,
        }
    }
}

#[async_trait]
impl Container for App {
    fn base(&self) -> &ContainerBase {
        &self.base
    }

    fn kind(&self) -> ContainerKind {
        ContainerKind::App
    }

    fn check_child(&self, child: &dyn Container) -> Result<(), StructuralError> {
        if child.kind() == ContainerKind::Endpoint {
            Ok(())
        } else {
            Err(StructuralError::ChildKindNotAccepted {
                parent: self.name().to_string(),
                parent_kind: ContainerKind::App,
                child_kind: child.kind(),
            })
        }
    }

    fn check_parent(&self, parent: &dyn Container) -> Result<(), StructuralError> {
        if parent.kind() == ContainerKind::Host {
            Ok(())
        } else {
            Err(StructuralError::ParentKindMismatch {
                name: self.name().to_string(),
                kind: ContainerKind::App,
                expected: ContainerKind::Host,
                actual: parent.kind(),
            })
        }
    }

    fn maintenance_resolver(&self) -> Option<Arc<dyn ResourceResolver>> {
        Some(self.effective_resolver())
    }
}

#[async_trait]
impl Lifecycle for App {
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

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("base", &self.base)
            .field("mappings", &self.mappings.len())
            .finish()
    }
}

/// The app's basic valve: endpoint selection through the mapping table.
struct AppValve {
    app: Weak<App>,
}

#[async_trait]
impl Valve for AppValve {
    fn name(&self) -> &str {
        "app-valve"
    }

    async fn invoke(
        &self,
        request: &mut Request,
        response: &mut Response,
        _next: ValveChain<'_>,
    ) -> Result<(), DispatchError> {
        let Some(app) = self.app.upgrade() else {
            return Ok(());
        };
        let relative = app.relative_path(&request.path).to_string();
        let endpoint = app
            .map_endpoint(&relative)
            .and_then(|name| app.find_child(&name));

        match endpoint {
            Some(endpoint) => endpoint.invoke(request, response).await,
            None => {
                debug!(app = %app.name(), path = %relative, "no endpoint matches the request");
                response.set_status(404);
                response.set_body(format!("no endpoint for '{relative}'"));
                response.commit();
                Ok(())
            }
        }
    }
}

impl fmt::Debug for AppValve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppValve").finish()
    }
}
