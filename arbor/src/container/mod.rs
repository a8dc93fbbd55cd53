//! The container tree: named nodes dispatching requests through owned
//! pipelines.
//!
//! This module provides:
//! - The [`Container`] trait and [`ContainerKind`] taxonomy
//! - [`ContainerBase`], the embeddable generic mechanics
//! - Structural events and listeners
//! - Background maintenance scheduling

mod background;
mod base;
mod events;

#[cfg(test)]
mod integration_tests;

pub use base::ContainerBase;
pub use events::{ContainerEvent, ContainerEventKind, ContainerListener};

use crate::config::ContainerSettings;
use crate::errors::{ArborError, DispatchError, StructuralError};
use crate::lifecycle::Lifecycle;
use crate::pipeline::Pipeline;
use crate::request::{Request, Response};
use crate::resolver::{ResourceResolver, SystemResolver};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// The closed set of container kinds.
///
/// The kinds form a strict chain of custody: an engine dispatches to hosts,
/// a host to apps, an app to endpoints. Which parents and children a
/// container accepts is fixed by its kind and enforced by the kind's own
/// `check_child`/`check_parent` overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerKind {
    /// The top-level dispatcher.
    Engine,
    /// A virtual-host selector.
    Host,
    /// An application boundary.
    App,
    /// A handler unit.
    Endpoint,
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Engine => write!(f, "engine"),
            Self::Host => write!(f, "host"),
            Self::App => write!(f, "app"),
            Self::Endpoint => write!(f, "endpoint"),
        }
    }
}

/// A named node in the dispatch tree.
///
/// Containers are created as `Arc`s, attached with [`add_child`], and
/// started/stopped through their [`Lifecycle`]. Request tasks call
/// [`invoke`], which forwards into the owned pipeline; each level's basic
/// valve selects the next level's container and re-invokes it.
///
/// [`add_child`]: Container::add_child
/// [`invoke`]: Container::invoke
#[async_trait]
pub trait Container: Lifecycle + Send + Sync + fmt::Debug {
    /// The embedded base carrying the generic mechanics.
    fn base(&self) -> &ContainerBase;

    /// The container's kind.
    fn kind(&self) -> ContainerKind;

    /// Checks whether this container accepts `child` as a child.
    ///
    /// # Errors
    ///
    /// Returns the structural error describing the rejection.
    fn check_child(&self, child: &dyn Container) -> Result<(), StructuralError>;

    /// Checks whether this container accepts `parent` as its parent.
    ///
    /// # Errors
    ///
    /// Returns the structural error describing the rejection.
    fn check_parent(&self, parent: &dyn Container) -> Result<(), StructuralError>;

    /// The container's name, unique among its siblings.
    fn name(&self) -> &str {
        self.base().name()
    }

    /// The container's instance id.
    fn id(&self) -> Uuid {
        self.base().id()
    }

    /// The owned pipeline.
    fn pipeline(&self) -> Arc<Pipeline> {
        self.base().pipeline()
    }

    /// The parent container, if attached.
    fn parent(&self) -> Option<Arc<dyn Container>> {
        self.base().parent()
    }

    /// Binds or clears the parent reference, validating the parent's kind.
    ///
    /// Called by `add_child`/`remove_child`; the reference is stored
    /// weakly. The parent owns the child, never the reverse.
    ///
    /// # Errors
    ///
    /// Returns the structural error when the parent kind is rejected.
    fn set_parent(&self, parent: Option<Arc<dyn Container>>) -> Result<(), StructuralError> {
        if let Some(parent) = &parent {
            self.check_parent(parent.as_ref())?;
        }
        self.base().store_parent(parent);
        Ok(())
    }

    /// Attaches a child.
    ///
    /// The child's kind is validated first; a duplicate sibling name is
    /// rejected with the tree unchanged. When the auto-start policy is
    /// enabled and this container is started, the child is started
    /// immediately (failures logged, never propagated). Fires `ChildAdded`.
    ///
    /// # Errors
    ///
    /// Returns the structural error that rejected the attachment.
    async fn add_child(&self, child: Arc<dyn Container>) -> Result<(), StructuralError> {
        self.check_child(child.as_ref())?;
        self.base().attach_child(child).await
    }

    /// Detaches a child by name; unknown names are a no-op.
    ///
    /// A running child is stopped first (failures logged). Fires
    /// `ChildRemoved`. Returns the detached child, if any.
    async fn remove_child(&self, name: &str) -> Option<Arc<dyn Container>> {
        self.base().detach_child(name).await
    }

    /// Looks up a child by name.
    fn find_child(&self, name: &str) -> Option<Arc<dyn Container>> {
        self.base().find_child(name)
    }

    /// A snapshot of the children, in name order.
    fn find_children(&self) -> Vec<Arc<dyn Container>> {
        self.base().find_children()
    }

    /// Registers a structural listener.
    fn add_container_listener(&self, listener: Arc<dyn ContainerListener>) {
        self.base().add_container_listener(listener);
    }

    /// Removes a structural listener by identity.
    fn remove_container_listener(&self, listener: &Arc<dyn ContainerListener>) {
        self.base().remove_container_listener(listener);
    }

    /// Returns the registered structural listeners.
    fn container_listeners(&self) -> Vec<Arc<dyn ContainerListener>> {
        self.base().container_listeners()
    }

    /// Whether the container completed its last start cleanly.
    ///
    /// The engine never decides what an unavailable container does with a
    /// request; the level above does.
    fn available(&self) -> bool {
        self.base().available()
    }

    /// A snapshot of the container's settings.
    fn settings(&self) -> ContainerSettings {
        self.base().settings()
    }

    /// Replaces the container's settings.
    fn set_settings(&self, settings: ContainerSettings) {
        self.base().set_settings(settings);
    }

    /// Seconds between maintenance runs; `<= 0` means this container is
    /// serviced by the nearest ancestor owning a maintenance task.
    fn background_delay(&self) -> i64 {
        self.base().settings().background_delay_secs
    }

    /// The resolver override, if set on this container.
    fn resolver_override(&self) -> Option<Arc<dyn ResourceResolver>> {
        self.base().resolver_override()
    }

    /// Sets or clears this container's resolver override.
    fn set_resolver(&self, resolver: Option<Arc<dyn ResourceResolver>>) {
        self.base().set_resolver(resolver);
    }

    /// The effective resolver: the override, else the parent chain, else
    /// the system default.
    fn effective_resolver(&self) -> Arc<dyn ResourceResolver> {
        if let Some(resolver) = self.resolver_override() {
            return resolver;
        }
        match self.parent() {
            Some(parent) => parent.effective_resolver(),
            None => Arc::new(SystemResolver),
        }
    }

    /// The resolver to bind while this container's subtree is maintained,
    /// or `None` when maintenance runs unscoped.
    fn maintenance_resolver(&self) -> Option<Arc<dyn ResourceResolver>> {
        None
    }

    /// Processes a request by forwarding into the owned pipeline.
    ///
    /// # Errors
    ///
    /// Propagates processing and I/O errors to the caller.
    async fn invoke(
        &self,
        request: &mut Request,
        response: &mut Response,
    ) -> Result<(), DispatchError> {
        self.pipeline().invoke(request, response).await
    }

    /// The periodic maintenance hook.
    ///
    /// Runs on this container's own maintenance task, or on the nearest
    /// ancestor's when this container has none. Errors are logged by the
    /// maintenance loop and never terminate it.
    async fn background_process(&self) -> Result<(), ArborError> {
        self.base()
            .fire_container_event(ContainerEventKind::Periodic, None);
        Ok(())
    }
}
