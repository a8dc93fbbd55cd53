//! The embeddable container base.
//!
//! Each concrete container kind embeds a [`ContainerBase`] and delegates
//! the generic tree, lifecycle, fan-out, and maintenance mechanics to it.
//! Kind-specific behavior (structural legality, the basic valve, routing
//! state) stays in the kind.

use super::background::BackgroundTask;
use super::events::{ContainerEvent, ContainerEventKind, ContainerListener};
use super::{Container, ContainerKind};
use crate::config::ContainerSettings;
use crate::errors::{LifecycleError, StructuralError};
use crate::lifecycle::{
    fire_contained, Lifecycle, LifecycleEventKind, LifecycleState, LifecycleSupport, ListenerSet,
};
use crate::pipeline::{Pipeline, Valve};
use crate::resolver::ResourceResolver;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Common state and mechanics shared by every container kind.
pub struct ContainerBase {
    id: Uuid,
    name: String,
    kind: ContainerKind,
    self_ref: Weak<dyn Container>,
    parent: RwLock<Option<Weak<dyn Container>>>,
    children: DashMap<String, Arc<dyn Container>>,
    listeners: ListenerSet<dyn ContainerListener>,
    lifecycle: LifecycleSupport,
    pipeline: Arc<Pipeline>,
    settings: RwLock<ContainerSettings>,
    resolver: RwLock<Option<Arc<dyn ResourceResolver>>>,
    available: AtomicBool,
    fanout: Mutex<Option<Arc<Semaphore>>>,
    background: Mutex<Option<BackgroundTask>>,
}

impl ContainerBase {
    /// Creates the base for a container under construction.
    ///
    /// `self_ref` is the weak self reference produced by
    /// `Arc::new_cyclic`; the pipeline is created here, seeded with the
    /// kind's basic valve, and bound to the owner.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        kind: ContainerKind,
        self_ref: Weak<dyn Container>,
        basic: Arc<dyn Valve>,
        settings: ContainerSettings,
    ) -> Self {
        let name = name.into();
        let pipeline = Arc::new(Pipeline::with_basic(name.clone(), self_ref.clone(), basic));
        Self {
            id: Uuid::new_v4(),
            lifecycle: LifecycleSupport::new(name.clone()),
            name,
            kind,
            self_ref,
            parent: RwLock::new(None),
            children: DashMap::new(),
            listeners: ListenerSet::default(),
            pipeline,
            settings: RwLock::new(settings),
            resolver: RwLock::new(None),
            available: AtomicBool::new(false),
            fanout: Mutex::new(None),
            background: Mutex::new(None),
        }
    }

    /// The container's instance id, used in logs and events.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The container's name, unique among its siblings.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The container's kind.
    #[must_use]
    pub fn kind(&self) -> ContainerKind {
        self.kind
    }

    /// The owned pipeline.
    #[must_use]
    pub fn pipeline(&self) -> Arc<Pipeline> {
        self.pipeline.clone()
    }

    /// The embedded lifecycle state machine.
    #[must_use]
    pub fn lifecycle(&self) -> &LifecycleSupport {
        &self.lifecycle
    }

    /// This container as a shared reference, if construction completed.
    #[must_use]
    pub fn self_container(&self) -> Option<Arc<dyn Container>> {
        self.self_ref.upgrade()
    }

    /// The parent container, if attached and alive.
    #[must_use]
    pub fn parent(&self) -> Option<Arc<dyn Container>> {
        self.parent.read().as_ref().and_then(Weak::upgrade)
    }

    /// Stores the parent reference without validation.
    ///
    /// Validation belongs to the kind's `set_parent`/`check_parent`.
    pub fn store_parent(&self, parent: Option<Arc<dyn Container>>) {
        *self.parent.write() = parent.as_ref().map(Arc::downgrade);
    }

    /// A snapshot of the current settings.
    #[must_use]
    pub fn settings(&self) -> ContainerSettings {
        self.settings.read().clone()
    }

    /// Replaces the settings. A changed maintenance cadence takes effect at
    /// the next start.
    pub fn set_settings(&self, settings: ContainerSettings) {
        *self.settings.write() = settings;
    }

    /// The resolver override, if set.
    #[must_use]
    pub fn resolver_override(&self) -> Option<Arc<dyn ResourceResolver>> {
        self.resolver.read().clone()
    }

    /// Sets or clears the resolver override.
    pub fn set_resolver(&self, resolver: Option<Arc<dyn ResourceResolver>>) {
        *self.resolver.write() = resolver;
    }

    /// Whether the container completed its last start cleanly.
    #[must_use]
    pub fn available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Overrides the availability flag (administrative pause/resume).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Looks up a child by name. Unknown names return `None`.
    #[must_use]
    pub fn find_child(&self, name: &str) -> Option<Arc<dyn Container>> {
        self.children.get(name).map(|entry| entry.value().clone())
    }

    /// A snapshot of the children, in name order.
    #[must_use]
    pub fn find_children(&self) -> Vec<Arc<dyn Container>> {
        let mut children: Vec<_> = self
            .children
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        children.sort_by(|a, b| a.name().cmp(b.name()));
        children
    }

    /// Registers a structural listener.
    pub fn add_container_listener(&self, listener: Arc<dyn ContainerListener>) {
        self.listeners.add(listener);
    }

    /// Removes a structural listener by identity.
    pub fn remove_container_listener(&self, listener: &Arc<dyn ContainerListener>) {
        self.listeners.remove(listener);
    }

    /// Returns the registered structural listeners.
    #[must_use]
    pub fn container_listeners(&self) -> Vec<Arc<dyn ContainerListener>> {
        self.listeners.snapshot()
    }

    /// Fires a structural event synchronously to a snapshot of listeners.
    pub fn fire_container_event(&self, kind: ContainerEventKind, child: Option<String>) {
        let event = ContainerEvent::new(kind, self.name.clone(), child);
        for listener in self.listeners.snapshot() {
            fire_contained(&self.name, || listener.container_event(&event));
        }
    }

    /// Attaches a validated child: duplicate-name check, parent binding,
    /// optional auto-start, `ChildAdded` event.
    ///
    /// Kind legality has already been checked by the caller
    /// (`Container::add_child`).
    pub(crate) async fn attach_child(
        &self,
        child: Arc<dyn Container>,
    ) -> Result<(), StructuralError> {
        let child_name = child.name().to_string();
        if child_name.is_empty() {
            return Err(StructuralError::EmptyChildName {
                parent: self.name.clone(),
            });
        }
        if self.children.contains_key(&child_name) {
            return Err(StructuralError::DuplicateChild {
                parent: self.name.clone(),
                name: child_name,
            });
        }

        if let Some(parent) = self.self_container() {
            child.set_parent(Some(parent))?;
        }

        match self.children.entry(child_name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                // Lost a race against a concurrent attach of the same name.
                child.set_parent(None).ok();
                return Err(StructuralError::DuplicateChild {
                    parent: self.name.clone(),
                    name: child_name,
                });
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(child.clone());
            }
        }

        if self.settings().start_children_on_add
            && self.lifecycle.state() == LifecycleState::Started
        {
            if let Err(err) = child.start().await {
                warn!(
                    container = %self.name,
                    child = %child_name,
                    error = %err,
                    "child failed to start on attach; it remains attached but unavailable"
                );
            }
        }

        self.fire_container_event(ContainerEventKind::ChildAdded, Some(child_name));
        Ok(())
    }

    /// Detaches a child by name: removing an absent name is a no-op.
    ///
    /// A running child is stopped first (failures logged), then unbound
    /// and announced via `ChildRemoved`.
    pub(crate) async fn detach_child(&self, name: &str) -> Option<Arc<dyn Container>> {
        let (child_name, child) = self.children.remove(name)?;

        if child.state() == LifecycleState::Started {
            if let Err(err) = child.stop().await {
                warn!(
                    container = %self.name,
                    child = %child_name,
                    error = %err,
                    "child failed to stop on detach"
                );
            }
        }
        child.set_parent(None).ok();

        self.fire_container_event(ContainerEventKind::ChildRemoved, Some(child_name));
        Some(child)
    }

    /// Runs the generic start sequence: pipeline, then concurrent child
    /// fan-out, then the maintenance task, then the state flip and events.
    pub(crate) async fn start_container(&self) -> Result<(), LifecycleError> {
        self.lifecycle.begin_start()?;
        self.lifecycle.fire(LifecycleEventKind::BeforeStart);
        debug!(container = %self.name, id = %self.id, kind = %self.kind, "starting");

        if let Err(err) = self.pipeline.start().await {
            self.available.store(false, Ordering::SeqCst);
            self.lifecycle.fail_start();
            return Err(err);
        }

        self.start_children().await;
        self.spawn_background();

        self.lifecycle.complete_start();
        self.available.store(true, Ordering::SeqCst);
        self.lifecycle.fire(LifecycleEventKind::Start);
        self.lifecycle.fire(LifecycleEventKind::AfterStart);
        Ok(())
    }

    /// Runs the generic stop sequence, exactly reversing start: the
    /// maintenance task is stopped and joined before any child, then the
    /// children, then the pipeline, then the fan-out pool is discarded.
    ///
    /// A hung maintenance task is fatal but does not abort the teardown;
    /// the error is returned once teardown completes.
    pub(crate) async fn stop_container(&self) -> Result<(), LifecycleError> {
        self.lifecycle.begin_stop()?;
        self.lifecycle.fire(LifecycleEventKind::BeforeStop);
        self.available.store(false, Ordering::SeqCst);
        debug!(container = %self.name, id = %self.id, kind = %self.kind, "stopping");

        let mut first_error = None;
        let background = self.background.lock().take();
        if let Some(task) = background {
            if let Err(err) = task.stop(&self.name).await {
                error!(container = %self.name, error = %err, "background maintenance task leaked");
                first_error = Some(err);
            }
        }

        self.stop_children().await;

        if let Err(err) = self.pipeline.stop().await {
            warn!(container = %self.name, error = %err, "pipeline failed to stop cleanly");
            first_error.get_or_insert(err);
        }

        *self.fanout.lock() = None;

        self.lifecycle.complete_stop();
        self.lifecycle.fire(LifecycleEventKind::Stop);
        self.lifecycle.fire(LifecycleEventKind::AfterStop);
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Starts every child concurrently through the fan-out pool.
    ///
    /// Best-effort: a failing child is logged and marked unavailable by its
    /// own start path; siblings are unaffected. Returns once every child
    /// has attempted to start.
    async fn start_children(&self) {
        let children = self.find_children();
        if children.is_empty() {
            return;
        }
        let semaphore = self.fanout_pool();
        let mut handles = Vec::with_capacity(children.len());
        for child in children {
            let semaphore = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_closed) => return,
                };
                if let Err(err) = child.start().await {
                    warn!(container = %child.name(), error = %err, "child failed to start");
                }
            }));
        }
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(container = %self.name, error = %err, "child start task aborted");
            }
        }
    }

    /// Stops every running child concurrently through the fan-out pool.
    async fn stop_children(&self) {
        let children = self.find_children();
        if children.is_empty() {
            return;
        }
        let semaphore = self.fanout_pool();
        let mut handles = Vec::with_capacity(children.len());
        for child in children {
            if child.state() != LifecycleState::Started {
                debug!(container = %child.name(), state = %child.state(), "skipping stop of non-running child");
                continue;
            }
            let semaphore = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_closed) => return,
                };
                if let Err(err) = child.stop().await {
                    warn!(container = %child.name(), error = %err, "child failed to stop");
                }
            }));
        }
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(container = %self.name, error = %err, "child stop task aborted");
            }
        }
    }

    /// Returns the fan-out pool, creating it on first use.
    ///
    /// The pool persists across the start and stop of one cycle;
    /// `stop_container` discards it once teardown completes.
    fn fanout_pool(&self) -> Arc<Semaphore> {
        let mut pool = self.fanout.lock();
        if let Some(existing) = pool.as_ref() {
            return existing.clone();
        }
        let size = self.settings().effective_startup_threads();
        debug!(container = %self.name, size, "creating start/stop fan-out pool");
        let created = Arc::new(Semaphore::new(size));
        *pool = Some(created.clone());
        created
    }

    /// Spawns the maintenance task when this container opted in.
    fn spawn_background(&self) {
        let delay_secs = self.settings().background_delay_secs;
        if delay_secs <= 0 {
            return;
        }
        let Some(container) = self.self_container() else {
            return;
        };
        let task = BackgroundTask::spawn(container, Duration::from_secs(delay_secs.unsigned_abs()));
        *self.background.lock() = Some(task);
    }
}

impl fmt::Debug for ContainerBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerBase")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("state", &self.lifecycle.state())
            .field("available", &self.available())
            .field("children", &self.children.len())
            .finish()
    }
}
