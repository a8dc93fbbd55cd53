//! Mock valves, containers, listeners, and handlers.

use crate::config::ContainerSettings;
use crate::container::{
    Container, ContainerBase, ContainerEvent, ContainerEventKind, ContainerKind, ContainerListener,
};
use crate::errors::{ArborError, DispatchError, LifecycleError, StructuralError};
use crate::lifecycle::{
    Lifecycle, LifecycleEvent, LifecycleEventKind, LifecycleListener, LifecycleState,
};
use crate::pipeline::{StartableValve, Valve, ValveChain};
use crate::request::{Request, Response};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// A valve that records invocations and tracks its start state.
#[derive(Debug)]
pub struct RecordingValve {
    name: String,
    started: AtomicBool,
    invocations: AtomicUsize,
    log: Option<Arc<Mutex<Vec<String>>>>,
}

impl RecordingValve {
    /// Creates a recording valve.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            started: AtomicBool::new(false),
            invocations: AtomicUsize::new(0),
            log: None,
        }
    }

    /// Creates a recording valve that appends its name to a shared log on
    /// every invocation.
    #[must_use]
    pub fn logging(name: impl Into<String>, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.into(),
            started: AtomicBool::new(false),
            invocations: AtomicUsize::new(0),
            log: Some(log),
        }
    }

    /// Whether the valve is currently started.
    #[must_use]
    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// How many times the valve was invoked.
    #[must_use]
    pub fn invocation_count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Valve for RecordingValve {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(
        &self,
        request: &mut Request,
        response: &mut Response,
        next: ValveChain<'_>,
    ) -> Result<(), DispatchError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = &self.log {
            log.lock().push(self.name.clone());
        }
        next.invoke_next(request, response).await
    }

    fn as_startable(&self) -> Option<&dyn StartableValve> {
        Some(self)
    }
}

#[async_trait]
impl StartableValve for RecordingValve {
    async fn start(&self) -> Result<(), LifecycleError> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), LifecycleError> {
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// A basic valve whose start always fails, for containers that must fail
/// to start deterministically.
#[derive(Debug)]
struct FailingBootValve;

#[async_trait]
impl Valve for FailingBootValve {
    fn name(&self) -> &str {
        "failing-boot"
    }

    async fn invoke(
        &self,
        _request: &mut Request,
        _response: &mut Response,
        _next: ValveChain<'_>,
    ) -> Result<(), DispatchError> {
        Ok(())
    }

    fn as_startable(&self) -> Option<&dyn StartableValve> {
        Some(self)
    }
}

#[async_trait]
impl StartableValve for FailingBootValve {
    async fn start(&self) -> Result<(), LifecycleError> {
        Err(LifecycleError::ValveStart {
            valve: "failing-boot".to_string(),
            reason: "forced failure".to_string(),
        })
    }

    async fn stop(&self) -> Result<(), LifecycleError> {
        Ok(())
    }
}

/// A host-kind container whose start deterministically fails.
pub struct FailingChild {
    base: ContainerBase,
}

impl FailingChild {
    /// Creates a failing child.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let self_ref: Weak<dyn Container> = weak.clone();
            Self {
                base: ContainerBase::new(
                    name,
                    ContainerKind::Host,
                    self_ref,
                    Arc::new(FailingBootValve),
                    ContainerSettings::new(),
                ),
            }
        })
    }
}

#[async_trait]
impl Container for FailingChild {
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
impl Lifecycle for FailingChild {
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

impl fmt::Debug for FailingChild {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailingChild").field("base", &self.base).finish()
    }
}

/// A host-kind container whose maintenance hook never returns.
pub struct HangingChild {
    base: ContainerBase,
}

impl HangingChild {
    /// Creates a hanging child with the given maintenance cadence.
    #[must_use]
    pub fn new(name: impl Into<String>, delay_secs: i64) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let self_ref: Weak<dyn Container> = weak.clone();
            Self {
                base: ContainerBase::new(
                    name.clone(),
                    ContainerKind::Host,
                    self_ref,
                    Arc::new(RecordingValve::new("basic")),
                    ContainerSettings::new().with_background_delay_secs(delay_secs),
                ),
            }
        })
    }
}

#[async_trait]
impl Container for HangingChild {
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

    async fn background_process(&self) -> Result<(), ArborError> {
        std::future::pending().await
    }
}

#[async_trait]
impl Lifecycle for HangingChild {
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

impl fmt::Debug for HangingChild {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HangingChild").field("base", &self.base).finish()
    }
}

/// A lifecycle listener that records every event it receives.
#[derive(Default)]
pub struct RecordingLifecycleListener {
    events: Mutex<Vec<LifecycleEvent>>,
    sequence: Option<Arc<Mutex<Vec<String>>>>,
}

impl RecordingLifecycleListener {
    /// Creates a recording listener.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates a recording listener that also appends `source:kind` lines
    /// to a shared sequencing log.
    #[must_use]
    pub fn sequenced(sequence: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            sequence: Some(sequence),
        })
    }

    /// The recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().clone()
    }

    /// The recorded event kinds, in order.
    #[must_use]
    pub fn kinds(&self) -> Vec<LifecycleEventKind> {
        self.events.lock().iter().map(|event| event.kind).collect()
    }
}

impl LifecycleListener for RecordingLifecycleListener {
    fn lifecycle_event(&self, event: &LifecycleEvent) {
        if let Some(sequence) = &self.sequence {
            sequence.lock().push(format!("{}:{}", event.source, event.kind));
        }
        self.events.lock().push(event.clone());
    }
}

/// A container listener that records every event it receives.
#[derive(Default)]
pub struct RecordingContainerListener {
    events: Mutex<Vec<ContainerEvent>>,
    sequence: Option<Arc<Mutex<Vec<String>>>>,
}

impl RecordingContainerListener {
    /// Creates a recording listener.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates a recording listener that also appends `container:kind`
    /// lines to a shared sequencing log.
    #[must_use]
    pub fn sequenced(sequence: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            sequence: Some(sequence),
        })
    }

    /// The recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<ContainerEvent> {
        self.events.lock().clone()
    }

    /// The recorded event kinds, in order.
    #[must_use]
    pub fn kinds(&self) -> Vec<ContainerEventKind> {
        self.events.lock().iter().map(|event| event.kind).collect()
    }

    /// How many maintenance runs the listener observed.
    #[must_use]
    pub fn periodic_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.kind == ContainerEventKind::Periodic)
            .count()
    }
}

impl ContainerListener for RecordingContainerListener {
    fn container_event(&self, event: &ContainerEvent) {
        if let Some(sequence) = &self.sequence {
            sequence
                .lock()
                .push(format!("{}:{}", event.container, event.kind));
        }
        self.events.lock().push(event.clone());
    }
}

/// A handler that counts calls and answers "ok".
#[derive(Debug, Default)]
pub struct CountingHandler {
    calls: AtomicUsize,
}

impl CountingHandler {
    /// Creates a counting handler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// How many requests the handler served.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl crate::endpoint::Handler for CountingHandler {
    async fn handle(
        &self,
        _request: &mut Request,
        response: &mut Response,
    ) -> Result<(), DispatchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        response.set_body("ok");
        Ok(())
    }
}

/// A handler that echoes the request path into the body.
#[derive(Debug, Default)]
pub struct EchoHandler;

#[async_trait]
impl crate::endpoint::Handler for EchoHandler {
    async fn handle(
        &self,
        request: &mut Request,
        response: &mut Response,
    ) -> Result<(), DispatchError> {
        response.set_body(request.path.clone());
        Ok(())
    }
}

/// A handler that always fails.
#[derive(Debug, Default)]
pub struct FailingHandler;

#[async_trait]
impl crate::endpoint::Handler for FailingHandler {
    async fn handle(
        &self,
        _request: &mut Request,
        _response: &mut Response,
    ) -> Result<(), DispatchError> {
        Err(DispatchError::handler("forced handler failure"))
    }
}
