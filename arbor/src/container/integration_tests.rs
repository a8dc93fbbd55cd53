//! End-to-end tests across the container tree: dispatch, fan-out,
//! maintenance scheduling, and shutdown ordering.

use super::background::process_subtree;
use super::{Container, ContainerBase, ContainerEventKind, ContainerKind};
use crate::app::App;
use crate::config::ContainerSettings;
use crate::engine::Engine;
use crate::errors::{ArborError, DispatchError, LifecycleError, StructuralError};
use crate::host::Host;
use crate::lifecycle::{
    Lifecycle, LifecycleEventKind, LifecycleListener, LifecycleState,
};
use crate::pipeline::ErrorReportValve;
use crate::request::{Request, Response};
use crate::resolver::{active_resolver, ResourceResolver};
use crate::testing::{
    init_test_logging, FailingChild, FailingHandler, HangingChild, RecordingContainerListener,
    RecordingLifecycleListener, RecordingValve, TestTree,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

#[tokio::test]
async fn test_full_dispatch_reaches_handler() {
    init_test_logging();
    let tree = TestTree::build().await.unwrap();
    tree.engine.start().await.unwrap();

    let mut req = Request::new("localhost", "/");
    let mut resp = Response::new();
    tree.engine.invoke(&mut req, &mut resp).await.unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.body(), b"ok");
    assert!(resp.is_committed());
    assert_eq!(tree.handler.calls(), 1);

    // An unmatched server name falls back to the default host.
    let mut req = Request::new("unknown.example", "/");
    let mut resp = Response::new();
    tree.engine.invoke(&mut req, &mut resp).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(tree.handler.calls(), 2);

    tree.engine.stop().await.unwrap();
}

#[tokio::test]
async fn test_wrong_child_kind_leaves_tree_unchanged() {
    let engine = Engine::new("main");
    let app = App::new("/");
    let err = engine.add_child(app).await.unwrap_err();
    assert!(matches!(err, StructuralError::ChildKindNotAccepted { .. }));
    assert!(engine.find_children().is_empty());
}

#[tokio::test]
async fn test_duplicate_child_name_keeps_first() {
    let engine = Engine::new("main");
    let first = Host::new("localhost");
    let second = Host::new("localhost");

    engine.add_child(first.clone()).await.unwrap();
    let err = engine.add_child(second).await.unwrap_err();
    assert!(matches!(err, StructuralError::DuplicateChild { .. }));

    let children = engine.find_children();
    assert_eq!(children.len(), 1);
    let first_dyn: Arc<dyn Container> = first;
    assert!(Arc::ptr_eq(&children[0], &first_dyn));
}

#[tokio::test]
async fn test_empty_child_name_is_rejected() {
    let engine = Engine::new("main");
    let err = engine.add_child(Host::new("")).await.unwrap_err();
    assert!(matches!(err, StructuralError::EmptyChildName { .. }));
    assert!(engine.find_children().is_empty());
}

#[tokio::test]
async fn test_find_child_unknown_name_is_none() {
    let engine = Engine::new("main");
    assert!(engine.find_child("nowhere").is_none());
    assert!(engine.remove_child("nowhere").await.is_none());
}

#[tokio::test]
async fn test_lifecycle_event_order() {
    let engine = Engine::with_settings("main", ContainerSettings::new());
    let listener = RecordingLifecycleListener::new();
    engine.add_lifecycle_listener(listener.clone());

    engine.start().await.unwrap();
    engine.stop().await.unwrap();

    assert_eq!(
        listener.kinds(),
        vec![
            LifecycleEventKind::BeforeStart,
            LifecycleEventKind::Start,
            LifecycleEventKind::AfterStart,
            LifecycleEventKind::BeforeStop,
            LifecycleEventKind::Stop,
            LifecycleEventKind::AfterStop,
        ]
    );
}

#[tokio::test]
async fn test_double_start_is_guarded() {
    let engine = Engine::with_settings("main", ContainerSettings::new());
    engine.start().await.unwrap();

    let err = engine.start().await.unwrap_err();
    assert!(matches!(err, LifecycleError::InvalidTransition { .. }));
    assert_eq!(engine.state(), LifecycleState::Started);
    assert!(engine.available());

    engine.stop().await.unwrap();
}

#[tokio::test]
async fn test_fanout_tolerates_one_failing_child() {
    init_test_logging();
    let engine = Engine::with_settings(
        "main",
        ContainerSettings::new().with_startup_threads(4),
    );
    let good: Vec<_> = ["alpha", "beta", "gamma"]
        .iter()
        .map(|name| Host::new(*name))
        .collect();
    for host in &good {
        engine.add_child(host.clone()).await.unwrap();
    }
    let failing = FailingChild::new("delta");
    engine.add_child(failing.clone()).await.unwrap();

    // The parent's start completes despite the failing child.
    engine.start().await.unwrap();
    assert_eq!(engine.state(), LifecycleState::Started);

    for host in &good {
        assert_eq!(host.state(), LifecycleState::Started);
        assert!(host.available());
    }
    assert_ne!(failing.state(), LifecycleState::Started);
    assert!(!failing.available());

    engine.stop().await.unwrap();
    for host in &good {
        assert_eq!(host.state(), LifecycleState::Stopped);
    }
}

#[tokio::test]
async fn test_failed_start_marks_unavailable() {
    let failing = FailingChild::new("broken");
    let err = failing.start().await.unwrap_err();
    assert!(matches!(err, LifecycleError::ValveStart { .. }));
    assert_eq!(failing.state(), LifecycleState::Stopped);
    assert!(!failing.available());
}

#[tokio::test]
async fn test_auto_start_policy() {
    let engine = Engine::with_settings("main", ContainerSettings::new());
    engine.start().await.unwrap();

    let host = Host::new("auto");
    engine.add_child(host.clone()).await.unwrap();
    assert_eq!(host.state(), LifecycleState::Started);

    let manual_engine = Engine::with_settings(
        "manual",
        ContainerSettings::new().with_start_children_on_add(false),
    );
    manual_engine.start().await.unwrap();
    let manual_host = Host::new("manual-host");
    manual_engine.add_child(manual_host.clone()).await.unwrap();
    assert_eq!(manual_host.state(), LifecycleState::New);

    engine.stop().await.unwrap();
    manual_engine.stop().await.unwrap();
}

#[tokio::test]
async fn test_remove_child_stops_and_unbinds() {
    let engine = Engine::with_settings("main", ContainerSettings::new());
    let listener = RecordingContainerListener::new();
    engine.add_container_listener(listener.clone());

    let host = Host::new("localhost");
    engine.add_child(host.clone()).await.unwrap();
    engine.start().await.unwrap();
    assert_eq!(host.state(), LifecycleState::Started);

    let removed = engine.remove_child("localhost").await.unwrap();
    assert_eq!(removed.name(), "localhost");
    assert_eq!(host.state(), LifecycleState::Stopped);
    assert!(host.parent().is_none());
    assert!(engine.find_child("localhost").is_none());

    assert_eq!(
        listener.kinds(),
        vec![
            ContainerEventKind::ChildAdded,
            ContainerEventKind::ChildRemoved,
        ]
    );

    engine.stop().await.unwrap();
}

/// A container listener that registers another listener the first time it
/// fires.
struct SelfExtendingListener {
    engine: Weak<Engine>,
    late: Arc<RecordingContainerListener>,
    added: AtomicBool,
}

impl super::ContainerListener for SelfExtendingListener {
    fn container_event(&self, _event: &super::ContainerEvent) {
        if self.added.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(engine) = self.engine.upgrade() {
            engine.add_container_listener(self.late.clone());
        }
    }
}

#[tokio::test]
async fn test_listener_may_register_listener_during_firing() {
    let engine = Engine::with_settings("main", ContainerSettings::new());
    let late = RecordingContainerListener::new();
    engine.add_container_listener(Arc::new(SelfExtendingListener {
        engine: Arc::downgrade(&engine),
        late: late.clone(),
        added: AtomicBool::new(false),
    }));

    engine.add_child(Host::new("one")).await.unwrap();
    // The listener registered during the first firing saw nothing yet.
    assert!(late.events().is_empty());

    engine.add_child(Host::new("two")).await.unwrap();
    assert_eq!(late.kinds(), vec![ContainerEventKind::ChildAdded]);
}

#[tokio::test(start_paused = true)]
async fn test_maintenance_skips_children_with_own_task() {
    let engine = Engine::with_settings(
        "main",
        ContainerSettings::new().with_background_delay_secs(1),
    );
    let inline_child = Host::new("inline");
    let independent_child = Host::with_settings(
        "independent",
        ContainerSettings::new().with_background_delay_secs(1),
    );

    let engine_listener = RecordingContainerListener::new();
    let inline_listener = RecordingContainerListener::new();
    let independent_listener = RecordingContainerListener::new();
    engine.add_container_listener(engine_listener.clone());
    inline_child.add_container_listener(inline_listener.clone());
    independent_child.add_container_listener(independent_listener.clone());

    engine.add_child(inline_child).await.unwrap();
    engine.add_child(independent_child).await.unwrap();
    engine.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;

    // One tick each: the parent serviced itself and the delay-0 child; the
    // delay-1 child ran exactly once on its own task, not a second time
    // through the parent's recursion.
    assert_eq!(engine_listener.periodic_count(), 1);
    assert_eq!(inline_listener.periodic_count(), 1);
    assert_eq!(independent_listener.periodic_count(), 1);

    engine.stop().await.unwrap();
}

/// A host-kind container whose maintenance hook is deliberately slow and
/// writes begin/end markers to a shared sequencing log.
struct SlowMaintenanceHost {
    base: ContainerBase,
    sequence: Arc<Mutex<Vec<String>>>,
}

impl SlowMaintenanceHost {
    fn new(name: &str, sequence: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        let name = name.to_string();
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let self_ref: Weak<dyn Container> = weak.clone();
            Self {
                base: ContainerBase::new(
                    name,
                    ContainerKind::Host,
                    self_ref,
                    Arc::new(RecordingValve::new("basic")),
                    ContainerSettings::new().with_background_delay_secs(1),
                ),
                sequence,
            }
        })
    }
}

#[async_trait]
impl Container for SlowMaintenanceHost {
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
        self.sequence.lock().push("hook-start".to_string());
        tokio::time::sleep(Duration::from_millis(300)).await;
        self.sequence.lock().push("hook-end".to_string());
        Ok(())
    }
}

#[async_trait]
impl Lifecycle for SlowMaintenanceHost {
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

impl fmt::Debug for SlowMaintenanceHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlowMaintenanceHost")
            .field("base", &self.base)
            .finish()
    }
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_joins_maintenance_before_stopping_children() {
    let sequence = Arc::new(Mutex::new(Vec::new()));
    let host = SlowMaintenanceHost::new("localhost", sequence.clone());

    let app = App::new("/");
    app.add_lifecycle_listener(RecordingLifecycleListener::sequenced(sequence.clone()));
    host.add_child(app).await.unwrap();
    host.start().await.unwrap();

    // Let the maintenance hook begin its slow pass, then stop mid-hook.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    host.stop().await.unwrap();

    let log = sequence.lock().clone();
    let hook_end = log
        .iter()
        .position(|entry| entry == "hook-end")
        .expect("maintenance hook never finished");
    let child_stop = log
        .iter()
        .position(|entry| entry == "/:before_stop")
        .expect("child never began stopping");
    assert!(
        hook_end < child_stop,
        "maintenance task must be joined before any child stops: {log:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn test_hung_maintenance_task_is_fatal() {
    let hanging = HangingChild::new("stuck", 1);
    hanging.start().await.unwrap();

    // Let the first tick begin; the hook never returns.
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let err = hanging.stop().await.unwrap_err();
    assert!(matches!(err, LifecycleError::MaintenanceHung { .. }));
    // Teardown still completed: the container is stopped, not wedged.
    assert_eq!(hanging.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_handler_failure_propagates_to_connector() {
    let tree = TestTree::build().await.unwrap();
    tree.endpoint.set_handler(Arc::new(FailingHandler));
    tree.engine.start().await.unwrap();

    let mut req = Request::new("localhost", "/");
    let mut resp = Response::new();
    let err = tree.engine.invoke(&mut req, &mut resp).await.unwrap_err();
    assert!(matches!(err, DispatchError::Handler { .. }));

    // With an error-report valve at the top, the failure becomes a 500.
    tree.engine
        .pipeline()
        .add_valve(Arc::new(ErrorReportValve::new()))
        .await
        .unwrap();
    let mut req = Request::new("localhost", "/");
    let mut resp = Response::new();
    tree.engine.invoke(&mut req, &mut resp).await.unwrap();
    assert_eq!(resp.status(), 500);

    tree.engine.stop().await.unwrap();
}

#[tokio::test]
async fn test_valves_run_level_by_level() {
    let tree = TestTree::build().await.unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    tree.engine
        .pipeline()
        .add_valve(Arc::new(RecordingValve::logging("engine-aux", log.clone())))
        .await
        .unwrap();
    tree.host
        .pipeline()
        .add_valve(Arc::new(RecordingValve::logging("host-aux", log.clone())))
        .await
        .unwrap();
    tree.engine.start().await.unwrap();

    let mut req = Request::new("localhost", "/");
    let mut resp = Response::new();
    tree.engine.invoke(&mut req, &mut resp).await.unwrap();

    assert_eq!(*log.lock(), vec!["engine-aux", "host-aux"]);
    assert_eq!(resp.status(), 200);

    tree.engine.stop().await.unwrap();
}

#[derive(Debug)]
struct NamedResolver(&'static str);

impl ResourceResolver for NamedResolver {
    fn describe(&self) -> &str {
        self.0
    }

    fn lookup(&self, _key: &str) -> Option<serde_json::Value> {
        None
    }
}

#[tokio::test]
async fn test_resolver_delegates_through_parent_chain() {
    let tree = TestTree::build().await.unwrap();

    // No overrides anywhere: everything resolves to the system default.
    assert_eq!(tree.endpoint.effective_resolver().describe(), "system");

    // An override on the app is seen by the endpoint below it, but not by
    // the host above it.
    tree.app
        .set_resolver(Some(Arc::new(NamedResolver("app-scope"))));
    assert_eq!(tree.endpoint.effective_resolver().describe(), "app-scope");
    assert_eq!(tree.app.effective_resolver().describe(), "app-scope");
    assert_eq!(tree.host.effective_resolver().describe(), "system");
}

/// An app-kind container whose hook records the active resolver.
struct ResolverProbeApp {
    base: ContainerBase,
    seen: Arc<Mutex<Vec<String>>>,
}

impl ResolverProbeApp {
    fn new(name: &str, seen: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        let name = name.to_string();
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let self_ref: Weak<dyn Container> = weak.clone();
            Self {
                base: ContainerBase::new(
                    name,
                    ContainerKind::App,
                    self_ref,
                    Arc::new(RecordingValve::new("basic")),
                    ContainerSettings::new(),
                ),
                seen,
            }
        })
    }
}

#[async_trait]
impl Container for ResolverProbeApp {
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

    async fn background_process(&self) -> Result<(), ArborError> {
        self.seen.lock().push(active_resolver().describe().to_string());
        Ok(())
    }
}

#[async_trait]
impl Lifecycle for ResolverProbeApp {
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

impl fmt::Debug for ResolverProbeApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverProbeApp")
            .field("base", &self.base)
            .finish()
    }
}

#[tokio::test]
async fn test_maintenance_runs_inside_app_resolver_scope() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let app = ResolverProbeApp::new("/probe", seen.clone());
    app.set_resolver(Some(Arc::new(NamedResolver("probe-scope"))));

    let container: Arc<dyn Container> = app;
    process_subtree(container).await;

    // Inside the hook the app's own resolver was active; outside the scope
    // the system default is back.
    assert_eq!(*seen.lock(), vec!["probe-scope".to_string()]);
    assert_eq!(active_resolver().describe(), "system");
}

#[tokio::test]
async fn test_engine_id_is_stable_and_unique() {
    let one = Engine::with_settings("one", ContainerSettings::new());
    let two = Engine::with_settings("two", ContainerSettings::new());
    assert_ne!(one.id(), two.id());
    assert_eq!(one.id(), one.id());
}
