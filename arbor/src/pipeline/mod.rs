//! Pipelines: ordered valve chains with one mandatory basic valve.
//!
//! Every container owns exactly one pipeline. Auxiliary valves are freely
//! insertable ahead of the basic valve; the basic valve is structurally
//! impossible to bypass or remove.

mod builtin;
mod valve;

pub use builtin::{AccessLogValve, ErrorReportValve};
pub use valve::{Contained, StartableValve, Valve, ValveChain};

use crate::container::Container;
use crate::errors::{ArborError, DispatchError, LifecycleError, StructuralError};
use crate::lifecycle::{
    Lifecycle, LifecycleEventKind, LifecycleListener, LifecycleState, LifecycleSupport,
};
use crate::request::{Request, Response};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::warn;

/// An ordered chain of valves owned by exactly one container.
///
/// The chain is terminated by the basic valve, which must be set before any
/// auxiliary valve can be added and can never be removed. A newly added
/// auxiliary valve becomes the first valve to run; the basic valve always
/// runs last.
///
/// A strict pipeline (the default) surfaces invocation without a basic
/// valve, and replacement of the basic valve while auxiliary valves exist,
/// as errors; a lenient pipeline logs and ignores both.
pub struct Pipeline {
    container_name: String,
    owner: RwLock<Option<Weak<dyn Container>>>,
    basic: RwLock<Option<Arc<dyn Valve>>>,
    valves: RwLock<Vec<Arc<dyn Valve>>>,
    strict: AtomicBool,
    lifecycle: LifecycleSupport,
}

impl Pipeline {
    /// Creates an empty, strict pipeline with no owning container.
    ///
    /// Used directly only in tests and tools; containers create their
    /// pipeline through [`Pipeline::with_basic`].
    #[must_use]
    pub fn new(container_name: impl Into<String>) -> Self {
        let container_name = container_name.into();
        let lifecycle = LifecycleSupport::new(format!("{container_name}.pipeline"));
        Self {
            container_name,
            owner: RwLock::new(None),
            basic: RwLock::new(None),
            valves: RwLock::new(Vec::new()),
            strict: AtomicBool::new(true),
            lifecycle,
        }
    }

    /// Creates a pipeline seeded with its basic valve and bound to its
    /// owning container.
    #[must_use]
    pub(crate) fn with_basic(
        container_name: impl Into<String>,
        owner: Weak<dyn Container>,
        basic: Arc<dyn Valve>,
    ) -> Self {
        let pipeline = Self::new(container_name);
        *pipeline.owner.write() = Some(owner);
        pipeline.associate(&basic);
        *pipeline.basic.write() = Some(basic);
        pipeline
    }

    /// The name of the owning container.
    #[must_use]
    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    /// Returns whether the pipeline is strict.
    #[must_use]
    pub fn is_strict(&self) -> bool {
        self.strict.load(Ordering::SeqCst)
    }

    /// Switches between strict and lenient policy.
    pub fn set_strict(&self, strict: bool) {
        self.strict.store(strict, Ordering::SeqCst);
    }

    /// Returns the basic valve, if one is set.
    #[must_use]
    pub fn basic(&self) -> Option<Arc<dyn Valve>> {
        self.basic.read().clone()
    }

    /// Returns the first valve to execute.
    #[must_use]
    pub fn first_valve(&self) -> Option<Arc<dyn Valve>> {
        let head = self.valves.read().first().cloned();
        head.or_else(|| self.basic())
    }

    /// Returns the full chain in execution order, basic valve last.
    #[must_use]
    pub fn valves(&self) -> Vec<Arc<dyn Valve>> {
        let mut chain = self.valves.read().clone();
        if let Some(basic) = self.basic() {
            chain.push(basic);
        }
        chain
    }

    /// Sets or replaces the basic valve.
    ///
    /// Seeding an empty pipeline is always legal. Replacement is legal only
    /// while no auxiliary valves exist; otherwise a strict pipeline errors
    /// and a lenient one logs and keeps the old basic. On a started
    /// pipeline the new valve is associated and started, and the previous
    /// one stopped and disassociated.
    ///
    /// # Errors
    ///
    /// Returns a structural error on an illegal replacement, or the new
    /// valve's start failure.
    pub async fn set_basic(&self, valve: Arc<dyn Valve>) -> Result<(), ArborError> {
        let previous = {
            let mut basic = self.basic.write();
            if basic.is_some() && !self.valves.read().is_empty() {
                if self.is_strict() {
                    return Err(StructuralError::BasicValveReplaced {
                        container: self.container_name.clone(),
                    }
                    .into());
                }
                warn!(
                    container = %self.container_name,
                    "ignoring basic valve replacement while auxiliary valves exist"
                );
                return Ok(());
            }
            basic.replace(valve.clone())
        };

        self.associate(&valve);
        if self.state() == LifecycleState::Started {
            if let Some(startable) = valve.as_startable() {
                startable.start().await.map_err(|err| {
                    ArborError::Lifecycle(LifecycleError::ValveStart {
                        valve: valve.name().to_string(),
                        reason: err.to_string(),
                    })
                })?;
            }
        }

        if let Some(previous) = previous {
            if self.state() == LifecycleState::Started {
                if let Some(startable) = previous.as_startable() {
                    if let Err(err) = startable.stop().await {
                        warn!(
                            container = %self.container_name,
                            valve = %previous.name(),
                            error = %err,
                            "replaced basic valve failed to stop"
                        );
                    }
                }
            }
            self.disassociate(&previous);
        }
        Ok(())
    }

    /// Adds an auxiliary valve ahead of everything previously added.
    ///
    /// The new valve becomes the head of the chain; the basic valve stays
    /// last. On a started pipeline the valve is started immediately.
    ///
    /// # Errors
    ///
    /// Returns a structural error when no basic valve is set, or the
    /// valve's start failure (in which case it is not kept).
    pub async fn add_valve(&self, valve: Arc<dyn Valve>) -> Result<(), ArborError> {
        if self.basic.read().is_none() {
            return Err(StructuralError::NoBasicValve {
                container: self.container_name.clone(),
            }
            .into());
        }

        self.valves.write().insert(0, valve.clone());
        self.associate(&valve);

        if self.state() == LifecycleState::Started {
            if let Some(startable) = valve.as_startable() {
                if let Err(err) = startable.start().await {
                    self.valves
                        .write()
                        .retain(|existing| !Arc::ptr_eq(existing, &valve));
                    self.disassociate(&valve);
                    return Err(ArborError::Lifecycle(LifecycleError::ValveStart {
                        valve: valve.name().to_string(),
                        reason: err.to_string(),
                    }));
                }
            }
        }
        Ok(())
    }

    /// Removes an auxiliary valve by identity.
    ///
    /// Removing an absent valve is a no-op. The removed valve is stopped
    /// (failures logged) and disassociated.
    ///
    /// # Errors
    ///
    /// Removing the basic valve is always an error.
    pub async fn remove_valve(&self, valve: &Arc<dyn Valve>) -> Result<(), StructuralError> {
        if let Some(basic) = self.basic() {
            if Arc::ptr_eq(&basic, valve) {
                return Err(StructuralError::BasicValveRemoved {
                    container: self.container_name.clone(),
                });
            }
        }

        let removed = {
            let mut valves = self.valves.write();
            let before = valves.len();
            valves.retain(|existing| !Arc::ptr_eq(existing, valve));
            valves.len() != before
        };

        if removed {
            if self.state() == LifecycleState::Started {
                if let Some(startable) = valve.as_startable() {
                    if let Err(err) = startable.stop().await {
                        warn!(
                            container = %self.container_name,
                            valve = %valve.name(),
                            error = %err,
                            "removed valve failed to stop"
                        );
                    }
                }
            }
            self.disassociate(valve);
        }
        Ok(())
    }

    /// Dispatches a request through the chain.
    ///
    /// # Errors
    ///
    /// Propagates valve/handler/I-O errors. A strict pipeline with no basic
    /// valve fails loudly; a lenient one logs and leaves the response
    /// untouched.
    pub async fn invoke(
        &self,
        request: &mut Request,
        response: &mut Response,
    ) -> Result<(), DispatchError> {
        let chain = {
            let basic = self.basic.read();
            match basic.as_ref() {
                Some(basic) => {
                    let mut chain = self.valves.read().clone();
                    chain.push(basic.clone());
                    chain
                }
                None => {
                    if self.is_strict() {
                        return Err(DispatchError::NoBasicValve {
                            container: self.container_name.clone(),
                        });
                    }
                    warn!(
                        container = %self.container_name,
                        "dropping request: pipeline has no basic valve"
                    );
                    return Ok(());
                }
            }
        };
        ValveChain::new(&chain).invoke_next(request, response).await
    }

    /// Binds the owning container reference used for valve association.
    pub(crate) fn set_owner(&self, owner: Weak<dyn Container>) {
        *self.owner.write() = Some(owner);
    }

    fn owner_container(&self) -> Option<Arc<dyn Container>> {
        self.owner.read().as_ref().and_then(Weak::upgrade)
    }

    fn associate(&self, valve: &Arc<dyn Valve>) {
        if let Some(contained) = valve.as_contained() {
            contained.set_container(self.owner_container());
        }
    }

    fn disassociate(&self, valve: &Arc<dyn Valve>) {
        if let Some(contained) = valve.as_contained() {
            contained.set_container(None);
        }
    }
}

#[async_trait]
impl Lifecycle for Pipeline {
    fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    fn add_lifecycle_listener(&self, listener: Arc<dyn LifecycleListener>) {
        self.lifecycle.add_listener(listener);
    }

    fn remove_lifecycle_listener(&self, listener: &Arc<dyn LifecycleListener>) {
        self.lifecycle.remove_listener(listener);
    }

    fn lifecycle_listeners(&self) -> Vec<Arc<dyn LifecycleListener>> {
        self.lifecycle.listeners()
    }

    async fn start(&self) -> Result<(), LifecycleError> {
        self.lifecycle.begin_start()?;
        self.lifecycle.fire(LifecycleEventKind::BeforeStart);

        for valve in self.valves() {
            self.associate(&valve);
            if let Some(startable) = valve.as_startable() {
                if let Err(err) = startable.start().await {
                    self.lifecycle.fail_start();
                    return Err(LifecycleError::ValveStart {
                        valve: valve.name().to_string(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        self.lifecycle.complete_start();
        self.lifecycle.fire(LifecycleEventKind::Start);
        self.lifecycle.fire(LifecycleEventKind::AfterStart);
        Ok(())
    }

    async fn stop(&self) -> Result<(), LifecycleError> {
        self.lifecycle.begin_stop()?;
        self.lifecycle.fire(LifecycleEventKind::BeforeStop);

        let mut first_error = None;
        for valve in self.valves() {
            if let Some(startable) = valve.as_startable() {
                if let Err(err) = startable.stop().await {
                    warn!(
                        container = %self.container_name,
                        valve = %valve.name(),
                        error = %err,
                        "valve failed to stop"
                    );
                    first_error.get_or_insert(LifecycleError::ValveStop {
                        valve: valve.name().to_string(),
                        reason: err.to_string(),
                    });
                }
            }
            self.disassociate(&valve);
        }

        self.lifecycle.complete_stop();
        self.lifecycle.fire(LifecycleEventKind::Stop);
        self.lifecycle.fire(LifecycleEventKind::AfterStop);
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("container", &self.container_name)
            .field("state", &self.state())
            .field("valves", &self.valves.read().len())
            .field("has_basic", &self.basic.read().is_some())
            .finish()
    }
}
