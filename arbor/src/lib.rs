//! # Arbor
//!
//! A hierarchical request-dispatch container engine.
//!
//! Arbor is the tree underneath a server: a connector hands a
//! request/response pair to the top-level [`Engine`](engine::Engine), whose
//! pipeline's basic valve selects a [`Host`](host::Host), whose valve
//! selects an [`App`](app::App), whose valve selects an
//! [`Endpoint`](endpoint::Endpoint): four pipelines deep before
//! application code runs. Every level can install cross-cutting valves of
//! its own.
//!
//! - **Guarded lifecycle**: every container and pipeline runs the same
//!   `New → Started → Stopped` state machine with ordered events
//! - **Concurrent fan-out**: children start and stop in parallel through a
//!   bounded, lazily created pool; sibling failures never cascade
//! - **Background maintenance**: each opted-in container owns one
//!   dedicated periodic task servicing the part of its subtree that has
//!   none of its own
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use arbor::prelude::*;
//!
//! let engine = Engine::new("main");
//! engine.set_default_host("localhost");
//! let host = Host::new("localhost");
//! let app = App::new("/");
//! app.add_mapping("/", "root");
//! let endpoint = Endpoint::new("root");
//! endpoint.set_handler(Arc::new(MyHandler));
//!
//! app.add_child(endpoint).await?;
//! host.add_child(app).await?;
//! engine.add_child(host).await?;
//! engine.start().await?;
//!
//! let mut response = Response::new();
//! engine.invoke(&mut Request::new("localhost", "/"), &mut response).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod app;
pub mod config;
pub mod container;
pub mod endpoint;
pub mod engine;
pub mod errors;
pub mod host;
pub mod lifecycle;
pub mod pipeline;
pub mod request;
pub mod resolver;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::app::{App, APP_PATH_ATTRIBUTE};
    pub use crate::config::ContainerSettings;
    pub use crate::container::{
        Container, ContainerBase, ContainerEvent, ContainerEventKind, ContainerKind,
        ContainerListener,
    };
    pub use crate::endpoint::{Endpoint, Handler};
    pub use crate::engine::Engine;
    pub use crate::errors::{ArborError, DispatchError, LifecycleError, StructuralError};
    pub use crate::host::Host;
    pub use crate::lifecycle::{
        Lifecycle, LifecycleEvent, LifecycleEventKind, LifecycleListener, LifecycleState,
    };
    pub use crate::pipeline::{
        AccessLogValve, Contained, ErrorReportValve, Pipeline, StartableValve, Valve, ValveChain,
    };
    pub use crate::request::{Request, Response};
    pub use crate::resolver::{ResourceResolver, SystemResolver};
}
