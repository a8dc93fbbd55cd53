//! Tree-building fixtures.

use super::mocks::CountingHandler;
use crate::app::App;
use crate::config::ContainerSettings;
use crate::container::Container;
use crate::endpoint::Endpoint;
use crate::engine::Engine;
use crate::errors::StructuralError;
use crate::host::Host;
use std::sync::Arc;

/// A fully wired 4-level tree for tests.
#[derive(Debug)]
pub struct TestTree {
    /// The top-level engine ("main").
    pub engine: Arc<Engine>,
    /// The single host ("localhost", also the default host).
    pub host: Arc<Host>,
    /// The root app ("/", default mapping to the endpoint).
    pub app: Arc<App>,
    /// The endpoint ("root"), bound to `handler`.
    pub endpoint: Arc<Endpoint>,
    /// The counting handler bound to the endpoint.
    pub handler: Arc<CountingHandler>,
}

impl TestTree {
    /// Builds the standard tree, not yet started.
    ///
    /// The engine's maintenance cadence is disabled so lifecycle tests see
    /// no background traffic unless they opt in.
    ///
    /// # Errors
    ///
    /// Propagates structural errors; the standard wiring never produces
    /// any.
    pub async fn build() -> Result<Self, StructuralError> {
        let engine = Engine::with_settings("main", ContainerSettings::new());
        engine.set_default_host("localhost");

        let host = Host::new("localhost");
        let app = App::new("/");
        app.add_mapping("/", "root");

        let endpoint = Endpoint::new("root");
        let handler = Arc::new(CountingHandler::new());
        endpoint.set_handler(handler.clone());

        app.add_child(endpoint.clone()).await?;
        host.add_child(app.clone()).await?;
        engine.add_child(host.clone()).await?;

        Ok(Self {
            engine,
            host,
            app,
            endpoint,
            handler,
        })
    }
}
