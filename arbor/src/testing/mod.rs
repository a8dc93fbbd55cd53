//! Testing utilities for arbor trees.
//!
//! This module provides:
//! - Mock valves, containers, listeners, and handlers
//! - A fully wired 4-level tree fixture
//! - A test logging bootstrap

mod fixtures;
mod mocks;

pub use fixtures::TestTree;
pub use mocks::{
    CountingHandler, EchoHandler, FailingChild, FailingHandler, HangingChild,
    RecordingContainerListener, RecordingLifecycleListener, RecordingValve,
};

use tracing_subscriber::EnvFilter;

/// Installs a compact tracing subscriber honoring `RUST_LOG`.
///
/// Safe to call from every test; only the first call wins.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
