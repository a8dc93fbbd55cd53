//! Resource-resolution contexts.
//!
//! Every container can carry its own resolver; resolution for a subtree
//! delegates to the parent chain and terminates at the process-wide
//! [`SystemResolver`]. During background maintenance of an app subtree the
//! active resolver is swapped to the subtree's own for the duration of the
//! hook, with restore guaranteed on every exit path.

use std::fmt;
use std::sync::Arc;

/// Resolves named resources for a container subtree.
pub trait ResourceResolver: Send + Sync + fmt::Debug {
    /// A short description used in logs.
    fn describe(&self) -> &str;

    /// Looks up a named resource.
    fn lookup(&self, key: &str) -> Option<serde_json::Value>;
}

/// The terminal resolver backed by the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl ResourceResolver for SystemResolver {
    fn describe(&self) -> &str {
        "system"
    }

    fn lookup(&self, key: &str) -> Option<serde_json::Value> {
        std::env::var(key).ok().map(serde_json::Value::String)
    }
}

tokio::task_local! {
    static ACTIVE_RESOLVER: Arc<dyn ResourceResolver>;
}

/// Runs `future` with `resolver` as the task's active resolver.
///
/// The previous binding is restored when the future completes, is dropped,
/// or unwinds; the scope owns the restore.
pub async fn with_resolver<F>(resolver: Arc<dyn ResourceResolver>, future: F) -> F::Output
where
    F: std::future::Future,
{
    ACTIVE_RESOLVER.scope(resolver, future).await
}

/// Returns the task's active resolver, or the system default when no scope
/// is active.
#[must_use]
pub fn active_resolver() -> Arc<dyn ResourceResolver> {
    ACTIVE_RESOLVER
        .try_with(Arc::clone)
        .unwrap_or_else(|_| Arc::new(SystemResolver))
}
