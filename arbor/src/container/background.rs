//! Background maintenance scheduling.
//!
//! Every container that opts in (`background_delay_secs > 0`) owns exactly
//! one long-lived maintenance task. The task services the container and,
//! depth-first, every descendant that does not own a task of its own, so a
//! subtree is never maintained by two tasks at once.

use super::Container;
use crate::errors::LifecycleError;
use crate::resolver::with_resolver;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long `stop` waits for the maintenance task to terminate before
/// declaring it leaked.
pub(crate) const JOIN_GRACE: Duration = Duration::from_secs(5);

/// Handle to a container's dedicated maintenance task.
pub(crate) struct BackgroundTask {
    stop_flag: Arc<AtomicBool>,
    wakeup: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    /// Spawns the maintenance loop for `container`.
    pub(crate) fn spawn(container: Arc<dyn Container>, delay: Duration) -> Self {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let wakeup = Arc::new(Notify::new());

        let flag = stop_flag.clone();
        let notify = wakeup.clone();
        let handle = tokio::spawn(async move {
            debug!(container = %container.name(), ?delay, "maintenance task started");
            loop {
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = notify.notified() => {}
                }
                // Cancellation is cooperative, checked once per wake.
                if flag.load(Ordering::SeqCst) {
                    break;
                }
                process_subtree(container.clone()).await;
            }
            debug!(container = %container.name(), "maintenance task exiting");
        });

        Self {
            stop_flag,
            wakeup,
            handle,
        }
    }

    /// Requests the loop to exit, wakes it from its sleep, and joins it.
    ///
    /// # Errors
    ///
    /// Returns the fatal `MaintenanceHung` error when the task does not
    /// terminate within the grace period; the task is left detached.
    pub(crate) async fn stop(self, name: &str) -> Result<(), LifecycleError> {
        self.stop_flag.store(true, Ordering::SeqCst);
        self.wakeup.notify_one();
        match tokio::time::timeout(JOIN_GRACE, self.handle).await {
            Ok(join_result) => {
                if let Err(err) = join_result {
                    warn!(container = %name, error = %err, "maintenance task ended abnormally");
                }
                Ok(())
            }
            Err(_elapsed) => Err(LifecycleError::MaintenanceHung {
                name: name.to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for BackgroundTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundTask")
            .field("stop_requested", &self.stop_flag.load(Ordering::SeqCst))
            .finish()
    }
}

/// Runs one maintenance pass over `container` and the descendants it is
/// responsible for.
///
/// Children with their own maintenance task (`background_delay > 0`) are
/// skipped; they are serviced on their own cadence. Hook errors are logged
/// and never terminate the pass.
pub(crate) fn process_subtree(container: Arc<dyn Container>) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        let hook = async {
            if let Err(err) = container.background_process().await {
                warn!(
                    container = %container.name(),
                    error = %err,
                    "maintenance hook failed"
                );
            }
        };
        match container.maintenance_resolver() {
            Some(resolver) => with_resolver(resolver, hook).await,
            None => hook.await,
        }

        for child in container.find_children() {
            if child.background_delay() <= 0 {
                process_subtree(child).await;
            }
        }
    })
}
