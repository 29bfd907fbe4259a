//! ---
//! tether_section: "04-app-lifecycle-orchestration"
//! tether_subsection: "module"
//! tether_type: "source"
//! tether_scope: "code"
//! tether_description: "Lifecycle orchestration and identity tracking."
//! tether_version: "v0.0.0-prealpha"
//! tether_owner: "tbd"
//! ---
use std::future::Future;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Bounded-lifetime group of background tasks.
///
/// Tasks spawned on the group run concurrently with the foreground work.
/// [`TaskContext::shutdown`] grants them a grace period to drain, then
/// aborts whatever is still running.
#[derive(Debug)]
pub struct TaskContext {
    tasks: Vec<JoinHandle<()>>,
    grace: Duration,
}

impl TaskContext {
    /// Create a group with the given drain grace period.
    pub fn new(grace: Duration) -> Self {
        Self {
            tasks: Vec::new(),
            grace,
        }
    }

    /// Spawn a background task owned by this group.
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.push(tokio::spawn(task));
    }

    /// Wait up to the grace period for every task, then force-cancel
    /// stragglers. Cancellation at this point is expected when a task is
    /// blocked on a source that never closed.
    pub async fn shutdown(self) {
        if self.tasks.is_empty() {
            return;
        }
        let abort_handles: Vec<_> = self.tasks.iter().map(JoinHandle::abort_handle).collect();
        match timeout(self.grace, join_all(self.tasks)).await {
            Ok(results) => {
                for result in results {
                    if let Err(err) = result {
                        if !err.is_cancelled() {
                            warn!(error = %err, "background task failed");
                        }
                    }
                }
                debug!("background tasks drained");
            }
            Err(_) => {
                warn!(grace = ?self.grace, "background tasks exceeded grace period; aborting");
                for handle in abort_handles {
                    handle.abort();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    #[tokio::test]
    async fn shutdown_waits_for_fast_tasks() {
        let done = Arc::new(AtomicBool::new(false));
        let mut group = TaskContext::new(Duration::from_secs(1));
        let flag = done.clone();
        group.spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            flag.store(true, Ordering::SeqCst);
        });
        group.shutdown().await;
        assert!(done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn shutdown_aborts_stuck_tasks_after_grace() {
        let mut group = TaskContext::new(Duration::from_millis(50));
        group.spawn(async {
            // Never completes on its own.
            futures::future::pending::<()>().await;
        });
        let started = Instant::now();
        group.shutdown().await;
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
