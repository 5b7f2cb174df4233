//! Shutdown coordination for live calls and detached post-call work.
//!
//! Media-stream sockets end their inbound stream when shutdown begins, so
//! every live call tears down through the normal path and flushes its
//! transcript. Socket tasks and analysis tasks are tracked so the binary can
//! wait for them before the runtime goes away.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::task_tracker::TrackedFuture;
use tokio_util::task::TaskTracker;

#[derive(Clone, Default)]
pub struct Lifecycle {
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves once shutdown has begun.
    pub async fn stopping(&self) {
        self.shutdown.cancelled().await;
    }

    pub fn is_stopping(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Wraps a future so [`Lifecycle::wait`] waits for it.
    pub fn track<F: Future>(&self, future: F) -> TrackedFuture<F> {
        self.tasks.track_future(future)
    }

    /// Spawns a tracked task.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tasks.spawn(future)
    }

    /// Tells live calls to wind down. Tasks spawned afterwards are still tracked.
    pub fn begin_shutdown(&self) {
        self.shutdown.cancel();
        self.tasks.close();
    }

    /// Waits up to `grace` for tracked work. Returns `false` if some was still running.
    pub async fn wait(&self, grace: Duration) -> bool {
        let pending = self.tasks.len();
        if pending > 0 {
            tracing::info!(pending, "waiting for calls and post-call work");
        }
        tokio::time::timeout(grace, self.tasks.wait()).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn wait_covers_work_spawned_during_shutdown() {
        let lifecycle = Lifecycle::new();
        let done = Arc::new(AtomicBool::new(false));

        let call = {
            let lifecycle = lifecycle.clone();
            let done = done.clone();
            tokio::spawn(lifecycle.clone().track(async move {
                lifecycle.stopping().await;
                // A call flushing on its way out queues its analysis.
                lifecycle.spawn(async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    done.store(true, Ordering::SeqCst);
                });
            }))
        };

        lifecycle.begin_shutdown();
        assert!(lifecycle.is_stopping());
        assert!(lifecycle.wait(Duration::from_secs(2)).await);
        assert!(done.load(Ordering::SeqCst));
        call.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn wait_gives_up_after_grace() {
        let lifecycle = Lifecycle::new();
        lifecycle.spawn(std::future::pending::<()>());
        lifecycle.begin_shutdown();
        assert!(!lifecycle.wait(Duration::from_secs(1)).await);
    }
}
