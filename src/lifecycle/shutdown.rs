//! Shutdown coordination for background loops.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Coordinator for graceful shutdown.
///
/// Owns the broadcast channel the background loops listen on and the
/// handles of the tasks it spawned.
pub struct Shutdown {
    /// Broadcast channel sender.
    tx: broadcast::Sender<()>,
    /// Spawned loops, by name.
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Spawn a loop that receives its own shutdown subscription.
    pub fn spawn<F, Fut>(&self, name: &'static str, task: F)
    where
        F: FnOnce(broadcast::Receiver<()>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task(self.subscribe()));
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name, handle));
        tracing::debug!(task = name, "Background task spawned");
    }

    /// Get the number of tasks spawned and not yet drained.
    pub fn task_count(&self) -> usize {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Trigger shutdown and wait for every task, aborting stragglers after `timeout`.
    ///
    /// Returns the number of tasks that stopped on their own.
    pub async fn drain(&self, timeout: Duration) -> usize {
        self.trigger();

        let tasks =
            std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        let deadline = Instant::now() + timeout;
        let mut stopped = 0;

        for (name, mut handle) in tasks {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => stopped += 1,
                Ok(Err(e)) => tracing::error!(task = name, error = %e, "Background task failed"),
                Err(_) => {
                    tracing::warn!(
                        task = name,
                        "Background task missed shutdown deadline, aborting"
                    );
                    handle.abort();
                }
            }
        }

        stopped
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
