//! Tokio-backed task spawning for the load pipeline.

use potree::{BoxedTask, Spawner};
use tokio::runtime::Handle;

/// Spawns load tasks on a Tokio runtime (reqwest requires it).
#[derive(Debug, Clone)]
pub struct TokioSpawner {
    handle: Handle,
}

impl TokioSpawner {
    /// Create a spawner for the runtime the caller is running on.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    #[must_use]
    pub fn current() -> Self {
        Self {
            handle: Handle::current(),
        }
    }
}

impl Spawner for TokioSpawner {
    fn spawn(&self, task: BoxedTask) {
        // Results come back over the completion channel; the handle is not
        // needed.
        drop(self.handle.spawn(task));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawned_task_runs() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        TokioSpawner::current().spawn(Box::pin(async move {
            let _ = tx.send(7);
        }));
        assert_eq!(rx.await.unwrap(), 7);
    }
}
