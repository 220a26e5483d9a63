//! Per-request task pool.
//!
//! # Responsibilities
//! - Bound how many sub-queries of one request run at the same time
//! - Cancel every still-pending task when the request goes away
//!
//! # Design Decisions
//! - One scope per logical request; it is dropped when the request handling
//!   completes, fails or is itself cancelled
//! - Bounding uses a semaphore acquired inside the spawned task, so
//!   `spawn` never blocks the caller
//! - Finished tasks are unaffected by the drop-time abort

use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio::task::AbortHandle;

use super::handle::TaskHandle;

/// Bounded, cancel-on-drop pool of [`TaskHandle`]s.
#[derive(Debug)]
pub struct TaskScope {
    permits: Arc<Semaphore>,
    spawned: Mutex<Vec<AbortHandle>>,
}

impl TaskScope {
    /// `max_concurrent` is clamped to at least one.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            spawned: Mutex::new(Vec::new()),
        }
    }

    /// Schedule `work` in this scope and return its handle immediately.
    pub fn spawn<T, E, F>(&self, work: F) -> TaskHandle<T, E>
    where
        T: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        let permits = self.permits.clone();
        let join = tokio::spawn(async move {
            // The semaphore is never closed, the permit is only absent if it were.
            let _permit = permits.acquire_owned().await.ok();
            work.await
        });

        if let Ok(mut spawned) = self.spawned.lock() {
            spawned.push(join.abort_handle());
        }

        TaskHandle::from_join(join)
    }

    /// Tasks spawned so far that have not finished.
    pub fn pending(&self) -> usize {
        self.spawned
            .lock()
            .map(|spawned| spawned.iter().filter(|h| !h.is_finished()).count())
            .unwrap_or(0)
    }

    /// Abort every task of the scope that is still pending.
    pub fn cancel_all(&self) {
        if let Ok(spawned) = self.spawned.lock() {
            let pending = spawned.iter().filter(|h| !h.is_finished()).count();
            if pending > 0 {
                tracing::debug!(pending, "Cancelling pending sub-queries");
            }
            for handle in spawned.iter() {
                handle.abort();
            }
        }
    }
}

impl Drop for TaskScope {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let scope = TaskScope::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<TaskHandle<(), String>> = (0..6)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                scope.spawn(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();

        for h in &handles {
            assert_eq!(h.wait_and_get().await, Ok(()));
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_drop_cancels_pending_but_keeps_finished() {
        let scope = TaskScope::new(4);
        let done: TaskHandle<u32, String> = scope.spawn(async { Ok(1) });
        assert_eq!(done.wait_and_get().await, Ok(1));

        let slow: TaskHandle<u32, String> = scope.spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(2)
        });
        assert_eq!(scope.pending(), 1);

        drop(scope);

        assert_eq!(slow.wait_and_get().await, Err(TaskError::Cancelled));
        assert_eq!(done.wait_and_get().await, Ok(1));
    }
}
