//! Single-assignment handle on one unit of asynchronous work.
//!
//! # Responsibilities
//! - Schedule the work on the runtime without blocking the caller
//! - Let any number of waiters observe the same outcome
//! - Capture errors and panics raised by the work and re-surface them
//!
//! # Design Decisions
//! - No public constructor other than [`TaskHandle::create`] (and
//!   [`TaskScope::spawn`](super::TaskScope::spawn)); building a value never
//!   starts work implicitly
//! - The outcome is memoised in a shared future: the work runs exactly once,
//!   later waits return a clone of the stored result
//! - Outcome types must be `Clone` since every waiter gets its own copy

use std::any::Any;
use std::future::Future;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;
use tokio::task::{AbortHandle, JoinError, JoinHandle};

/// Why a task did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError<E> {
    /// The work ran and returned an error.
    #[error("{0}")]
    Failed(E),

    /// The work panicked.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The work was aborted before it finished.
    #[error("task cancelled")]
    Cancelled,
}

/// Outcome observed by every waiter.
pub type TaskOutcome<T, E> = Result<T, TaskError<E>>;

/// Handle on a scheduled unit of work. States: pending, then fulfilled or
/// failed, exactly once.
pub struct TaskHandle<T, E> {
    outcome: Shared<BoxFuture<'static, TaskOutcome<T, E>>>,
    abort: AbortHandle,
}

impl<T, E> TaskHandle<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Schedule `work` on the current runtime and return immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn create<F>(work: F) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self::from_join(tokio::spawn(work))
    }

    pub(crate) fn from_join(join: JoinHandle<Result<T, E>>) -> Self {
        let abort = join.abort_handle();
        let outcome = join
            .map(|joined| match joined {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(TaskError::Failed(e)),
                Err(e) => Err(join_error(e)),
            })
            .boxed()
            .shared();

        Self { outcome, abort }
    }

    /// Wait for the work to finish and return its outcome.
    ///
    /// Safe to call repeatedly and from several tasks at once; the work is
    /// never re-executed.
    pub async fn wait_and_get(&self) -> TaskOutcome<T, E> {
        self.outcome.clone().await
    }

    /// Like [`wait_and_get`](Self::wait_and_get) with an upper bound.
    /// `None` means the deadline expired; the work keeps running.
    pub async fn wait_timeout(&self, deadline: Duration) -> Option<TaskOutcome<T, E>> {
        tokio::time::timeout(deadline, self.wait_and_get()).await.ok()
    }

    /// The outcome if some waiter already observed it.
    pub fn try_get(&self) -> Option<TaskOutcome<T, E>> {
        self.outcome.peek().cloned()
    }

    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }

    /// Abort the work if it is still pending. A finished task keeps its
    /// outcome.
    pub fn cancel(&self) {
        self.abort.abort();
    }
}

impl<T, E> Clone for TaskHandle<T, E>
where
    T: Clone,
    E: Clone,
{
    fn clone(&self) -> Self {
        Self {
            outcome: self.outcome.clone(),
            abort: self.abort.clone(),
        }
    }
}

impl<T, E> std::fmt::Debug for TaskHandle<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("finished", &self.abort.is_finished())
            .finish()
    }
}

fn join_error<E>(err: JoinError) -> TaskError<E> {
    if err.is_cancelled() {
        return TaskError::Cancelled;
    }
    match err.try_into_panic() {
        Ok(payload) => TaskError::Panicked(panic_message(payload)),
        Err(_) => TaskError::Cancelled,
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
