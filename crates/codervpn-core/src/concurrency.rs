//! Concurrency helpers: a cancellable join over sibling tasks and a scoped
//! async lock that can give up when a cancellation fires.

use std::any::Any;
use std::future::Future;

use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Returned when waiting was abandoned because a cancellation fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Why a joined task did not produce a value.
#[derive(Debug, Error)]
pub enum TaskError<E> {
    /// The task returned an error.
    #[error("task failed: {0}")]
    Failed(E),
    /// The task panicked.
    #[error("task panicked: {0}")]
    Panicked(String),
    /// The task was aborted before it finished.
    #[error("task aborted")]
    Aborted,
}

/// Runs sibling tasks that share one cancellation token.
///
/// The first task to fail, panic or be aborted cancels the token so the
/// others can unwind. [`join`](Self::join) reports that first failure (in
/// completion order, not spawn order) but only returns once every task has
/// finished.
pub struct CancellableJoin<T, E> {
    token: CancellationToken,
    tasks: JoinSet<(usize, Result<T, E>)>,
    spawned: usize,
}

impl<T, E> CancellableJoin<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Creates a join whose tasks observe `token`.
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            tasks: JoinSet::new(),
            spawned: 0,
        }
    }

    /// Returns the shared token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Spawns a task. It receives a clone of the shared token.
    pub fn spawn<F, Fut>(&mut self, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let index = self.spawned;
        let fut = task(self.token.clone());
        self.tasks.spawn(async move { (index, fut.await) });
        self.spawned += 1;
    }

    /// Waits for every task.
    ///
    /// Returns the values in spawn order, or the first failure.
    pub async fn join(mut self) -> Result<Vec<T>, TaskError<E>> {
        let mut values: Vec<Option<T>> = (0..self.spawned).map(|_| None).collect();
        let mut first_error: Option<TaskError<E>> = None;

        while let Some(joined) = self.tasks.join_next().await {
            let error = match joined {
                Ok((index, Ok(value))) => {
                    values[index] = Some(value);
                    continue;
                }
                Ok((index, Err(err))) => {
                    debug!(task = index, "joined task failed");
                    TaskError::Failed(err)
                }
                Err(err) if err.is_panic() => TaskError::Panicked(panic_message(err.into_panic())),
                Err(_) => TaskError::Aborted,
            };

            self.token.cancel();
            if first_error.is_none() {
                first_error = Some(error);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(values.into_iter().flatten().collect()),
        }
    }
}

/// Runs `tasks` under one token; see [`CancellableJoin`].
pub async fn join_cancellable<T, E, I, F, Fut>(
    token: CancellationToken,
    tasks: I,
) -> Result<Vec<T>, TaskError<E>>
where
    T: Send + 'static,
    E: Send + 'static,
    I: IntoIterator<Item = F>,
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    let mut join = CancellableJoin::new(token);
    for task in tasks {
        join.spawn(task);
    }
    join.join().await
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Async mutual exclusion released when the guard drops.
///
/// The guard is released on every exit path, including early returns, `?`
/// and the caller's future being dropped while it holds the lock.
#[derive(Debug)]
pub struct ScopedLock<T> {
    inner: Mutex<T>,
}

impl<T> ScopedLock<T> {
    /// Creates a lock around `value`.
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Waits for the lock.
    pub async fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock().await
    }

    /// Waits for the lock unless `token` is cancelled first.
    ///
    /// An already-cancelled token wins even if the lock is free.
    pub async fn lock_or_cancelled(
        &self,
        token: &CancellationToken,
    ) -> Result<MutexGuard<'_, T>, Cancelled> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Cancelled),
            guard = self.inner.lock() => Ok(guard),
        }
    }

    /// Takes the lock if it is free.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.inner.try_lock().ok()
    }

    /// Consumes the lock, returning the value.
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}
