//! Bounded, fail-fast task group.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Runs tasks with at most `cap` in flight.
///
/// The first task to fail cancels every other task in the group, running or
/// still waiting for a permit, and its error is the group's result. Work a
/// task finished before the cancellation is kept.
#[derive(Debug)]
pub struct BoundedGroup<T> {
    permits: Arc<Semaphore>,
    token: CancellationToken,
    tasks: JoinSet<Result<T>>,
}

impl<T: Send + 'static> BoundedGroup<T> {
    /// An empty group with room for `cap` concurrent tasks (at least one).
    pub fn new(cap: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(cap.max(1))),
            token: CancellationToken::new(),
            tasks: JoinSet::new(),
        }
    }

    /// Queue a task. It starts once a permit is free.
    ///
    /// The task receives the group's cancellation token so it can stop
    /// blocking work cooperatively; async work is dropped at its next await
    /// point regardless.
    pub fn spawn<F, Fut>(&mut self, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let token = self.token.clone();
        self.tasks.spawn(async move {
            let _permit = tokio::select! {
                biased;
                () = token.cancelled() => return Err(Error::Cancelled),
                permit = permits.acquire_owned() => permit.map_err(|_| Error::Cancelled)?,
            };
            tokio::select! {
                biased;
                () = token.cancelled() => Err(Error::Cancelled),
                res = task(token.clone()) => res,
            }
        });
    }

    /// Wait for every task, failing fast on the first error.
    ///
    /// # Errors
    ///
    /// Returns the first task error, or [`Error::Join`] when a task panicked.
    pub async fn join(mut self) -> Result<Vec<T>> {
        let mut out = Vec::with_capacity(self.tasks.len());
        while let Some(joined) = self.tasks.join_next().await {
            let err = match joined {
                Ok(Ok(value)) => {
                    out.push(value);
                    continue;
                }
                Ok(Err(err)) => err,
                Err(err) => Error::Join(err),
            };

            self.token.cancel();
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}
            return Err(err);
        }
        Ok(out)
    }
}
