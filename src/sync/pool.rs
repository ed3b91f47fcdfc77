//! Bounded task pool with optional first-failure cancellation
//!
//! Tasks are spawned onto a [`JoinSet`] and wait for a semaphore permit before
//! running, so at most `size` run at once. Each task receives a
//! [`FailureSignal`]; when the pool is fail-fast, signalling a failure cancels
//! the pool's token, which stops queued tasks from starting and aborts the
//! retry loops of tasks already running.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Handed to every task so it can report failure to its siblings
#[derive(Debug, Clone)]
pub struct FailureSignal {
    cancel: CancellationToken,
    fail_fast: bool,
}

impl FailureSignal {
    /// Record a failure; cancels the pool when it is fail-fast
    pub fn failed(&self) {
        if self.fail_fast {
            self.cancel.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token to pass into retry loops
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// What came back from a pool
#[derive(Debug)]
pub struct PoolResult<T> {
    /// Outputs of tasks that ran, in completion order
    pub completed: Vec<T>,

    /// The pool was cancelled by a fail-fast failure or by its parent
    pub cancelled: bool,
}

pub struct TaskPool<T> {
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    fail_fast: bool,
    tasks: JoinSet<Option<T>>,
}

impl<T: Send + 'static> TaskPool<T> {
    /// Pool of `size` workers whose token is a child of `parent`
    pub fn new(size: usize, fail_fast: bool, parent: &CancellationToken) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size.max(1))),
            cancel: parent.child_token(),
            fail_fast,
            tasks: JoinSet::new(),
        }
    }

    /// Queue `work`; it starts once a permit is free unless the pool was cancelled first
    pub fn spawn<F, Fut>(&mut self, work: F)
    where
        F: FnOnce(FailureSignal) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let signal = FailureSignal {
            cancel: self.cancel.clone(),
            fail_fast: self.fail_fast,
        };

        self.tasks.spawn(async move {
            let permit = tokio::select! {
                permit = permits.acquire_owned() => permit,
                _ = signal.cancel.cancelled() => return None,
            };
            let Ok(_permit) = permit else {
                return None;
            };
            if signal.is_cancelled() {
                return None;
            }
            Some(work(signal).await)
        });
    }

    /// Whether a fail-fast failure (or the parent) cancelled this pool
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for every queued task
    pub async fn join(mut self) -> PoolResult<T> {
        let mut completed = Vec::with_capacity(self.tasks.len());

        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(Some(output)) => completed.push(output),
                Ok(None) => {}
                Err(e) => tracing::error!(error = %e, "Sync task panicked"),
            }
        }

        PoolResult {
            completed,
            cancelled: self.cancel.is_cancelled(),
        }
    }
}
