//! Bounded task executor
//!
//! `submit(fut) -> TaskHandle` over a semaphore-bounded pool of tokio
//! workers. Callers await the handle to collect the unit's result; the
//! engines use this for multi-get sub-batches, per-document check-and-edit,
//! folder-delete subtrees, and fan-out dispatch.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Handle to one submitted unit of work
pub struct TaskHandle<T> {
    inner: JoinHandle<T>,
}

impl<T> TaskHandle<T> {
    /// Wait for the unit to finish and surface its result. A panicked or
    /// cancelled unit becomes `Error::Internal`.
    pub async fn join(self) -> crate::Result<T> {
        self.inner
            .await
            .map_err(|e| crate::Error::Internal(format!("task failed: {}", e)))
    }

    pub fn abort(&self) {
        self.inner.abort();
    }
}

/// Semaphore-bounded executor
#[derive(Clone)]
pub struct Executor {
    permits: Arc<Semaphore>,
}

impl Executor {
    pub fn new(max_workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_workers.max(1))),
        }
    }

    /// Submit a unit of work; it starts as soon as a worker permit frees up
    pub fn submit<F, T>(&self, fut: F) -> TaskHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let permits = self.permits.clone();
        let inner = tokio::spawn(async move {
            // Semaphore is never closed, acquire cannot fail
            let _permit = permits.acquire().await.expect("executor semaphore closed");
            fut.await
        });
        TaskHandle { inner }
    }

    /// Submit a batch and join all handles, returning results in submission
    /// order or the first error
    pub async fn join_all<F, T>(&self, futs: Vec<F>) -> crate::Result<Vec<T>>
    where
        F: Future<Output = crate::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let handles: Vec<TaskHandle<crate::Result<T>>> =
            futs.into_iter().map(|f| self.submit(f)).collect();

        let mut results = Vec::with_capacity(handles.len());
        let mut first_err = None;
        for handle in handles {
            match handle.join().await {
                Ok(Ok(v)) => results.push(v),
                Ok(Err(e)) | Err(e) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(results),
        }
    }
}
