//! Bounded pool for provider calls made on behalf of session consumers.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::AbortHandle;

/// Runs provider work on separate tasks, at most `workers` at a time.
///
/// Work is isolated from the caller: a panicking provider surfaces as an
/// error instead of taking the consumer loop down, and dropping the caller's
/// future aborts the work.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    workers: usize,
}

struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    #[cfg(test)]
    fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub async fn run<F, T>(&self, work: F) -> anyhow::Result<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits).acquire_owned().await?;
        let handle = tokio::spawn(async move {
            let _permit = permit;
            work.await
        });
        let _abort = AbortOnDrop(handle.abort_handle());
        handle
            .await
            .map_err(|e| anyhow::anyhow!("worker task failed: {e}"))
    }
}
