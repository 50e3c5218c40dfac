use crate::log_info;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Bounded pool of tokio workers.
///
/// Every spawned future first waits for a permit, so at most `size` of them
/// run at once. Futures queue in the order they were spawned.
#[derive(Clone, Debug)]
pub struct WorkerPool {
    name: String,
    size: usize,
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(name: &str, size: usize) -> Self {
        let size = size.max(1);
        log_info!("Worker pool '{}' created with {} workers", name, size);
        Self {
            name: name.to_string(),
            size,
            permits: Arc::new(Semaphore::new(size)),
        }
    }

    /// Calculate worker count based on system resources
    pub fn calculate_default_size() -> usize {
        const MIN_WORKERS: usize = 2;
        const MAX_WORKERS: usize = 8;

        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        cpu_count.max(MIN_WORKERS).min(MAX_WORKERS)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of workers not currently running a future
    pub fn idle_workers(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `future` on the calling task once a worker is free
    pub async fn run<F: Future>(&self, future: F) -> F::Output {
        // The semaphore is never closed, so acquire only fails if that changes.
        let _permit = self.permits.acquire().await.ok();
        future.await
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let pool = self.clone();
        tokio::spawn(async move { pool.run(future).await })
    }
}
