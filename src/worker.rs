//! Bounded pool for detection work
//!
//! Callers suspend until their job finishes. A job that panics comes back
//! as an error instead of tearing down the caller's loop.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Jobs currently able to start without waiting
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run an async job on its own task once a slot is free
    pub async fn run<F, T>(&self, job: F) -> anyhow::Result<T>
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| anyhow::anyhow!("Worker pool closed: {}", e))?;

        tokio::spawn(job)
            .await
            .map_err(|e| anyhow::anyhow!("Worker job failed: {}", e))?
    }

    /// Run a synchronous job on the blocking thread pool
    pub async fn run_blocking<F, T>(&self, job: F) -> anyhow::Result<T>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| anyhow::anyhow!("Worker pool closed: {}", e))?;

        tokio::task::spawn_blocking(job)
            .await
            .map_err(|e| anyhow::anyhow!("Blocking worker job failed: {}", e))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_returns_job_result() {
        let pool = WorkerPool::new(2);
        let value = pool.run(async { Ok(21 * 2) }).await.unwrap();
        assert_eq!(value, 42);

        let value = pool.run_blocking(|| Ok("done")).await.unwrap();
        assert_eq!(value, "done");
    }

    fn pool_is_broken() -> bool {
        true
    }

    #[tokio::test]
    async fn test_panic_becomes_error() {
        let pool = WorkerPool::new(1);
        let result: anyhow::Result<()> = pool
            .run(async {
                if pool_is_broken() {
                    panic!("scan blew up");
                }
                Ok(())
            })
            .await;
        assert!(result.is_err());

        // Slot is released after the panic
        assert_eq!(pool.available(), 1);
        assert!(pool.run(async { Ok(()) }).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let jobs: Vec<_> = (0..6)
            .map(|_| {
                let pool = pool.clone();
                let running = running.clone();
                let peak = peak.clone();
                tokio::spawn(async move {
                    pool.run(async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
                })
            })
            .collect();

        for job in jobs {
            job.await.unwrap().unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }
}
