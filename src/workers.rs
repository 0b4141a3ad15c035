//! Bounded pool for CPU-bound and blocking-library work.
//!
//! BM25 builds and scoring, cross-encoder inference, and local embedding
//! run here so they never stall the async executor. At most `threads` such
//! jobs run at once; further callers wait for a permit.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;

#[derive(Clone, Debug)]
pub struct BlockingPool {
    permits: Arc<Semaphore>,
    threads: usize,
}

impl BlockingPool {
    pub fn new(threads: usize) -> Self {
        let threads = threads.max(1);
        Self {
            permits: Arc::new(Semaphore::new(threads)),
            threads,
        }
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Run `job` on tokio's blocking threads once a permit is free.
    pub async fn run<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .context("blocking pool closed")?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .context("blocking job panicked")
    }
}

impl Default for BlockingPool {
    fn default() -> Self {
        Self::new(4)
    }
}
