use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use polygate_protocol::GatewayError;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};

type BoxedJob = Pin<Box<dyn Future<Output = ()> + Send>>;

/// What a pool does when its queue is full (spec §4.5, C5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionPolicy {
    /// Caller waits (the channel send blocks) until a slot frees up.
    Block,
    /// Caller's job is rejected immediately with `GatewayError::queue_full`.
    DropExcess,
}

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub concurrency: usize,
    pub queue_capacity: usize,
    pub policy: SubmissionPolicy,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self { concurrency: 4, queue_capacity: 64, policy: SubmissionPolicy::Block }
    }
}

/// A bounded worker pool, one per provider (spec §4.5, C5): a fixed number
/// of tasks drain a single bounded job queue, giving every provider its own
/// concurrency ceiling independent of the others.
pub struct WorkerPool {
    tx: mpsc::Sender<BoxedJob>,
    policy: SubmissionPolicy,
    dropped_requests: Arc<AtomicU64>,
}

impl WorkerPool {
    pub fn spawn(config: WorkerPoolConfig) -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<BoxedJob>(config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let dropped_requests = Arc::new(AtomicU64::new(0));

        for _ in 0..config.concurrency.max(1) {
            let rx = rx.clone();
            tokio::spawn(async move {
                loop {
                    let job = {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    };
                    match job {
                        Some(job) => job.await,
                        None => break,
                    }
                }
            });
        }

        Arc::new(Self { tx, policy: config.policy, dropped_requests })
    }

    pub fn dropped_requests(&self) -> u64 {
        self.dropped_requests.load(Ordering::Relaxed)
    }

    /// Submits a job and awaits its result. Honors [`SubmissionPolicy`]:
    /// `Block` waits for a free queue slot, `DropExcess` fails fast with
    /// `GatewayError::queue_full()` when the queue is saturated.
    pub async fn submit<F>(&self, job: F) -> Result<F::Output, GatewayError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        let boxed: BoxedJob = Box::pin(async move {
            let output = job.await;
            let _ = result_tx.send(output);
        });

        match self.policy {
            SubmissionPolicy::Block => {
                if self.tx.send(boxed).await.is_err() {
                    return Err(GatewayError::new(
                        polygate_protocol::ErrorKind::Internal,
                        "worker_pool_closed",
                        "worker pool is no longer accepting jobs",
                    ));
                }
            }
            SubmissionPolicy::DropExcess => {
                if let Err(mpsc::error::TrySendError::Full(_)) = self.tx.try_send(boxed) {
                    self.dropped_requests.fetch_add(1, Ordering::Relaxed);
                    return Err(GatewayError::queue_full());
                }
            }
        }

        result_rx.await.map_err(|_| {
            GatewayError::new(
                polygate_protocol::ErrorKind::Internal,
                "worker_pool_dropped_job",
                "worker pool dropped a submitted job before it completed",
            )
        })
    }
}

/// Lazily creates and caches one [`WorkerPool`] per provider name.
pub struct PoolRegistry {
    pools: RwLock<HashMap<String, Arc<WorkerPool>>>,
    default_config: WorkerPoolConfig,
}

impl PoolRegistry {
    pub fn new(default_config: WorkerPoolConfig) -> Self {
        Self { pools: RwLock::new(HashMap::new()), default_config }
    }

    pub async fn get_or_create(&self, provider: &str) -> Arc<WorkerPool> {
        if let Some(pool) = self.pools.read().await.get(provider) {
            return pool.clone();
        }
        let mut guard = self.pools.write().await;
        if let Some(pool) = guard.get(provider) {
            return pool.clone();
        }
        let pool = WorkerPool::spawn(self.default_config.clone());
        guard.insert(provider.to_string(), pool.clone());
        pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Spec §4.5 scenario 5: concurrency=1, queue_capacity=2, drop_excess,
    /// five back-to-back submissions against a slow job. Three should
    /// succeed, two should fail with `queue_full`, and the dropped counter
    /// should land exactly on 2.
    #[tokio::test]
    async fn drop_excess_rejects_once_queue_and_worker_are_saturated() {
        let pool = WorkerPool::spawn(WorkerPoolConfig {
            concurrency: 1,
            queue_capacity: 2,
            policy: SubmissionPolicy::DropExcess,
        });

        let mut handles = Vec::new();
        for _ in 0..5 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                pool.submit(async {
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    1
                })
                .await
            }));
            // Stagger submissions slightly so the first lands in the worker
            // before the rest queue up, matching the "back-to-back" scenario
            // without relying on exact scheduling.
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let mut ok = 0;
        let mut dropped = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(err) => {
                    assert_eq!(err.code, "queue_full");
                    dropped += 1;
                }
            }
        }

        assert_eq!(ok, 3);
        assert_eq!(dropped, 2);
        assert_eq!(pool.dropped_requests(), 2);
    }

    #[tokio::test]
    async fn block_policy_never_drops_and_never_increments_counter() {
        let pool = WorkerPool::spawn(WorkerPoolConfig {
            concurrency: 1,
            queue_capacity: 1,
            policy: SubmissionPolicy::Block,
        });

        let mut handles = Vec::new();
        for i in 0..4 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move { pool.submit(async move { i }).await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(pool.dropped_requests(), 0);
    }
}
