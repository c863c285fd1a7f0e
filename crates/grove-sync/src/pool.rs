//! Bounded worker pools
//!
//! A fixed number of workers drain one bounded queue. Submitting to a
//! full queue waits for room, which pushes back on whoever produces the
//! work. Every job gets a completion handle so a reconciliation cycle can
//! wait for the work it queued.

use futures::future::BoxFuture;
use grove_core::{GroveError, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

type Job = BoxFuture<'static, ()>;

/// Completion of one submitted job
#[derive(Debug)]
pub struct JobHandle(oneshot::Receiver<()>);

impl JobHandle {
    /// Wait for the job; `false` if it was dropped unfinished
    pub async fn finished(self) -> bool {
        self.0.await.is_ok()
    }
}

/// Fixed-size pool of async workers over a bounded queue
#[derive(Debug)]
pub struct WorkerPool {
    name: &'static str,
    workers: usize,
    sender: mpsc::Sender<Job>,
    handles: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Spawn `workers` workers draining a queue of `capacity` jobs
    ///
    /// Workers stop when `cancel` fires. Must be called inside a Tokio
    /// runtime.
    pub fn new(name: &'static str, workers: usize, capacity: usize, cancel: CancellationToken) -> Self {
        let workers = workers.max(1);
        let (sender, receiver) = mpsc::channel::<Job>(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let handles = (0..workers)
            .map(|worker| {
                let receiver = receiver.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    loop {
                        let job = tokio::select! {
                            () = cancel.cancelled() => break,
                            job = async { receiver.lock().await.recv().await } => job,
                        };
                        let Some(job) = job else { break };
                        trace!(pool = name, worker, "running job");
                        tokio::select! {
                            () = cancel.cancelled() => break,
                            () = job => {}
                        }
                    }
                    debug!(pool = name, worker, "worker stopped");
                })
            })
            .collect();

        Self {
            name,
            workers,
            sender,
            handles: parking_lot::Mutex::new(handles),
            cancel,
        }
    }

    /// Pool name used in logs
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of workers
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Queue `job`, waiting while the queue is full
    pub async fn submit<F>(&self, job: F) -> Result<JobHandle>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (done, handle) = oneshot::channel();
        let job: Job = Box::pin(async move {
            job.await;
            let _ = done.send(());
        });

        if self.cancel.is_cancelled() {
            return Err(GroveError::cancelled(format!("{} pool is shut down", self.name)));
        }
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(GroveError::cancelled(format!("{} pool submit", self.name))),
            sent = self.sender.send(job) => sent
                .map(|()| JobHandle(handle))
                .map_err(|_| GroveError::cancelled(format!("{} pool is shut down", self.name))),
        }
    }

    /// Stop the workers, dropping queued jobs
    pub fn shutdown(&self) {
        self.cancel.cancel();
        for handle in self.handles.lock().drain(..) {
            handle.abort();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_jobs_run_and_complete() {
        let pool = WorkerPool::new("test", 2, 4, CancellationToken::new());
        let count = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let count = count.clone();
            handles.push(
                pool.submit(async move {
                    count.fetch_add(1, Ordering::SeqCst);
                })
                .await
                .unwrap(),
            );
        }
        for handle in handles {
            assert!(handle.finished().await);
        }
        assert_eq!(count.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded_by_workers() {
        let pool = WorkerPool::new("bounded", 3, 16, CancellationToken::new());
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..12 {
            let running = running.clone();
            let peak = peak.clone();
            handles.push(
                pool.submit(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .await
                .unwrap(),
            );
        }
        for handle in handles {
            handle.finished().await;
        }
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_cancelled() {
        let pool = WorkerPool::new("closed", 1, 1, CancellationToken::new());
        pool.shutdown();
        let err = pool.submit(async {}).await.unwrap_err();
        assert_matches!(err, GroveError::Cancelled { .. });
    }
}
