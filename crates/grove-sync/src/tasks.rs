//! Background task registry
//!
//! Tracks the synchronizer's long-running tasks so they can be stopped
//! together. Tasks get a child of the registry's token and are aborted
//! on shutdown if they do not exit on their own.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct TaskRegistry {
    shutdown: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            shutdown: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Token cancelled on shutdown
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Spawn `fut`, dropping it when the registry shuts down
    pub fn spawn_cancellable<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.shutdown.child_token();
        let handle = tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = fut => {}
            }
        });
        self.handles.lock().push(handle);
    }

    /// Run `f` every `interval` until it returns `false` or the registry
    /// shuts down; the first run is immediate
    pub fn spawn_interval_until<F, Fut>(&self, interval: Duration, mut f: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let token = self.shutdown.child_token();
        let handle = tokio::spawn(async move {
            loop {
                if token.is_cancelled() {
                    break;
                }

                tokio::select! {
                    () = token.cancelled() => break,
                    keep_going = f() => {
                        if !keep_going {
                            break;
                        }
                    }
                }

                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(interval) => {}
                }
            }
        });
        self.handles.lock().push(handle);
    }

    /// Number of tasks that have not finished
    pub fn active(&self) -> usize {
        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.len()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
        for handle in self.handles.lock().drain(..) {
            handle.abort();
        }
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TaskRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_interval_runs_until_false() {
        let registry = TaskRegistry::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        registry.spawn_interval_until(Duration::from_millis(1), move || {
            let counter = counter.clone();
            async move { counter.fetch_add(1, Ordering::SeqCst) + 1 < 3 }
        });

        for _ in 0..200 {
            if registry.active() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_children() {
        let registry = TaskRegistry::new();
        let token = registry.cancellation_token();
        registry.spawn_cancellable(std::future::pending::<()>());
        assert_eq!(registry.active(), 1);

        registry.shutdown();
        assert!(token.is_cancelled());
        assert!(registry.is_shut_down());
        assert_eq!(registry.active(), 0);
    }
}
