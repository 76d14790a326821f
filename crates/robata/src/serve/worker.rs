//! Handle for the background generation worker task.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::{sync::Notify, task::JoinHandle};

/// Owns the spawned worker task: a running flag the loop polls, a notifier
/// that wakes it when new work arrives, and the join handle for shutdown.
///
/// Dropping the handle initiates a graceful shutdown.
pub(crate) struct WorkerHandle {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    notifier: Arc<Notify>,
}

impl WorkerHandle {
    /// Spawns the worker through `task`, which receives the running flag
    /// and the notifier and returns the join handle of the spawned task.
    pub(crate) fn new<F>(task: F) -> Self
    where
        F: FnOnce(Arc<AtomicBool>, Arc<Notify>) -> JoinHandle<()>,
    {
        let running = Arc::new(AtomicBool::new(true));
        let notifier = Arc::new(Notify::new());
        let handle = task(running.clone(), notifier.clone());
        Self {
            running,
            handle: Some(handle),
            notifier,
        }
    }

    /// Wakes the worker to pick up newly queued requests.
    pub(crate) fn notify(&self) {
        self.notifier.notify_one();
    }

    pub(crate) fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.notifier.notify_one();

        if let Some(handle) = self.handle.take() {
            tokio::spawn(async move {
                let _ = handle.await;
            });
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
