//! Background worker for periodic and on-demand tasks.
//!
//! Provides a generic `BackgroundWorker<R>` that processes tasks from an mpsc channel
//! via a `BackgroundRunnable` implementation, with optional periodic tick callbacks.
//! Used by scheduled history maintenance and the telemetry batcher.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

const CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// BackgroundRunnable trait
// ---------------------------------------------------------------------------

/// Trait for task handlers executed by `BackgroundWorker`.
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    /// The type of task this runnable processes.
    type Task: Send + 'static;

    /// Process a single task.
    async fn run(&mut self, task: Self::Task);

    /// Called on each tick interval. Default is a no-op.
    async fn on_tick(&mut self) {}

    /// Called once when the worker stops, after queued tasks are drained.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// TaskSender
// ---------------------------------------------------------------------------

/// Cloneable, synchronous submission handle for a running worker.
pub struct TaskSender<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Clone for TaskSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Send + 'static> TaskSender<T> {
    /// Queues `task` without waiting.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is full or the worker has stopped.
    pub fn try_submit(&self, task: T) -> anyhow::Result<()> {
        self.tx.try_send(task).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => anyhow::anyhow!("worker channel full"),
            mpsc::error::TrySendError::Closed(_) => anyhow::anyhow!("worker channel closed"),
        })
    }
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

/// Generic background worker that processes tasks via an mpsc channel.
///
/// The spawned tokio task:
/// 1. Calls `BackgroundRunnable::run()` for each received task
/// 2. Calls `BackgroundRunnable::on_tick()` at the configured interval
/// 3. On stop, runs any tasks still queued, then `BackgroundRunnable::shutdown()`
pub struct BackgroundWorker<R: BackgroundRunnable> {
    tx: Option<mpsc::Sender<R::Task>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Start the worker with the given runnable and tick interval.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(mut runnable: R, tick_interval: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel::<R::Task>(CHANNEL_CAPACITY);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick_interval);
            // Skip the first immediate tick so on_tick doesn't fire at startup.
            ticker.tick().await;

            loop {
                tokio::select! {
                    task = rx.recv() => {
                        match task {
                            Some(t) => runnable.run(t).await,
                            None => break, // Channel closed.
                        }
                    }
                    _ = ticker.tick() => {
                        runnable.on_tick().await;
                    }
                    _ = &mut shutdown_rx => {
                        break;
                    }
                }
            }

            rx.close();
            while let Ok(t) = rx.try_recv() {
                runnable.run(t).await;
            }
            runnable.shutdown().await;
        });

        Self {
            tx: Some(tx),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Submit a task, waiting for channel capacity.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker has been stopped.
    pub async fn submit(&self, task: R::Task) -> anyhow::Result<()> {
        match &self.tx {
            Some(tx) => tx
                .send(task)
                .await
                .map_err(|_| anyhow::anyhow!("worker channel closed")),
            None => Err(anyhow::anyhow!("worker not running")),
        }
    }

    /// A synchronous submission handle, or `None` once stopped.
    #[must_use]
    pub fn sender(&self) -> Option<TaskSender<R::Task>> {
        self.tx.as_ref().map(|tx| TaskSender { tx: tx.clone() })
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Stop the worker gracefully, waiting for the worker task to complete.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    #[derive(Default)]
    struct Counters {
        runs: AtomicU32,
        ticks: AtomicU32,
        shutdowns: AtomicU32,
    }

    struct CountingRunnable {
        counters: Arc<Counters>,
    }

    #[async_trait]
    impl BackgroundRunnable for CountingRunnable {
        type Task = String;

        async fn run(&mut self, _task: String) {
            self.counters.runs.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_tick(&mut self) {
            self.counters.ticks.fetch_add(1, Ordering::SeqCst);
        }

        async fn shutdown(&mut self) {
            self.counters.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting() -> (Arc<Counters>, CountingRunnable) {
        let counters = Arc::new(Counters::default());
        let runnable = CountingRunnable {
            counters: Arc::clone(&counters),
        };
        (counters, runnable)
    }

    #[tokio::test]
    async fn start_submit_and_stop() {
        let (counters, runnable) = counting();
        let mut worker = BackgroundWorker::start(runnable, Duration::from_secs(60));

        worker.submit("task-1".to_string()).await.unwrap();
        worker.submit("task-2".to_string()).await.unwrap();
        worker.submit("task-3".to_string()).await.unwrap();
        worker.stop().await;

        assert_eq!(counters.runs.load(Ordering::SeqCst), 3);
        assert_eq!(counters.shutdowns.load(Ordering::SeqCst), 1);
        assert!(!worker.is_running());
    }

    #[tokio::test]
    async fn tick_fires_periodically() {
        let (counters, runnable) = counting();
        let mut worker = BackgroundWorker::start(runnable, Duration::from_millis(20));

        tokio::time::sleep(Duration::from_millis(100)).await;
        worker.stop().await;

        assert!(counters.ticks.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn sender_submits_synchronously_and_drains_on_stop() {
        let (counters, runnable) = counting();
        let mut worker = BackgroundWorker::start(runnable, Duration::from_secs(60));
        let sender = worker.sender().unwrap();

        for i in 0..10 {
            sender.try_submit(format!("t{i}")).unwrap();
        }
        worker.stop().await;

        assert_eq!(counters.runs.load(Ordering::SeqCst), 10);
        assert!(sender.try_submit("late".to_string()).is_err());
    }

    #[tokio::test]
    async fn submit_after_stop_returns_error() {
        let (_counters, runnable) = counting();
        let mut worker = BackgroundWorker::start(runnable, Duration::from_secs(60));
        worker.stop().await;

        assert!(worker.submit("late-task".to_string()).await.is_err());
        assert!(worker.sender().is_none());
    }
}
